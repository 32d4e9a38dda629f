use std::path::Path;

use hearthnet_governor::GovernorConfig;

/// Load a [`GovernorConfig`] from a YAML file. The file must specify
/// every field; it is authoritative once supplied and takes precedence
/// over `GovernorConfig::from_env()`.
pub fn load(path: &Path) -> anyhow::Result<GovernorConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read {}: {err}", path.display()))?;
    let config: GovernorConfig = serde_yaml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("failed to parse {}: {err}", path.display()))?;
    Ok(config)
}

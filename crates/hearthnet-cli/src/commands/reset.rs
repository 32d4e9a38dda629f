use hearthnet_governor::Governor;

pub async fn run(governor: &Governor, address: Option<&str>, all: bool) -> anyhow::Result<()> {
    match (address, all) {
        (_, true) => {
            governor.reset_all().await;
            println!("reset every known breaker");
        }
        (Some(address), false) => {
            governor.reset(address).await;
            println!("reset breaker for {address}");
        }
        (None, false) => {
            anyhow::bail!("specify an address or pass --all");
        }
    }
    Ok(())
}

use comfy_table::Table;
use hearthnet_governor::{DeviceStats, Governor};

pub async fn run(governor: &Governor, address: Option<&str>, json: bool) -> anyhow::Result<()> {
    match address {
        Some(address) => {
            let stats = governor
                .stats(address)
                .await
                .ok_or_else(|| anyhow::anyhow!("no state recorded for {address}"))?;
            print_one(address, &stats, json);
        }
        None => {
            let all = governor.all_stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                print_table(&all);
            }
        }
    }
    Ok(())
}

fn print_one(address: &str, stats: &DeviceStats, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(stats).unwrap_or_default());
    } else {
        let mut table = Table::new();
        table.set_header(vec!["address", "generation", "state", "in_flight", "admissions", "failures"]);
        table.add_row(vec![
            address.to_string(),
            stats.generation.to_string(),
            format!("{:?}", stats.breaker.state),
            stats.in_flight.to_string(),
            stats.total_admissions.to_string(),
            stats.total_failures.to_string(),
        ]);
        println!("{table}");
    }
}

fn print_table(all: &std::collections::HashMap<String, DeviceStats>) {
    let mut table = Table::new();
    table.set_header(vec!["address", "generation", "state", "in_flight", "admissions", "failures"]);
    for (address, stats) in all {
        table.add_row(vec![
            address.clone(),
            stats.generation.to_string(),
            format!("{:?}", stats.breaker.state),
            stats.in_flight.to_string(),
            stats.total_admissions.to_string(),
            stats.total_failures.to_string(),
        ]);
    }
    println!("{table}");
}

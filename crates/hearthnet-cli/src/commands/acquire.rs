use hearthnet_governor::{Governor, RequestContext};

pub async fn run(governor: &Governor, address: &str, generation: u8, fail: bool) -> anyhow::Result<()> {
    let ctx = RequestContext::background();
    match governor.acquire(&ctx, address, generation).await {
        Ok(handle) => {
            if fail {
                governor.record_failure(address).await;
                println!("admitted {address} (generation {generation}), reported as failure");
            } else {
                governor.record_success(address).await;
                println!("admitted {address} (generation {generation}), reported as success");
            }
            handle.release();
            Ok(())
        }
        Err(err) => {
            println!("refused {address}: {err}");
            Err(err.into())
        }
    }
}

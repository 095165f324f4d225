use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

use kiln::config::Config;
use kiln::ops::Ops;

pub async fn run(config: Config, cancel: Arc<AtomicBool>, package: Option<&str>) -> Result<()> {
    let mut ops = Ops::new(config, cancel)?;
    match package {
        Some(name) => {
            ops.update(name).await?;
        }
        None => {
            let summary = ops.update_all().await?;
            println!("{} updated, {} failed", summary.updated, summary.failed);
        }
    }
    Ok(())
}

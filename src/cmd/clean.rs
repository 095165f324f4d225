use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

use kiln::config::Config;
use kiln::ops::Ops;

pub async fn run(config: Config, cancel: Arc<AtomicBool>) -> Result<()> {
    let ops = Ops::new(config, cancel)?;
    ops.clean()?;
    println!("Build cache cleaned");
    Ok(())
}

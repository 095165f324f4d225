use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

use kiln::config::Config;
use kiln::ops::Ops;

use crate::cmd::format_time;

pub async fn run(config: Config, cancel: Arc<AtomicBool>) -> Result<()> {
    let mut ops = Ops::new(config, cancel)?;
    ops.sync().await?;

    println!("{:<15} {:<10} {}", "Repository", "Priority", "Last Sync");
    for repo in ops.catalog.repositories() {
        let synced = if repo.last_sync == 0 {
            "never".to_string()
        } else {
            format_time(repo.last_sync)
        };
        println!("{:<15} {:<10} {}", repo.name, repo.priority, synced);
    }
    Ok(())
}

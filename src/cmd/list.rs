use anyhow::Result;

use kiln::config::Config;
use kiln::store::db::Database;

use crate::cmd::format_time;

pub fn run(config: &Config, pattern: Option<&str>) -> Result<()> {
    let db = Database::open(&config.db_path(), &config.files_dir())?;
    let entries: Vec<_> = match pattern {
        Some(p) => db.find_matching(p),
        None => db.all().iter().collect(),
    };

    println!(
        "{:<20} {:<12} {:<44} {}",
        "Name", "Version", "Description", "Installed"
    );
    for entry in &entries {
        println!(
            "{:<20} {:<12} {:<44.44} {}",
            entry.name,
            entry.version,
            entry.description,
            format_time(entry.installed_at)
        );
    }
    println!("\nTotal: {} packages", entries.len());
    Ok(())
}

use anyhow::Result;

use kiln::config::Config;
use kiln::core::catalog::Catalog;
use kiln::store::db::Database;

use crate::cmd::{format_size, format_time};

pub fn run(config: &Config, package: &str) -> Result<()> {
    let catalog = Catalog::new(config);
    let def = catalog.load(package)?;
    let db = Database::open(&config.db_path(), &config.files_dir())?;

    println!("Package: {}", def.name);
    println!("Version: {}", def.version);
    if !def.description.is_empty() {
        println!("Description: {}", def.description);
    }
    if !def.maintainer.is_empty() {
        println!("Maintainer: {}", def.maintainer);
    }
    if !def.homepage.is_empty() {
        println!("Homepage: {}", def.homepage);
    }
    if !def.license.is_empty() {
        println!("License: {}", def.license);
    }
    if !def.category.is_empty() {
        println!("Category: {}", def.category);
    }
    println!("Source URL: {}", def.source_url);
    println!("Build System: {}", def.build_system);
    if let Some(size) = def.size_estimate {
        println!("Estimated Size: {}", format_size(size));
    }
    if let Some(secs) = def.build_time_estimate {
        println!("Build Time: {secs} seconds");
    }

    match db.find(package) {
        Some(entry) => {
            println!(
                "Status: installed (version {}, installed on {})",
                entry.version,
                format_time(entry.installed_at)
            );
            if entry.installed_size > 0 {
                println!("Installed Size: {}", format_size(entry.installed_size));
            }
        }
        None => println!("Status: not installed"),
    }

    for (label, values) in [
        ("Dependencies", &def.dependencies),
        ("Build Dependencies", &def.build_dependencies),
        ("Conflicts", &def.conflicts),
        ("Provides", &def.provides),
    ] {
        if !values.is_empty() {
            println!("{} ({}): {}", label, values.len(), values.join(", "));
        }
    }
    Ok(())
}

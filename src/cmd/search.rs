use anyhow::Result;

use kiln::config::Config;
use kiln::core::catalog::Catalog;

pub fn run(config: &Config, pattern: &str) -> Result<()> {
    let catalog = Catalog::new(config);
    let hits = catalog.search(pattern);

    if hits.is_empty() {
        println!("No packages match '{pattern}'");
        return Ok(());
    }
    for hit in hits {
        println!("{}/{} {}", hit.repository, hit.name, hit.version);
        if !hit.description.is_empty() {
            println!("    {}", hit.description);
        }
    }
    Ok(())
}

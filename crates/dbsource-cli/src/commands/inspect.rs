use std::path::Path;

use dbsource_core::{ConfigMap, DatabaseOptions};

use super::load;

const MASKED: &str = "***";

pub fn names(path: &Path) -> anyhow::Result<()> {
    let tree = load(path)?;
    for name in tree.database_names() {
        println!("{name}");
    }
    Ok(())
}

pub fn show(path: &Path, name: &str, format: &str) -> anyhow::Result<()> {
    let tree = load(path)?;
    let config = masked(tree.narrow(name));
    if config.is_empty() {
        anyhow::bail!("database '{name}' is not configured in {}", path.display());
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => {
            println!("[{name}]");
            for (key, value) in &config {
                println!("  {key} = {value}");
            }
            match DatabaseOptions::from_config(name, &config) {
                Ok(options) if options.data_source.is_some() => {
                    println!("  → shared data source, monitoring={}", options.monitoring);
                }
                Ok(options) => {
                    println!(
                        "  → pooled, max_connections_free={}, monitoring={}",
                        options.max_connections_free, options.monitoring
                    );
                }
                Err(e) => println!("  ✗ {e}"),
            }
        }
    }

    Ok(())
}

fn masked(mut config: ConfigMap) -> ConfigMap {
    if let Some(password) = config.get_mut("password") {
        *password = toml::Value::String(MASKED.to_string());
    }
    config
}

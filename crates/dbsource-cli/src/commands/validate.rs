use std::path::Path;

use dbsource_core::{ConfigTree, DatabaseOptions};
use tracing::info;

use super::load;

/// Outcome of checking one database.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Valid,
    /// No section for this name; only possible for `default`.
    Unconfigured,
    Invalid(String),
}

pub fn validate(path: &Path) -> anyhow::Result<()> {
    let tree = load(path)?;
    let verdicts = check(&tree);

    let mut failures = 0;
    for (name, verdict) in &verdicts {
        match verdict {
            Verdict::Valid => println!("✓ {name}"),
            Verdict::Unconfigured => println!("- {name}: not configured"),
            Verdict::Invalid(message) => {
                failures += 1;
                println!("✗ {name}: {message}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} database(s) have invalid configuration", verdicts.len());
    }
    info!(databases = verdicts.len(), config = %path.display(), "configuration is valid");
    Ok(())
}

fn check(tree: &ConfigTree) -> Vec<(String, Verdict)> {
    tree.database_names()
        .into_iter()
        .map(|name| {
            let config = tree.narrow(&name);
            let verdict = if config.is_empty() {
                Verdict::Unconfigured
            } else {
                match DatabaseOptions::from_config(&name, &config) {
                    Ok(_) => Verdict::Valid,
                    Err(e) => Verdict::Invalid(e.to_string()),
                }
            };
            (name, verdict)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_each_database() {
        let tree = ConfigTree::from_toml_str(
            r#"
[databases.reports]
url = "jdbc:test:reports"

[databases.broken]
url = "jdbc:test"
pool_size = 4
"#,
        )
        .unwrap();

        let verdicts = check(&tree);
        assert_eq!(verdicts[0], ("default".to_string(), Verdict::Unconfigured));
        let broken = verdicts.iter().find(|(name, _)| name == "broken").unwrap();
        assert!(matches!(&broken.1, Verdict::Invalid(m) if m.contains("broken.pool_size")));
        let reports = verdicts.iter().find(|(name, _)| name == "reports").unwrap();
        assert_eq!(reports.1, Verdict::Valid);
    }

    #[test]
    fn default_section_is_validated() {
        let tree = ConfigTree::from_toml_str("[database]\nurl = \"\"\n").unwrap();
        let verdicts = check(&tree);
        assert!(matches!(&verdicts[0].1, Verdict::Invalid(m) if m.contains("default.url")));
    }
}

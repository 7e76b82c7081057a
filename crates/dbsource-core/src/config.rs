//! Configuration tree and per-database narrowing.
//!
//! The tree is plain TOML. The default database lives under the singular
//! `[database]` table, every other database under `[databases.<name>]`:
//!
//! ```toml
//! [database]
//! url = "jdbc:test"
//! connect_on_startup = true
//!
//! [databases.reports]
//! data_source = "reports"
//! monitoring = false
//! ```
//!
//! Narrowing flattens one of those tables into a [`ConfigMap`]; the typed
//! [`DatabaseOptions`] view is parsed from it and rejects unknown keys.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectionSourceError, SourceResult};

/// Name of the database configured under the singular key.
pub const KEY_DEFAULT: &str = "default";
/// Table holding the default database's options.
pub const SINGLE_KEY: &str = "database";
/// Table holding one sub-table per additional database.
pub const PLURAL_KEY: &str = "databases";

/// Flattened options for one database.
pub type ConfigMap = toml::Table;

/// Every key [`DatabaseOptions`] understands.
pub const KNOWN_KEYS: &[&str] = &[
    "connect_on_startup",
    "data_source",
    "idle_timeout_ms",
    "max_connections_free",
    "monitoring",
    "password",
    "test_before_get",
    "test_on_create",
    "url",
    "username",
];

/// The host application's configuration tree.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    root: toml::Table,
}

impl ConfigTree {
    pub fn new(root: toml::Table) -> Self {
        Self { root }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(Self::new(toml::from_str(content)?))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.root.get(key)
    }

    /// Configured database names: the default first, then every entry of
    /// the plural table in table order.
    pub fn database_names(&self) -> Vec<String> {
        let mut names = vec![KEY_DEFAULT.to_string()];
        if let Some(toml::Value::Table(databases)) = self.get(PLURAL_KEY) {
            for name in databases.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Flatten the options of `name` into one map.
    ///
    /// Missing sections narrow to an empty map. An entry for `default` in
    /// the plural table is used when the singular table is absent.
    pub fn narrow(&self, name: &str) -> ConfigMap {
        let section = if name == KEY_DEFAULT && self.contains_key(SINGLE_KEY) {
            self.get(SINGLE_KEY)
        } else {
            self.get(PLURAL_KEY)
                .and_then(toml::Value::as_table)
                .and_then(|databases| databases.get(name))
        };

        match section {
            Some(toml::Value::Table(table)) => table.clone(),
            _ => ConfigMap::new(),
        }
    }
}

/// Typed, validated view of a narrowed [`ConfigMap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseOptions {
    /// Driver URL. Required unless `data_source` is set.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Name of a shared source registered with the data-source storage.
    #[serde(default)]
    pub data_source: Option<String>,
    /// Create the source when the application starts (default: false).
    #[serde(default)]
    pub connect_on_startup: bool,
    /// Register the source with the metrics sink (default: true).
    #[serde(default = "default_true")]
    pub monitoring: bool,
    /// Idle connections kept by the pool (default: 5).
    #[serde(default = "default_max_connections_free")]
    pub max_connections_free: usize,
    /// Connections idle longer than this are discarded instead of reused.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    /// Ping idle connections before handing them out (default: false).
    #[serde(default)]
    pub test_before_get: bool,
    /// Open one connection while creating the source (default: true).
    #[serde(default = "default_true")]
    pub test_on_create: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_connections_free() -> usize {
    5
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            data_source: None,
            connect_on_startup: false,
            monitoring: true,
            max_connections_free: default_max_connections_free(),
            idle_timeout_ms: None,
            test_before_get: false,
            test_on_create: true,
        }
    }
}

impl DatabaseOptions {
    /// Parse and validate the narrowed configuration of `database`.
    ///
    /// Errors name the database and the offending key.
    pub fn from_config(database: &str, config: &ConfigMap) -> SourceResult<Self> {
        for (key, value) in config {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(ConnectionSourceError::config(
                    database,
                    key,
                    "unknown configuration key",
                ));
            }
            let mut single = ConfigMap::new();
            single.insert(key.clone(), value.clone());
            if let Err(e) = toml::Value::Table(single).try_into::<DatabaseOptions>() {
                return Err(ConnectionSourceError::config(database, key, e.message()));
            }
        }

        let options: DatabaseOptions = toml::Value::Table(config.clone())
            .try_into()
            .map_err(|e: toml::de::Error| {
                ConnectionSourceError::config(database, "*", e.message())
            })?;
        options.validate(database)?;
        Ok(options)
    }

    fn validate(&self, database: &str) -> SourceResult<()> {
        match &self.data_source {
            Some(data_source) if data_source.trim().is_empty() => Err(
                ConnectionSourceError::config(database, "data_source", "must not be blank"),
            ),
            Some(_) => Ok(()),
            None if self.url.as_deref().is_none_or(|url| url.trim().is_empty()) => Err(
                ConnectionSourceError::config(database, "url", "must not be blank"),
            ),
            None => Ok(()),
        }
    }
}

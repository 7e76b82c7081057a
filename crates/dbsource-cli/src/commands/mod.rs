pub mod inspect;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use dbsource_core::ConfigTree;

fn load(path: &Path) -> anyhow::Result<ConfigTree> {
    ConfigTree::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

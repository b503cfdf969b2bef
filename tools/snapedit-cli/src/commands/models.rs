//! List bundled models.

use std::path::PathBuf;

use snapedit_common::config::AppConfig;
use snapedit_inference::{DirectoryModelStore, ModelStore};

pub fn run(config: &AppConfig, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let root = dir.unwrap_or_else(|| config.models_dir.clone());
    let store = DirectoryModelStore::new(&root);
    let ids = store.list()?;

    println!("Models in {}", root.display());
    if ids.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for id in ids {
        match store.manifest(&id) {
            Ok(manifest) => println!(
                "  {:<24} {:?} input {:?} -> output {:?}",
                manifest.id, manifest.kind, manifest.input_shape, manifest.output_shape
            ),
            Err(e) => println!("  {id:<24} [INVALID] {e}"),
        }
    }
    Ok(())
}

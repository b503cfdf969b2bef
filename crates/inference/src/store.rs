//! Read-only access to bundled model assets.

use std::path::{Path, PathBuf};

use snapedit_common::error::{SnapEditError, SnapEditResult};

use crate::manifest::ModelManifest;

const MANIFEST_FILE: &str = "manifest.json";

/// Where model manifests and weights come from.
pub trait ModelStore: Send + Sync {
    /// Manifest for `model_id`.
    fn manifest(&self, model_id: &str) -> SnapEditResult<ModelManifest>;

    /// Absolute path of the weights file described by `manifest`.
    fn model_path(&self, manifest: &ModelManifest) -> PathBuf;

    /// All model ids available in the store.
    fn list(&self) -> SnapEditResult<Vec<String>>;
}

/// Directory layout: `<root>/<model_id>/manifest.json` plus the weights file.
#[derive(Debug, Clone)]
pub struct DirectoryModelStore {
    root: PathBuf,
}

impl DirectoryModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, model_id: &str) -> SnapEditResult<PathBuf> {
        let valid = !model_id.is_empty()
            && model_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !model_id.starts_with('.');
        if !valid {
            return Err(SnapEditError::model_load(format!(
                "invalid model id: {model_id:?}"
            )));
        }
        Ok(self.root.join(model_id))
    }
}

impl ModelStore for DirectoryModelStore {
    fn manifest(&self, model_id: &str) -> SnapEditResult<ModelManifest> {
        let path = self.model_dir(model_id)?.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SnapEditError::model_load(format!(
                "Failed to read manifest {}: {e}",
                path.display()
            ))
        })?;
        let manifest: ModelManifest = serde_json::from_str(&content).map_err(|e| {
            SnapEditError::model_load(format!(
                "Failed to parse manifest {}: {e}",
                path.display()
            ))
        })?;
        if manifest.id != model_id {
            return Err(SnapEditError::model_load(format!(
                "manifest at {} declares id {:?}",
                path.display(),
                manifest.id
            )));
        }
        manifest.validate()?;
        Ok(manifest)
    }

    fn model_path(&self, manifest: &ModelManifest) -> PathBuf {
        self.root.join(&manifest.id).join(&manifest.file)
    }

    fn list(&self) -> SnapEditResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(MANIFEST_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::segmentation_manifest;

    fn write_manifest(root: &Path, manifest: &ModelManifest) {
        let dir = root.join(&manifest.id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(manifest).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_reads_and_lists_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &segmentation_manifest("selfie", 16));
        write_manifest(dir.path(), &segmentation_manifest("hair", 16));
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let store = DirectoryModelStore::new(dir.path());
        assert_eq!(store.list().unwrap(), vec!["hair", "selfie"]);

        let manifest = store.manifest("selfie").unwrap();
        assert_eq!(manifest.input_size(), (16, 16));
        assert_eq!(
            store.model_path(&manifest),
            dir.path().join("selfie").join("model.onnx")
        );
    }

    #[test]
    fn test_missing_manifest_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryModelStore::new(dir.path());
        let err = store.manifest("nope").unwrap_err();
        assert_eq!(err.kind(), snapedit_common::ErrorKind::ModelLoadError);
    }

    #[test]
    fn test_rejects_path_traversal_ids() {
        let store = DirectoryModelStore::new("/models");
        assert!(store.manifest("../etc").is_err());
        assert!(store.manifest("a/b").is_err());
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = segmentation_manifest("selfie", 16);
        write_manifest(dir.path(), &manifest);
        manifest.id = "other".to_string();
        std::fs::write(
            dir.path().join("selfie").join(MANIFEST_FILE),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
        let store = DirectoryModelStore::new(dir.path());
        assert!(store.manifest("selfie").is_err());
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let store = DirectoryModelStore::new("/definitely/not/here");
        assert!(store.list().unwrap().is_empty());
    }
}

//! Registry behaviour across tasks, with manifests on disk.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::{ArrayD, ArrayView4, IxDyn};
use snapedit_common::error::SnapEditResult;
use snapedit_inference::{
    DirectoryModelStore, InferenceEngine, ModelBackend, ModelManifest, ModelRegistry, ModelSession,
    ModelStore,
};
use snapedit_media_model::Frame;

const MANIFEST: &str = r#"{
    "id": "portrait",
    "file": "portrait.onnx",
    "kind": "segmentation",
    "input_shape": [1, 3, 8, 8],
    "output_shape": [1, 1, 8, 8]
}"#;

struct HalfSession;

impl ModelSession for HalfSession {
    fn run(&self, _input: ArrayView4<'_, f32>) -> SnapEditResult<ArrayD<f32>> {
        Ok(ArrayD::from_elem(IxDyn(&[1, 1, 8, 8]), 0.75))
    }
}

#[derive(Default)]
struct CountingBackend {
    loads: AtomicUsize,
}

impl ModelBackend for CountingBackend {
    fn load(
        &self,
        manifest: &ModelManifest,
        model_path: &Path,
    ) -> SnapEditResult<Arc<dyn ModelSession>> {
        assert!(model_path.ends_with("portrait/portrait.onnx"));
        assert_eq!(manifest.id, "portrait");
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        Ok(Arc::new(HalfSession))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn setup() -> (tempfile::TempDir, ModelRegistry, Arc<CountingBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("portrait");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("manifest.json"), MANIFEST).unwrap();

    let backend = Arc::new(CountingBackend::default());
    let store = Arc::new(DirectoryModelStore::new(dir.path()));
    assert_eq!(store.list().unwrap(), vec!["portrait"]);
    let registry = ModelRegistry::new(store, backend.clone());
    (dir, registry, backend)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_jobs_share_one_load() {
    let (_dir, registry, backend) = setup();

    let first = tokio::spawn({
        let registry = registry.clone();
        async move { registry.acquire("portrait").await }
    });
    let second = tokio::spawn({
        let registry = registry.clone();
        async move { registry.acquire("portrait").await }
    });
    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();

    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert_eq!(registry.ref_count("portrait"), 2);
    assert_eq!(registry.loaded_models(), vec!["portrait"]);

    registry.release(a);
    assert_eq!(registry.ref_count("portrait"), 1);
    registry.release(b);
    assert_eq!(registry.ref_count("portrait"), 0);
    assert!(registry.loaded_models().is_empty());
}

#[tokio::test]
async fn test_engine_runs_against_loaded_model() {
    let (_dir, registry, _) = setup();
    let model = registry.acquire("portrait").await.unwrap();
    let engine = InferenceEngine::new(Duration::from_secs(1), 0);

    let frame = Frame::filled(3, 0, 16, 12, [200, 100, 50, 255]);
    let result = engine.infer(&frame, &model).await.unwrap();
    let mask = result.output.as_ref().and_then(|o| o.as_mask()).unwrap();
    assert_eq!((mask.width, mask.height), (16, 12));
    assert!((result.confidence - 0.5).abs() < 1e-5);
}

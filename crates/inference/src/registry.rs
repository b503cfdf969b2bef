//! Lazily loaded, reference-counted models shared across jobs.
//!
//! Each model id owns a slot with a `tokio::sync::OnceCell`, so concurrent
//! first acquires of the same id wait on a single backend load. Reference
//! counts live under one mutex; the slot is dropped (and the model unloaded)
//! when the last [`LoadedModel`] handle goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use snapedit_common::error::{SnapEditError, SnapEditResult};
use tokio::sync::OnceCell;

use crate::backend::{ModelBackend, ModelSession};
use crate::manifest::ModelManifest;
use crate::store::ModelStore;

struct ModelInstance {
    manifest: ModelManifest,
    session: Arc<dyn ModelSession>,
    live: AtomicBool,
}

struct ModelSlot {
    id: String,
    cell: OnceCell<Arc<ModelInstance>>,
}

struct Entry {
    slot: Arc<ModelSlot>,
    refs: usize,
}

struct RegistryInner {
    store: Arc<dyn ModelStore>,
    backend: Arc<dyn ModelBackend>,
    slots: Mutex<HashMap<String, Entry>>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release_slot(&self, slot: &Arc<ModelSlot>) {
        let mut slots = self.lock();
        let Some(entry) = slots.get_mut(&slot.id) else {
            return;
        };
        // A slot replaced after unload_all() is not ours to decrement.
        if !Arc::ptr_eq(&entry.slot, slot) {
            return;
        }
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = slots.remove(&slot.id) {
                if let Some(instance) = entry.slot.cell.get() {
                    instance.live.store(false, Ordering::SeqCst);
                    tracing::info!(model_id = %slot.id, "Model unloaded");
                }
            }
        }
    }
}

/// Undoes the reference taken by `acquire` if loading fails or the
/// acquiring future is dropped.
struct PendingRef<'a> {
    inner: &'a RegistryInner,
    slot: Option<Arc<ModelSlot>>,
}

impl PendingRef<'_> {
    fn disarm(mut self) {
        self.slot = None;
    }
}

impl Drop for PendingRef<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.inner.release_slot(&slot);
        }
    }
}

/// Shared model registry. Cheap to clone.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ModelStore>, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                backend,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.inner.store
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Get a handle to `model_id`, loading it on first use.
    pub async fn acquire(&self, model_id: &str) -> SnapEditResult<LoadedModel> {
        let slot = {
            let mut slots = self.inner.lock();
            let entry = slots.entry(model_id.to_string()).or_insert_with(|| Entry {
                slot: Arc::new(ModelSlot {
                    id: model_id.to_string(),
                    cell: OnceCell::new(),
                }),
                refs: 0,
            });
            entry.refs += 1;
            entry.slot.clone()
        };
        let pending = PendingRef {
            inner: &self.inner,
            slot: Some(slot.clone()),
        };

        let instance = slot
            .cell
            .get_or_try_init(|| self.load(model_id))
            .await?
            .clone();
        pending.disarm();

        Ok(LoadedModel {
            instance,
            slot,
            registry: Arc::downgrade(&self.inner),
        })
    }

    async fn load(&self, model_id: &str) -> SnapEditResult<Arc<ModelInstance>> {
        let store = self.inner.store.clone();
        let backend = self.inner.backend.clone();
        let id = model_id.to_string();

        let (manifest, session) = tokio::task::spawn_blocking(move || {
            let manifest = store.manifest(&id)?;
            let path = store.model_path(&manifest);
            let session = backend.load(&manifest, &path)?;
            Ok::<_, SnapEditError>((manifest, session))
        })
        .await
        .map_err(|e| SnapEditError::model_load(format!("model load task failed: {e}")))??;

        tracing::info!(
            model_id = %manifest.id,
            backend = self.inner.backend.name(),
            kind = ?manifest.kind,
            "Model loaded"
        );
        Ok(Arc::new(ModelInstance {
            manifest,
            session,
            live: AtomicBool::new(true),
        }))
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release(&self, model: LoadedModel) {
        drop(model);
    }

    /// Outstanding handles (including in-progress acquires) for `model_id`.
    pub fn ref_count(&self, model_id: &str) -> usize {
        self.inner.lock().get(model_id).map_or(0, |e| e.refs)
    }

    /// Ids whose weights are currently resident.
    pub fn loaded_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .iter()
            .filter(|(_, e)| e.slot.cell.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop every model. Outstanding handles report `ModelNotLoaded`.
    pub fn unload_all(&self) {
        let drained: Vec<Entry> = self.inner.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            if let Some(instance) = entry.slot.cell.get() {
                instance.live.store(false, Ordering::SeqCst);
                tracing::info!(model_id = %entry.slot.id, refs = entry.refs, "Model unloaded");
            }
        }
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("backend", &self.inner.backend.name())
            .field("loaded", &self.loaded_models())
            .finish()
    }
}

/// Handle to a loaded model. Dropping it releases the reference.
pub struct LoadedModel {
    instance: Arc<ModelInstance>,
    slot: Arc<ModelSlot>,
    registry: Weak<RegistryInner>,
}

impl LoadedModel {
    pub fn id(&self) -> &str {
        &self.instance.manifest.id
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.instance.manifest
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.instance.manifest.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.instance.manifest.output_shape
    }

    pub fn is_live(&self) -> bool {
        self.instance.live.load(Ordering::SeqCst) && self.registry.strong_count() > 0
    }

    /// Session for invoking the model, unless the registry no longer owns it.
    pub fn session(&self) -> SnapEditResult<Arc<dyn ModelSession>> {
        if !self.is_live() {
            return Err(SnapEditError::ModelNotLoaded {
                model_id: self.id().to_string(),
            });
        }
        Ok(self.instance.session.clone())
    }
}

impl Drop for LoadedModel {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.release_slot(&self.slot);
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.id())
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::segmentation_manifest;
    use ndarray::{ArrayD, ArrayView4, IxDyn};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct OneModelStore;

    impl ModelStore for OneModelStore {
        fn manifest(&self, model_id: &str) -> SnapEditResult<ModelManifest> {
            if model_id == "selfie" {
                Ok(segmentation_manifest("selfie", 4))
            } else {
                Err(SnapEditError::model_load(format!("unknown model {model_id}")))
            }
        }

        fn model_path(&self, manifest: &ModelManifest) -> PathBuf {
            PathBuf::from("/models").join(&manifest.file)
        }

        fn list(&self) -> SnapEditResult<Vec<String>> {
            Ok(vec!["selfie".to_string()])
        }
    }

    struct ZeroSession;

    impl ModelSession for ZeroSession {
        fn run(&self, _input: ArrayView4<'_, f32>) -> SnapEditResult<ArrayD<f32>> {
            Ok(ArrayD::zeros(IxDyn(&[1, 4, 4])))
        }
    }

    #[derive(Default)]
    struct SlowBackend {
        loads: AtomicUsize,
    }

    impl ModelBackend for SlowBackend {
        fn load(
            &self,
            _manifest: &ModelManifest,
            _model_path: &Path,
        ) -> SnapEditResult<Arc<dyn ModelSession>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(ZeroSession))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn registry() -> (ModelRegistry, Arc<SlowBackend>) {
        let backend = Arc::new(SlowBackend::default());
        (
            ModelRegistry::new(Arc::new(OneModelStore), backend.clone()),
            backend,
        )
    }

    #[tokio::test]
    async fn test_acquire_release_unloads_at_zero() {
        let (registry, backend) = registry();
        let model = registry.acquire("selfie").await.unwrap();
        assert_eq!(registry.ref_count("selfie"), 1);
        assert_eq!(registry.loaded_models(), vec!["selfie"]);
        assert_eq!(model.input_shape(), &[1, 3, 4, 4]);

        registry.release(model);
        assert_eq!(registry.ref_count("selfie"), 0);
        assert!(registry.loaded_models().is_empty());

        let _again = registry.acquire("selfie").await.unwrap();
        assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_acquire_loads_once() {
        let (registry, backend) = registry();
        let (a, b) = tokio::join!(registry.acquire("selfie"), registry.acquire("selfie"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.ref_count("selfie"), 2);

        drop(a);
        assert_eq!(registry.ref_count("selfie"), 1);
        assert!(b.session().is_ok());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_no_reference() {
        let (registry, _) = registry();
        let err = registry.acquire("missing").await.unwrap_err();
        assert_eq!(err.kind(), snapedit_common::ErrorKind::ModelLoadError);
        assert_eq!(registry.ref_count("missing"), 0);
    }

    #[tokio::test]
    async fn test_unload_all_invalidates_handles() {
        let (registry, _) = registry();
        let model = registry.acquire("selfie").await.unwrap();
        registry.unload_all();
        let err = model.session().err().expect("expected session() to fail");
        assert_eq!(err.kind(), snapedit_common::ErrorKind::ModelNotLoaded);

        // Dropping the stale handle must not disturb a fresh slot.
        let fresh = registry.acquire("selfie").await.unwrap();
        drop(model);
        assert_eq!(registry.ref_count("selfie"), 1);
        assert!(fresh.session().is_ok());
    }

    #[tokio::test]
    async fn test_handle_outliving_registry_is_not_loaded() {
        let (registry, _) = registry();
        let model = registry.acquire("selfie").await.unwrap();
        drop(registry);
        assert!(!model.is_live());
        assert!(model.session().is_err());
    }
}

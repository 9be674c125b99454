//! Filter parameter store
//!
//! Holds the current filter record and writes the whole record through to
//! storage on every change. A corrupt or missing record is replaced by the
//! defaults and persisted straight away.

use super::{FilterField, FilterParameters};
use crate::error::Result;
use crate::storage::KeyValueStore;
use parking_lot::RwLock;
use std::sync::Arc;

/// Storage key of the filter record
pub const FILTERS_KEY: &str = "filters";

/// Filter record backed by a key-value store
pub struct FilterStore {
    storage: Box<dyn KeyValueStore>,
    current: FilterParameters,
}

impl FilterStore {
    /// Open the store and load (repairing if needed) the persisted record
    pub fn open(storage: impl KeyValueStore + 'static) -> Result<Self> {
        let mut store = Self {
            storage: Box::new(storage),
            current: FilterParameters::DEFAULT,
        };
        store.load()?;
        Ok(store)
    }

    /// Re-read the persisted record, substituting defaults where needed
    ///
    /// The normalised record is written back, so loading twice yields the
    /// same stored text.
    pub fn load(&mut self) -> Result<FilterParameters> {
        let params = match self.storage.get(FILTERS_KEY)? {
            Some(raw) => {
                let (params, repaired) = FilterParameters::from_json_lenient(&raw);
                if repaired {
                    tracing::warn!(stored = %raw, "Stored filters were invalid, repaired with defaults");
                }
                params
            }
            None => {
                tracing::info!("No stored filters, using defaults");
                FilterParameters::DEFAULT
            }
        };

        self.persist(&params)?;
        self.current = params;
        Ok(params)
    }

    /// Set one field and persist the full record
    ///
    /// On a storage failure the in-memory record is left unchanged.
    pub fn update(&mut self, field: FilterField, value: f64) -> Result<FilterParameters> {
        let next = self.current.with(field, value)?;
        self.persist(&next)?;
        self.current = next;
        tracing::debug!(%field, value, "Filter updated");
        Ok(next)
    }

    /// Set one field from raw control input such as `"1.5"`
    pub fn update_from_str(&mut self, field: FilterField, raw: &str) -> Result<FilterParameters> {
        let value = field.parse_value(raw)?;
        self.update(field, value)
    }

    /// Restore and persist the default record
    pub fn reset(&mut self) -> Result<FilterParameters> {
        self.persist(&FilterParameters::DEFAULT)?;
        self.current = FilterParameters::DEFAULT;
        Ok(self.current)
    }

    /// Snapshot of the current record
    pub fn current(&self) -> FilterParameters {
        self.current
    }

    fn persist(&self, params: &FilterParameters) -> Result<()> {
        let json = serde_json::to_string(params)?;
        self.storage.set(FILTERS_KEY, &json)
    }
}

/// Shared handle to a `FilterStore`
///
/// Input controls call `update`; the renderer calls `current` once per frame.
#[derive(Clone)]
pub struct FilterController {
    inner: Arc<RwLock<FilterStore>>,
}

impl FilterController {
    pub fn new(store: FilterStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Open a store on `storage` and wrap it
    pub fn open(storage: impl KeyValueStore + 'static) -> Result<Self> {
        Ok(Self::new(FilterStore::open(storage)?))
    }

    pub fn current(&self) -> FilterParameters {
        self.inner.read().current()
    }

    pub fn update(&self, field: FilterField, value: f64) -> Result<FilterParameters> {
        self.inner.write().update(field, value)
    }

    pub fn update_from_str(&self, field: FilterField, raw: &str) -> Result<FilterParameters> {
        self.inner.write().update_from_str(field, raw)
    }

    pub fn reset(&self) -> Result<FilterParameters> {
        self.inner.write().reset()
    }

    pub fn reload(&self) -> Result<FilterParameters> {
        self.inner.write().load()
    }
}

impl std::fmt::Debug for FilterController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterController")
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::{FileStore, MemoryStore};

    /// Store whose writes can be switched off
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Storage("read-only".into()));
            }
            self.inner.set(key, value)
        }
    }

    fn stored(storage: &Arc<MemoryStore>) -> FilterParameters {
        let raw = storage.get(FILTERS_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_first_run_persists_defaults() {
        let storage = Arc::new(MemoryStore::new());
        let store = FilterStore::open(storage.clone()).unwrap();
        assert_eq!(store.current(), FilterParameters::DEFAULT);
        assert_eq!(stored(&storage), FilterParameters::DEFAULT);
    }

    #[test]
    fn test_corrupt_record_is_repaired_idempotently() {
        let storage = Arc::new(MemoryStore::with_value(FILTERS_KEY, "{{garbage"));
        let mut store = FilterStore::open(storage.clone()).unwrap();
        assert_eq!(store.current(), FilterParameters::DEFAULT);

        let first = storage.get(FILTERS_KEY).unwrap();
        assert_eq!(store.load().unwrap(), FilterParameters::DEFAULT);
        assert_eq!(storage.get(FILTERS_KEY).unwrap(), first);
    }

    #[test]
    fn test_update_from_string_persists_number() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = FilterStore::open(storage.clone()).unwrap();
        store
            .update_from_str(FilterField::Brightness, "1.5")
            .unwrap();

        let raw = storage.get(FILTERS_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["brightness"], serde_json::json!(1.5));

        let reopened = FilterStore::open(storage.clone()).unwrap();
        assert_eq!(reopened.current().brightness, 1.5);
        assert_eq!(reopened.current().grayscale, FilterParameters::DEFAULT.grayscale);
        assert_eq!(reopened.current().blur, FilterParameters::DEFAULT.blur);
        assert_eq!(reopened.current().contrast, FilterParameters::DEFAULT.contrast);
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = FilterStore::open(storage.clone()).unwrap();
        assert!(store.update_from_str(FilterField::Blur, "wide").is_err());
        assert!(store.update(FilterField::Grayscale, 140.0).is_err());
        assert_eq!(store.current(), FilterParameters::DEFAULT);
        assert_eq!(stored(&storage), FilterParameters::DEFAULT);
    }

    #[test]
    fn test_failed_write_leaves_record_unchanged() {
        let storage = Arc::new(FlakyStore::default());
        let mut store = FilterStore::open(storage.clone()).unwrap();
        storage
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(store.update(FilterField::Contrast, 2.0).is_err());
        assert_eq!(store.current().contrast, FilterParameters::DEFAULT.contrast);
    }

    #[test]
    fn test_controller_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let controller = FilterController::open(FileStore::open(dir.path()).unwrap()).unwrap();
        controller.update(FilterField::Grayscale, 25.0).unwrap();
        controller.update(FilterField::Blur, 0.0).unwrap();

        let reopened = FilterController::open(FileStore::open(dir.path()).unwrap()).unwrap();
        assert_eq!(reopened.current().grayscale, 25.0);
        assert_eq!(reopened.current().blur, 0.0);

        assert_eq!(reopened.reset().unwrap(), FilterParameters::DEFAULT);
        assert_eq!(controller.reload().unwrap(), FilterParameters::DEFAULT);
    }
}

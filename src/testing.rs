//! Testing utilities for retype
//!
//! Provides a `TestStore` wrapper around a sled store in a temporary
//! directory, a `CountingStore` that records every write, and a sample type
//! catalog with an engine wired on top of it.
//!
//! Only available when compiled with `cfg(test)`.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::conversion::ConversionPathResolver;
use crate::engine::{BulkTypeOperationEngine, EngineParts, Mutator};
use crate::progress::ProgressTracker;
use crate::registry::{Catalog, TypeRegistry};
use crate::rollback::RollbackManager;
use crate::store::{DurableStore, Element, ElementRepository, SledStore, StoreError};

/// Sled store living in a temporary directory, removed on drop
pub struct TestStore {
    // Field order matters: the store must close before the directory goes away
    store: Arc<SledStore>,
    dir: TempDir,
}

impl TestStore {
    /// # Panics
    /// Panics if the directory or the store cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let store = SledStore::open(dir.path().join("store")).expect("Failed to open test store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<SledStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Store wrapper counting writes and deletes
pub struct CountingStore {
    inner: Arc<dyn DurableStore>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    written: Mutex<Vec<String>>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn DurableStore>) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of writes whose key starts with `prefix`
    pub fn puts_with_prefix(&self, prefix: &str) -> usize {
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter(|key| key.starts_with(prefix))
            .count()
    }
}

impl DurableStore for CountingStore {
    fn put(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.written.lock().unwrap().push(key.to_string());
        self.inner.put(key, blob)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix)
    }
}

/// Types and rules shared by engine tests
pub const SAMPLE_CATALOG: &str = r#"
[[types]]
id = "block"

[[types]]
id = "text"
parent = "block"

[[types]]
id = "title"
parent = "text"

[[types]]
id = "quote"

[[types]]
id = "code"

[[types]]
id = "image"

[[rules]]
from_type = "text"
to_type = "title"
cost = 0.5
warnings = ["titles are limited to one line"]

[rules.data_mapping]
body = "heading"

[[rules]]
from_type = "quote"
to_type = "text"
cost = 1.0

[rules.data_mapping]
author = ""

[[rules]]
from_type = "text"
to_type = "code"
cost = 1.5
"#;

/// Engine over a sample catalog, with elements stored in a temporary store
pub struct EngineHarness {
    pub engine: BulkTypeOperationEngine,
    pub registry: Arc<dyn TypeRegistry>,
    pub resolver: Arc<ConversionPathResolver>,
    pub store: Arc<dyn DurableStore>,
    pub elements: Arc<ElementRepository>,
    pub counting: Arc<CountingStore>,
    pub test_store: TestStore,
}

impl EngineHarness {
    /// # Panics
    /// Panics if the sample catalog or the store cannot be set up.
    #[must_use]
    pub fn new() -> Self {
        let test_store = TestStore::new();
        let counting = Arc::new(CountingStore::new(test_store.store()));
        let store: Arc<dyn DurableStore> = counting.clone();

        let catalog = Catalog::from_toml(SAMPLE_CATALOG).expect("Invalid sample catalog");
        let registry: Arc<dyn TypeRegistry> =
            Arc::new(catalog.registry().expect("Invalid sample registry"));
        let resolver = Arc::new(ConversionPathResolver::new(Arc::clone(&registry)));
        resolver
            .register_rules(catalog.rules.clone())
            .expect("Invalid sample rules");

        let elements = Arc::new(ElementRepository::new(Arc::clone(&store)));
        let rollbacks = Arc::new(
            RollbackManager::open(Arc::clone(&store), elements.clone())
                .expect("Failed to open rollback manager"),
        );

        let engine = BulkTypeOperationEngine::new(EngineParts {
            registry: Arc::clone(&registry),
            resolver: Arc::clone(&resolver),
            elements: elements.clone(),
            mutator: elements.clone(),
            rollbacks,
            progress: Arc::new(ProgressTracker::new()),
            store: Arc::clone(&store),
        });

        Self {
            engine,
            registry,
            resolver,
            store,
            elements,
            counting,
            test_store,
        }
    }

    /// A second engine sharing this harness's state but converting through `mutator`
    #[must_use]
    pub fn engine_with(&self, mutator: Arc<dyn Mutator>) -> BulkTypeOperationEngine {
        BulkTypeOperationEngine::new(EngineParts {
            registry: Arc::clone(&self.registry),
            resolver: Arc::clone(&self.resolver),
            elements: self.elements.clone(),
            mutator,
            rollbacks: Arc::clone(self.engine.rollbacks()),
            progress: Arc::clone(self.engine.progress()),
            store: Arc::clone(&self.store),
        })
    }

    /// Store `count` elements of `type_id` with ids `<prefix>-<n>` and return the ids
    ///
    /// # Panics
    /// Panics if an element cannot be written.
    pub fn seed(&self, prefix: &str, type_id: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|n| {
                let element = Element::new(format!("{prefix}-{n}"), type_id)
                    .with_property("body", format!("content {n}").as_str());
                self.elements.insert(&element).expect("Failed to seed element");
                element.id
            })
            .collect()
    }

    /// # Panics
    /// Panics if the element is missing or cannot be read.
    pub fn element(&self, id: &str) -> Element {
        self.elements
            .get(id)
            .expect("Failed to read element")
            .expect("Element missing")
    }
}

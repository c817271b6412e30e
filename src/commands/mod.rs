//! Command implementations
//!
//! Each command is a module with an execute function that takes parsed CLI args
//! and runs against a [`Context`] holding the opened store, catalog and engine.

use std::path::Path;
use std::sync::Arc;

use crate::config::RetypeConfig;
use crate::conversion::ConversionPathResolver;
use crate::engine::{BulkTypeOperationEngine, EngineParts};
use crate::progress::ProgressTracker;
use crate::registry::{Catalog, TypeRegistry};
use crate::rollback::RollbackManager;
use crate::store::{DurableStore, ElementRepository, SledStore};
use crate::RetypeError;

pub mod catalog;
pub mod convert;
pub mod import;
pub mod rollback;
pub mod status;

pub use catalog::{resolve, types};
pub use convert::execute as convert;
pub use import::execute as import;
pub use rollback::{cleanup as rollback_cleanup, execute as rollback, list as rollback_list};
pub use status::execute as status;

type Result<T> = std::result::Result<T, RetypeError>;

/// Everything a command runs against
pub struct Context {
    pub config: RetypeConfig,
    pub catalog: Catalog,
    pub registry: Arc<dyn TypeRegistry>,
    pub elements: Arc<ElementRepository>,
    pub engine: BulkTypeOperationEngine,
    pub quiet: bool,
}

impl Context {
    /// Open the sled store at `store_path` and load the catalog, if any
    ///
    /// # Errors
    ///
    /// Returns `RetypeError` if the store cannot be opened or the catalog is invalid.
    pub fn open(
        config: RetypeConfig,
        store_path: &Path,
        catalog_path: Option<&Path>,
        quiet: bool,
    ) -> Result<Self> {
        let store: Arc<dyn DurableStore> = Arc::new(SledStore::open(store_path)?);
        let catalog = match catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::default(),
        };
        Self::with_store(config, store, catalog, quiet)
    }

    /// Build the engine on top of an already opened store
    ///
    /// # Errors
    ///
    /// Returns `RetypeError` if the catalog is invalid or rollback records cannot be loaded.
    pub fn with_store(
        config: RetypeConfig,
        store: Arc<dyn DurableStore>,
        catalog: Catalog,
        quiet: bool,
    ) -> Result<Self> {
        let registry: Arc<dyn TypeRegistry> = Arc::new(catalog.registry()?);
        let resolver = Arc::new(ConversionPathResolver::new(Arc::clone(&registry)));
        resolver.register_rules(catalog.rules.clone())?;

        let elements = Arc::new(ElementRepository::new(Arc::clone(&store)));
        let rollbacks = Arc::new(
            RollbackManager::open(Arc::clone(&store), elements.clone())?
                .with_default_ttl(config.rollback.ttl()),
        );

        let engine = BulkTypeOperationEngine::new(EngineParts {
            registry: Arc::clone(&registry),
            resolver,
            elements: elements.clone(),
            mutator: elements.clone(),
            rollbacks,
            progress: Arc::new(ProgressTracker::new()),
            store,
        });

        tracing::debug!(
            types = catalog.types.len(),
            rules = catalog.rules.len(),
            "Context ready"
        );

        Ok(Self {
            config,
            catalog,
            registry,
            elements,
            engine,
            quiet,
        })
    }
}

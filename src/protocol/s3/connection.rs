//! Connection lifecycle: one shared, lazily restored connection to the store
//!
//! Every store operation goes through [`ConnectionManager::current`], which
//! either hands out the active [`Connection`] or fails with
//! [`S3Error::NotConnected`] before any request is made.

use super::config::ConnectionParams;
use super::error::{S3Error, S3Result};
use super::operations::ObjectStore;
use super::types::ListRequest;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Builds an object store from connection parameters
pub trait StoreFactory: Send + Sync {
    /// Build a store; must not perform network I/O
    fn build(&self, params: &ConnectionParams) -> S3Result<Arc<dyn ObjectStore>>;
}

/// Persistence of the last successfully used connection parameters
pub trait ParamsStore: Send + Sync {
    /// Load saved parameters, if any
    fn load(&self) -> S3Result<Option<ConnectionParams>>;

    /// Save parameters for later sessions
    fn save(&self, params: &ConnectionParams) -> S3Result<()>;

    /// Forget saved parameters
    fn forget(&self) -> S3Result<()>;
}

/// JSON file holding the last connection parameters
#[derive(Debug, Clone)]
pub struct FileParamsStore {
    path: PathBuf,
}

impl FileParamsStore {
    /// File name used inside the config directory
    pub const FILE_NAME: &'static str = "connection.json";

    /// Store parameters at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/clouddeck/connection.json`
    pub fn default_location() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clouddeck").join(Self::FILE_NAME))
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParamsStore for FileParamsStore {
    fn load(&self) -> S3Result<Option<ConnectionParams>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            S3Error::InvalidConfig(format!(
                "Corrupt connection file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, params: &ConnectionParams) -> S3Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(params)
            .map_err(|e| S3Error::InvalidConfig(format!("Cannot serialize params: {}", e)))?;
        write_private(&self.path, contents.as_bytes())?;
        debug!(path = %self.path.display(), "Saved connection parameters");
        Ok(())
    }

    fn forget(&self) -> S3Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `contents` readable by the owner only, since the file holds the secret key
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let mut file = options.open(path)?;
        // mode() only applies on creation
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(contents)?;
        file.sync_all()
    }
    #[cfg(not(unix))]
    {
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }
}

/// Live handle to a configured bucket
pub struct Connection {
    params: ConnectionParams,
    store: Arc<dyn ObjectStore>,
    closed: AtomicBool,
}

impl Connection {
    fn new(params: ConnectionParams, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            params,
            store,
            closed: AtomicBool::new(false),
        }
    }

    /// Parameters this connection was built from
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.params.bucket
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Whether `clear()` has torn this connection down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail with a retryable error once the connection has been cleared.
    ///
    /// In-flight transfers call this before every I/O step.
    pub fn ensure_open(&self) -> S3Result<()> {
        if self.is_closed() {
            Err(S3Error::network("connection was closed"))
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("params", &self.params)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owner of the single active connection
pub struct ConnectionManager {
    slot: RwLock<Option<Arc<Connection>>>,
    factory: Arc<dyn StoreFactory>,
    persisted: Arc<dyn ParamsStore>,
}

impl ConnectionManager {
    /// Create a manager with no active connection
    pub fn new(factory: Arc<dyn StoreFactory>, persisted: Arc<dyn ParamsStore>) -> Self {
        Self {
            slot: RwLock::new(None),
            factory,
            persisted,
        }
    }

    /// Build and install a connection, replacing any active one.
    ///
    /// Parameters are validated before the store is built.
    pub fn initialize(&self, params: ConnectionParams) -> S3Result<Arc<Connection>> {
        let connection = self.build(params)?;

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(Arc::clone(&connection)) {
            previous.close();
        }

        info!(bucket = %connection.bucket(), "Connection initialized");
        Ok(connection)
    }

    /// Return the active connection, restoring it once from saved parameters.
    pub fn current(&self) -> S3Result<Arc<Connection>> {
        if let Some(connection) = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(connection));
        }

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have restored it while we waited
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }

        let params = match self.persisted.load() {
            Ok(Some(params)) => params,
            Ok(None) => {
                return Err(S3Error::NotConnected(
                    "no active connection; connect to a bucket first".to_string(),
                ))
            }
            Err(e) => {
                return Err(S3Error::NotConnected(format!(
                    "cannot load saved connection: {}",
                    e
                )))
            }
        };

        let connection = self.build(params).map_err(|e| {
            S3Error::NotConnected(format!("saved connection is unusable: {}", e))
        })?;

        debug!(bucket = %connection.bucket(), "Connection restored from saved parameters");
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Drop the active connection. Idempotent.
    pub fn clear(&self) {
        let previous = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(connection) = previous {
            connection.close();
            info!(bucket = %connection.bucket(), "Connection cleared");
        }
    }

    /// Whether a connection is active
    pub fn is_connected(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Check that `params` reach a readable bucket, without touching the active slot
    pub async fn probe(&self, params: &ConnectionParams) -> S3Result<()> {
        params.validate()?;
        let store = self.factory.build(params)?;

        store.head_bucket(&params.bucket).await?;
        store
            .list_objects(&ListRequest {
                bucket: params.bucket.clone(),
                prefix: String::new(),
                delimiter: None,
                cursor: None,
                max_keys: 1,
            })
            .await?;

        debug!(bucket = %params.bucket, "Connection probe succeeded");
        Ok(())
    }

    /// Probe, install and persist a connection
    pub async fn connect(&self, params: ConnectionParams) -> S3Result<Arc<Connection>> {
        self.probe(&params).await?;
        let connection = self.initialize(params)?;

        if let Err(e) = self.persisted.save(connection.params()) {
            warn!(error = %e, "Could not save connection parameters");
        }
        Ok(connection)
    }

    /// Clear the connection and forget saved parameters
    pub fn disconnect(&self) -> S3Result<()> {
        self.clear();
        self.persisted.forget()
    }

    fn build(&self, params: ConnectionParams) -> S3Result<Arc<Connection>> {
        params.validate()?;
        let store = self.factory.build(&params)?;
        Ok(Arc::new(Connection::new(params, store)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::s3::error::{ErrorClass, ErrorKind};
    use crate::protocol::s3::mock::{MemoryParamsStore, MockStore, MockStoreFactory};

    fn params() -> ConnectionParams {
        ConnectionParams::new("AKIA", "secret", "us-east-1", "photos")
    }

    fn manager_with(
        persisted: Option<ConnectionParams>,
    ) -> (ConnectionManager, Arc<MockStoreFactory>, Arc<MemoryParamsStore>) {
        let store = Arc::new(MockStore::new("photos"));
        let factory = Arc::new(MockStoreFactory::new(store));
        let saved = Arc::new(MemoryParamsStore::new(persisted));
        let manager = ConnectionManager::new(factory.clone(), saved.clone());
        (manager, factory, saved)
    }

    #[test]
    fn test_current_without_params_is_not_connected() {
        let (manager, factory, saved) = manager_with(None);

        let err = manager.current().unwrap_err();
        assert!(matches!(err, S3Error::NotConnected(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(factory.builds(), 0);
        assert_eq!(factory.store().call_count(), 0);
        assert_eq!(saved.loads(), 1);
    }

    #[test]
    fn test_initialize_rejects_missing_fields_before_building() {
        let (manager, factory, _) = manager_with(None);

        let mut bad = params();
        bad.region.clear();
        let err = manager.initialize(bad).unwrap_err();
        assert!(matches!(err, S3Error::InvalidConfig(_)));
        assert_eq!(factory.builds(), 0);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_current_returns_initialized_connection() {
        let (manager, factory, saved) = manager_with(None);

        let first = manager.initialize(params()).unwrap();
        let second = manager.current().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.builds(), 1);
        assert_eq!(saved.loads(), 0);
    }

    #[test]
    fn test_current_restores_saved_params_once() {
        let (manager, factory, saved) = manager_with(Some(params()));

        let first = manager.current().unwrap();
        let second = manager.current().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.bucket(), "photos");
        assert_eq!(factory.builds(), 1);
        assert_eq!(saved.loads(), 1);
    }

    #[test]
    fn test_unusable_saved_params_are_not_connected() {
        let mut broken = params();
        broken.secret_key.clear();
        let (manager, factory, _) = manager_with(Some(broken));

        let err = manager.current().unwrap_err();
        assert!(matches!(err, S3Error::NotConnected(_)));
        assert_eq!(factory.builds(), 0);
    }

    #[test]
    fn test_clear_is_idempotent_and_closes() {
        let (manager, _, _) = manager_with(None);

        let connection = manager.initialize(params()).unwrap();
        manager.clear();
        manager.clear();

        assert!(!manager.is_connected());
        assert!(connection.is_closed());
        let err = connection.ensure_open().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Network));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_reinitialize_closes_previous() {
        let (manager, _, _) = manager_with(None);

        let old = manager.initialize(params()).unwrap();
        let new = manager.initialize(params()).unwrap();
        assert!(old.is_closed());
        assert!(!new.is_closed());
    }

    #[tokio::test]
    async fn test_connect_probes_and_persists() {
        let (manager, factory, saved) = manager_with(None);

        manager.connect(params()).await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(saved.saved(), Some(params()));
        assert_eq!(factory.store().head_bucket_count(), 1);
        assert_eq!(factory.store().list_count(), 1);

        manager.disconnect().unwrap();
        assert!(!manager.is_connected());
        assert_eq!(saved.saved(), None);
    }

    #[tokio::test]
    async fn test_probe_failure_leaves_slot_untouched() {
        let (manager, _, saved) = manager_with(None);

        let mut wrong = params();
        wrong.bucket = "missing".to_string();
        let err = manager.connect(wrong).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoSuchBucket));
        assert!(!manager.is_connected());
        assert_eq!(saved.saved(), None);
    }

    #[test]
    fn test_file_params_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileParamsStore::new(dir.path().join("nested").join("connection.json"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&params()).unwrap();
        assert_eq!(store.load().unwrap(), Some(params()));
        store.forget().unwrap();
        store.forget().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_params_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileParamsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, S3Error::InvalidConfig(_)));
    }
}

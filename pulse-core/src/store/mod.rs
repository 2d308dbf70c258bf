//! Persisted Store
//!
//! A [`Store`] hands out [`StoreField`]s: signals whose initial value is
//! loaded from a [`StorageDriver`] and whose changes are written back.
//!
//! # Persistence Model
//!
//! Loading is awaited once, when the field is created. Writing is
//! fire-and-forget: [`StoreField::set`] updates the signal synchronously,
//! then spawns the driver write on the ambient tokio runtime. A failed write
//! is logged and never fails the signal write. [`Store::settle`] waits for
//! every write spawned so far.
//!
//! Writes to one key reach the driver in order: each key has a writer that
//! runs one write at a time, and a write already superseded by a newer one
//! for the same key is skipped.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Store::new(MemoryDriver::new(), StoreConfig::default());
//! let theme = store.field("theme", String::from("light")).await;
//!
//! theme.set(String::from("dark"))?;
//! store.settle().await;
//! ```

mod driver;

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use crate::config::StoreConfig;
use crate::reactive::{Result, Signal, SignalValue, Subscription};

pub use driver::{MemoryDriver, StorageDriver};

/// Errors raised by storage drivers and value encoding.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage driver failed: {0}")]
    Driver(String),

    #[error("failed to encode or decode stored value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Orders the writes of one key.
#[derive(Default)]
struct KeyWriter {
    /// Generation of the newest write requested for the key.
    latest: AtomicU64,
    /// Held for the duration of a driver write.
    turn: AsyncMutex<()>,
}

struct StoreShared {
    driver: Arc<dyn StorageDriver>,
    config: StoreConfig,
    pending: Mutex<JoinSet<()>>,
    writers: DashMap<String, Arc<KeyWriter>>,
}

/// A set of persisted signals sharing one driver and namespace.
///
/// Cheap to clone; clones share the driver and the pending-write set.
#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

impl Store {
    /// Create a store that owns its driver.
    pub fn new(driver: impl StorageDriver + 'static, config: StoreConfig) -> Self {
        Self::with_driver(Arc::new(driver), config)
    }

    /// Create a store over a driver that is also used elsewhere.
    pub fn with_driver(driver: Arc<dyn StorageDriver>, config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                driver,
                config,
                pending: Mutex::new(JoinSet::new()),
                writers: DashMap::new(),
            }),
        }
    }

    /// The configuration this store was created with.
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// The driver key for a field name.
    pub fn key(&self, name: &str) -> String {
        let namespace = &self.shared.config.namespace;
        if namespace.is_empty() {
            name.to_owned()
        } else {
            format!("{namespace}:{name}")
        }
    }

    /// Create a field, loading its initial value when persistence is on.
    ///
    /// A missing entry, a failed read or an undecodable value all fall back
    /// to `default`; the latter two are logged.
    pub async fn field<T>(&self, name: &str, default: T) -> StoreField<T>
    where
        T: SignalValue + Serialize + DeserializeOwned,
    {
        let key = self.key(name);
        let initial = if self.shared.config.persist {
            self.load(&key).await.unwrap_or(default)
        } else {
            default
        };

        StoreField {
            signal: Signal::new(initial),
            key,
            store: self.clone(),
        }
    }

    /// Wait for every write spawned so far to finish.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.shared.pending.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(%err, "store write task failed");
            }
        }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.shared.driver.get(key).await {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => {
                    debug!(key, "store field loaded");
                    Some(value)
                }
                Err(err) => {
                    warn!(key, error = %StoreError::from(err), "stored value ignored");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, %err, "store read failed, using default");
                None
            }
        }
    }

    fn persist(&self, key: &str, text: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key, "no tokio runtime, store write skipped");
            return;
        };

        let writer = Arc::clone(self.shared.writers.entry(key.to_owned()).or_default().value());
        let generation = writer.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let driver = Arc::clone(&self.shared.driver);
        let key = key.to_owned();
        let mut pending = self.shared.pending.lock();
        while let Some(joined) = pending.try_join_next() {
            if let Err(err) = joined {
                error!(%err, "store write task failed");
            }
        }
        pending.spawn_on(
            async move {
                let _turn = writer.turn.lock().await;
                if writer.latest.load(Ordering::SeqCst) != generation {
                    trace!(key = %key, generation, "store write superseded");
                    return;
                }
                if let Err(err) = driver.set(&key, text).await {
                    error!(key = %key, %err, "store write failed");
                }
            },
            &handle,
        );
    }
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.shared.config)
            .field("pending", &self.shared.pending.lock().len())
            .finish()
    }
}

/// A signal backed by a store entry.
#[derive(Clone)]
pub struct StoreField<T: SignalValue> {
    signal: Signal<T>,
    key: String,
    store: Store,
}

impl<T> StoreField<T>
where
    T: SignalValue + Serialize,
{
    /// The underlying signal, for effects, derived signals and bindings.
    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }

    /// The driver key this field is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the current value, tracking like [`Signal::get`].
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Register a listener for value changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.signal.subscribe(listener)
    }

    /// Write the signal, then persist the value in the background.
    ///
    /// Errors are those of [`Signal::set`]. The value is stored before any
    /// dependent runs, so it is persisted even when the call fails;
    /// persistence itself never fails the call.
    pub fn set(&self, value: T) -> Result<()> {
        let encoded = self
            .store
            .config()
            .persist
            .then(|| serde_json::to_string(&value));

        let written = self.signal.set(value);

        match encoded {
            Some(Ok(text)) => self.store.persist(&self.key, text),
            Some(Err(err)) => {
                error!(key = %self.key, error = %StoreError::from(err), "store value not encodable");
            }
            None => {}
        }
        written
    }
}

impl<T: SignalValue> Debug for StoreField<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreField")
            .field("key", &self.key)
            .field("signal", &self.signal)
            .finish()
    }
}

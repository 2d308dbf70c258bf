//! Runtime and store configuration.
//!
//! Runtime settings are per thread, matching the tracking stack they guard.
//! Install them with [`Runtime::configure`](crate::reactive::Runtime::configure).

use serde::Deserialize;

/// Tunables for effect propagation.
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// ```rust,ignore
/// let config: RuntimeConfig = serde_json::from_str(r#"{ "max_depth": 64 }"#)?;
/// Runtime::configure(config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Fail with `CyclicDependency` when an effect re-triggers itself.
    pub cycle_detection: bool,

    /// Maximum number of nested tracked runs before propagation fails with
    /// `DepthExceeded`.
    pub max_depth: usize,
}

impl RuntimeConfig {
    pub const DEFAULT_MAX_DEPTH: usize = 256;
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_detection: true,
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Where and whether a [`Store`](crate::store::Store) persists its fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Prefix for every driver key, joined with `:`. Empty means no prefix.
    pub namespace: String,

    /// Load initial values from the driver and write changes back.
    pub persist: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            persist: true,
        }
    }
}

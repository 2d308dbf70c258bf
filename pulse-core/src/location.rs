//! Navigation state as plain signals.
//!
//! Router code owns the matching; this only holds the result. Reading
//! [`Location::path`] or [`Location::params`] inside an effect subscribes to
//! navigation like any other signal.

use std::collections::BTreeMap;

use crate::reactive::{batch, Result, Signal};

/// Route parameters by name.
pub type Params = BTreeMap<String, String>;

/// The current path and its parameters.
#[derive(Debug, Clone)]
pub struct Location {
    path: Signal<String>,
    params: Signal<Params>,
}

impl Location {
    /// Start at `path` with no params.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Signal::new(path.into()),
            params: Signal::new(Params::new()),
        }
    }

    /// The current path.
    pub fn path(&self) -> &Signal<String> {
        &self.path
    }

    /// The current route parameters.
    pub fn params(&self) -> &Signal<Params> {
        &self.params
    }

    /// Write both signals in one batch, so observers of either see the new
    /// path and params together.
    pub fn navigate(&self, path: impl Into<String>, params: Params) -> Result<()> {
        let path = path.into();
        tracing::debug!(%path, "navigate");
        batch(|| {
            self.path.set(path)?;
            self.params.set(params)
        })
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::new("/")
    }
}

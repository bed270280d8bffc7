//! Process-wide runtime bootstrap.
//!
//! The effect runtime needs a client token and resource search paths
//! exactly once per process. [`RuntimeContext::initialize`] performs that
//! bootstrap idempotently: only the first call stores anything, later calls
//! are no-ops that report success by returning the existing context.
//!
//! Sessions take the context by reference, which makes "constructed before
//! bootstrap" unrepresentable without threading mutable global state
//! through the pipeline.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static RUNTIME: OnceLock<RuntimeContext> = OnceLock::new();

/// Immutable process-wide configuration for the effect runtime.
#[derive(Debug)]
pub struct RuntimeContext {
    client_token: String,
    resource_paths: Vec<PathBuf>,
}

impl RuntimeContext {
    /// Initialize the process-wide runtime, or fetch it if already
    /// initialized.
    ///
    /// Arguments passed on calls after the first are ignored.
    pub fn initialize(
        client_token: impl Into<String>,
        resource_paths: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> &'static RuntimeContext {
        RUNTIME.get_or_init(|| {
            let context = RuntimeContext {
                client_token: client_token.into(),
                resource_paths: resource_paths
                    .into_iter()
                    .map(|p| p.as_ref().to_path_buf())
                    .collect(),
            };
            tracing::info!(resource_paths = ?context.resource_paths, "Runtime initialized");
            context
        })
    }

    /// The already-initialized runtime, if any.
    pub fn get() -> Option<&'static RuntimeContext> {
        RUNTIME.get()
    }

    /// The client token supplied at initialization.
    pub fn client_token(&self) -> &str {
        &self.client_token
    }

    /// Directories searched for effect resources.
    pub fn resource_paths(&self) -> &[PathBuf] {
        &self.resource_paths
    }
}

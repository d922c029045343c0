//! Shared state for the HTTP surface.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use preserva_core::{AtomConfig, PreserveRunner};

/// Application state: the request runner, request defaults and the set of
/// in-flight request fingerprints used for deduplication.
pub struct AppState {
    pub runner: Arc<dyn PreserveRunner>,
    /// Cleanup default for requests that omit the field.
    pub default_cleanup: bool,
    /// Description-system settings merged under request-provided values.
    pub default_atom: AtomConfig,
    active: Mutex<HashSet<String>>,
}

impl AppState {
    pub fn new(
        runner: Arc<dyn PreserveRunner>,
        default_cleanup: bool,
        default_atom: AtomConfig,
    ) -> Self {
        Self {
            runner,
            default_cleanup,
            default_atom,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Registers a request fingerprint; false when an identical request is
    /// already in flight.
    pub fn try_begin(&self, fingerprint: &str) -> bool {
        self.active.lock().unwrap().insert(fingerprint.to_string())
    }

    pub fn finish(&self, fingerprint: &str) {
        self.active.lock().unwrap().remove(fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use preserva_core::{ServiceArgs, ServiceError};
    use tokio_util::sync::CancellationToken;

    struct NoopRunner;

    #[async_trait]
    impl PreserveRunner for NoopRunner {
        async fn run_args(
            &self,
            _token: CancellationToken,
            _args: ServiceArgs,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    #[test]
    fn fingerprints_are_exclusive_until_finished() {
        let state = AppState::new(Arc::new(NoopRunner), true, AtomConfig::default());
        assert!(state.try_begin("fp"));
        assert!(!state.try_begin("fp"));
        state.finish("fp");
        assert!(state.try_begin("fp"));
    }
}

//! Recording description-system client for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ads::{AdsApi, AdsError};
use crate::config::AtomConfig;

/// Records migrations and deposits; can simulate failures in either step.
#[derive(Default)]
pub struct MockAds {
    migrated: Mutex<Vec<PathBuf>>,
    deposits: Mutex<Vec<(String, String)>>,
    fail_migrate: AtomicBool,
    fail_deposit: AtomicBool,
}

impl MockAds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_migrate(&self, fail: bool) {
        self.fail_migrate.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deposit(&self, fail: bool) {
        self.fail_deposit.store(fail, Ordering::SeqCst);
    }

    pub fn migrated(&self) -> Vec<PathBuf> {
        self.migrated.lock().unwrap().clone()
    }

    /// Recorded (slug, dip name) deposit calls.
    pub fn deposits(&self) -> Vec<(String, String)> {
        self.deposits.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdsApi for MockAds {
    async fn migrate(
        &self,
        _token: &CancellationToken,
        _config: &AtomConfig,
        dip_path: &Path,
    ) -> Result<(), AdsError> {
        if self.fail_migrate.load(Ordering::SeqCst) {
            return Err(AdsError::Rsync {
                detail: "simulated rsync failure".to_string(),
            });
        }
        self.migrated.lock().unwrap().push(dip_path.to_path_buf());
        Ok(())
    }

    async fn deposit(
        &self,
        _config: &AtomConfig,
        slug: &str,
        dip_name: &str,
    ) -> Result<(), AdsError> {
        if self.fail_deposit.load(Ordering::SeqCst) {
            return Err(AdsError::Deposit { status: 500 });
        }
        self.deposits
            .lock()
            .unwrap()
            .push((slug.to_string(), dip_name.to_string()));
        Ok(())
    }
}

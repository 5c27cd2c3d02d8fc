//! Shared experiment session.
//!
//! A [`Session`] owns the device registry, the DAQ router, the timing settings
//! and the cancellation flag. The scan sequencer and the monitor controller both
//! hold it as `Arc<Session>`; whichever starts a run first takes the exclusive
//! lease and the other gets [`ScanError::SessionBusy`] until it is released.

use crate::config::TimingConfig;
use crate::daq::DaqRouter;
use crate::error::{ScanError, ScanResult};
use crate::instrument::{DeviceRegistry, InitReport};
use crate::polling::CancelToken;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Proof of exclusive use of a session. Dropping it releases the session.
#[derive(Debug)]
pub struct SessionLease {
    _guard: OwnedMutexGuard<()>,
}

/// Registry, router and settings shared by both scan modes.
#[derive(Debug)]
pub struct Session {
    registry: DeviceRegistry,
    router: Mutex<DaqRouter>,
    timing: TimingConfig,
    cancel: CancelToken,
    lease: Arc<Mutex<()>>,
}

impl Session {
    /// Builds the router from the registry's DAQ wiring.
    pub fn new(registry: DeviceRegistry, timing: TimingConfig) -> ScanResult<Arc<Self>> {
        let router = DaqRouter::new(&registry)?;
        info!(
            devices = registry.len(),
            daqs = router.bindings().count(),
            "Session ready"
        );
        Ok(Arc::new(Self {
            registry,
            router: Mutex::new(router),
            timing,
            cancel: CancelToken::new(),
            lease: Arc::new(Mutex::new(())),
        }))
    }

    /// Devices of the experiment.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// DAQ bindings. Never hold the guard across a sleep.
    pub fn router(&self) -> &Mutex<DaqRouter> {
        &self.router
    }

    /// Timing settings.
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Stop flag shared by every poll loop of the session.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Initializes every driver and re-derives the DAQ channel lists.
    pub async fn initialize(&self) -> ScanResult<InitReport> {
        let report = self.registry.initialize_all().await;
        if !report.is_clean() {
            warn!(
                failed = report.failures.len(),
                "Some devices failed to initialize"
            );
        }
        self.router.lock().await.rebuild_connections(&self.registry)?;
        Ok(report)
    }

    /// Takes the exclusive lease, failing with `SessionBusy` if another run holds it.
    pub fn claim(&self) -> ScanResult<SessionLease> {
        let guard = Arc::clone(&self.lease)
            .try_lock_owned()
            .map_err(|_| ScanError::SessionBusy)?;
        Ok(SessionLease { _guard: guard })
    }

    /// True while a run holds the lease.
    pub fn is_busy(&self) -> bool {
        self.lease.try_lock().is_err()
    }
}

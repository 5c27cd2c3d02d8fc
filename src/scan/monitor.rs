//! Continuous monitoring: a free-running laser sweep with the DAQs acquiring
//! until told to stop. Samples are pulled on demand with
//! [`MonitorController::read_continuous_scans`].

use crate::daq::{AcquisitionPlan, Samples};
use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::{Laser, Sampling};
use crate::scan::geometry::ScanGeometry;
use crate::scan::spec::MonitorSpec;
use crate::scan::state::MonitorState;
use crate::session::{Session, SessionLease};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Drives one [`MonitorSpec`] against a [`Session`].
pub struct MonitorController {
    session: Arc<Session>,
    spec: MonitorSpec,
    laser: Arc<dyn Laser>,
    state: RwLock<MonitorState>,
    geometry: RwLock<Option<ScanGeometry>>,
    lease: Mutex<Option<SessionLease>>,
}

impl MonitorController {
    /// Checks the description and resolves the laser.
    pub fn new(session: Arc<Session>, spec: MonitorSpec) -> ScanResult<Self> {
        spec.validate()?;
        let laser = session.registry().laser(&spec.laser)?;
        for detector in &spec.detectors {
            session.registry().get(detector)?;
        }
        Ok(Self {
            session,
            spec,
            laser,
            state: RwLock::new(MonitorState::Idle),
            geometry: RwLock::new(None),
            lease: Mutex::new(None),
        })
    }

    /// Current state.
    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    /// Geometry of the armed session.
    pub async fn geometry(&self) -> Option<ScanGeometry> {
        self.geometry.read().await.clone()
    }

    async fn require(&self, operation: &'static str, allowed: fn(&MonitorState) -> bool) -> ScanResult<()> {
        let state = self.state().await;
        if allowed(&state) {
            Ok(())
        } else {
            Err(ScanError::InvalidState {
                operation,
                state: state.to_string(),
            })
        }
    }

    /// Applies free-running sweep parameters and arms the DAQs for one sweep
    /// worth of points per read, at a slightly shorter sample period than the
    /// trigger interval.
    pub async fn setup_continuous_scans(&self) -> ScanResult<ScanGeometry> {
        self.require("setup_continuous_scans", MonitorState::can_setup)
            .await?;
        let lease = self.session.claim()?;
        self.session.cancel_token().reset();

        match self.configure().await {
            Ok(geometry) => {
                *self.geometry.write().await = Some(geometry.clone());
                *self.lease.lock().await = Some(lease);
                *self.state.write().await = MonitorState::Armed;
                Ok(geometry)
            }
            Err(err) => {
                warn!(error = %err, "Monitor setup failed");
                if let Err(release) = self.session.router().lock().await.release_tasks().await {
                    warn!(error = %release, "Could not release tasks after failed setup");
                }
                Err(err)
            }
        }
    }

    async fn configure(&self) -> ScanResult<ScanGeometry> {
        let sweep = self.spec.sweep.free_running();
        let geometry = ScanGeometry::for_monitor(&sweep)?;

        if let Err(source) = self.laser.apply_values(&sweep.to_values()).await {
            let err = ScanError::ParameterApply {
                device: self.spec.laser.clone(),
                source,
            };
            warn!(error = %err, "Problem changing values of the laser, keeping previous parameters");
        }

        let factor = self.session.timing().continuous_accuracy_factor;
        let plan = AcquisitionPlan {
            accuracy: geometry.accuracy.scale(factor),
            points: geometry.wavelength_points,
            sampling: Sampling::Continuous,
        };
        let mut router = self.session.router().lock().await;
        router.set_monitor_targets(self.session.registry(), &self.spec.detectors)?;
        let armed = router.configure_all(&plan).await?;

        info!(
            points = geometry.wavelength_points,
            accuracy = %plan.accuracy,
            sweeps = sweep.sweeps(),
            daqs = ?armed,
            "Continuous scans configured"
        );
        Ok(geometry)
    }

    /// Starts every idle armed task, then the laser sweep.
    pub async fn start_continuous_scans(&self) -> ScanResult<()> {
        self.require("start_continuous_scans", MonitorState::can_start)
            .await?;
        let triggered = self.session.router().lock().await.trigger_idle().await?;
        self.laser
            .execute_sweep()
            .await
            .map_err(|e| ScanError::driver(&self.spec.laser, "execute_sweep", e))?;
        *self.state.write().await = MonitorState::Running;
        info!(triggered, "Continuous scans running");
        Ok(())
    }

    /// Everything buffered since the previous read, per monitored device.
    pub async fn read_continuous_scans(&self) -> ScanResult<Samples> {
        self.require("read_continuous_scans", MonitorState::can_read)
            .await?;
        let samples = self.session.router().lock().await.read_all().await?;
        debug!(devices = samples.len(), "Continuous read");
        Ok(samples)
    }

    /// Pauses the laser sweep. DAQ tasks keep running.
    pub async fn pause_continuous_scans(&self) -> ScanResult<()> {
        self.require("pause_continuous_scans", MonitorState::can_pause)
            .await?;
        self.laser
            .pause_sweep()
            .await
            .map_err(|e| ScanError::driver(&self.spec.laser, "pause_sweep", e))?;
        *self.state.write().await = MonitorState::Paused;
        Ok(())
    }

    /// Restarts the laser sweep after a pause.
    pub async fn resume_continuous_scans(&self) -> ScanResult<()> {
        self.require("resume_continuous_scans", MonitorState::can_resume)
            .await?;
        self.laser
            .execute_sweep()
            .await
            .map_err(|e| ScanError::driver(&self.spec.laser, "execute_sweep", e))?;
        *self.state.write().await = MonitorState::Running;
        Ok(())
    }

    /// Pauses and stops the sweep, stops and clears every DAQ task and releases
    /// the session. A no-op when nothing was set up.
    ///
    /// Every step is attempted; the first failure is returned.
    pub async fn stop_continuous_scans(&self) -> ScanResult<()> {
        let state = self.state().await;
        if matches!(state, MonitorState::Idle | MonitorState::Stopped) {
            return Ok(());
        }
        info!(%state, "Stopping continuous scans");
        self.session.cancel_token().cancel();
        let mut first_error: Option<ScanError> = None;

        if let Err(e) = self.laser.pause_sweep().await {
            let err = ScanError::driver(&self.spec.laser, "pause_sweep", e);
            warn!(error = %err, "Could not pause the laser");
            first_error.get_or_insert(err);
        }
        if let Err(e) = self.laser.stop_sweep().await {
            let err = ScanError::driver(&self.spec.laser, "stop_sweep", e);
            warn!(error = %err, "Could not stop the laser");
            first_error.get_or_insert(err);
        }
        if let Err(err) = self.session.router().lock().await.release_tasks().await {
            first_error.get_or_insert(err);
        }
        self.lease.lock().await.take();
        *self.state.write().await = MonitorState::Stopped;

        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for MonitorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorController")
            .field("laser", &self.spec.laser)
            .field("detectors", &self.spec.detectors)
            .finish()
    }
}

//! 1D and 2D scans: an outer axis stepped around synchronized laser sweeps.
//!
//! A run goes through [`ScanSequencer::setup_scan`] (laser parameters, DAQ
//! arming) and [`ScanSequencer::do_scan`] (the loop). Each outer iteration sets
//! the axis value, waits for the device to settle, then runs a line scan:
//!
//! ```text
//! shutter low ─ delay ─ shutter high ─ execute_sweep ─ poll until Stop ─ shutter low
//! ```
//!
//! and reads back every sample the DAQs buffered during that sweep.
//! [`ScanSequencer::stop_scan`] may be called from another task at any point.

use crate::daq::AcquisitionPlan;
use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::{Daq, Laser, Sampling, SweepCondition};
use crate::instrument::device::{Connection, DeviceKind};
use crate::instrument::registry::DeviceRegistry;
use crate::polling::poll_until;
use crate::quantity::Quantity;
use crate::scan::data::{LineRecord, ScanOutcome};
use crate::scan::geometry::ScanGeometry;
use crate::scan::setter::set_value;
use crate::scan::spec::{Axis, ScanSpec, ShutterSpec};
use crate::scan::state::SequencerState;
use crate::session::{Session, SessionLease};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Digital line of a DAQ that drives the shutter. High means open.
struct ShutterLine {
    daq: String,
    driver: Arc<dyn Daq>,
    port: String,
    delay: Duration,
}

impl ShutterLine {
    fn resolve(registry: &DeviceRegistry, spec: &ShutterSpec) -> ScanResult<Self> {
        let device = registry.get(&spec.device)?;
        let (daq, port) = match (device.kind(), device.connection()) {
            (DeviceKind::Daq, _) => {
                let port = spec.port.clone().ok_or_else(|| {
                    ScanError::Configuration(format!(
                        "shutter on DAQ '{}' needs a port",
                        spec.device
                    ))
                })?;
                (device.name().to_string(), port)
            }
            (DeviceKind::ShutterChannel, Connection::DaqRouted { daq, port, .. }) => {
                let port = spec.port.clone().unwrap_or_else(|| port.clone());
                (daq.clone(), port)
            }
            (kind, _) => {
                return Err(ScanError::Configuration(format!(
                    "'{}' ({}) cannot drive a shutter",
                    spec.device, kind
                )))
            }
        };
        Ok(Self {
            driver: registry.daq_driver(&daq)?,
            daq,
            port,
            delay: spec.delay()?,
        })
    }

    async fn set(&self, open: bool) -> ScanResult<()> {
        debug!(daq = %self.daq, port = %self.port, open, "Shutter");
        self.driver
            .digital_output(&self.port, open)
            .await
            .map_err(|e| ScanError::driver(&self.daq, "digital_output", e))
    }
}

/// Runs one [`ScanSpec`] against a [`Session`].
pub struct ScanSequencer {
    session: Arc<Session>,
    spec: ScanSpec,
    laser: Arc<dyn Laser>,
    shutter: ShutterLine,
    state: RwLock<SequencerState>,
    geometry: RwLock<Option<ScanGeometry>>,
    lease: Mutex<Option<SessionLease>>,
}

impl ScanSequencer {
    /// Checks the description and resolves the laser, the shutter line and the
    /// axis device. Nothing is sent to the hardware yet.
    pub fn new(session: Arc<Session>, spec: ScanSpec) -> ScanResult<Self> {
        spec.validate()?;
        let registry = session.registry();
        let laser = registry.laser(&spec.laser)?;
        let shutter = ShutterLine::resolve(registry, &spec.shutter)?;
        if let Axis::Device { device, .. } = &spec.axis {
            registry.get(device)?;
        }
        for detector in &spec.detectors {
            registry.get(detector)?;
        }
        Ok(Self {
            session,
            spec,
            laser,
            shutter,
            state: RwLock::new(SequencerState::Idle),
            geometry: RwLock::new(None),
            lease: Mutex::new(None),
        })
    }

    /// Current state.
    pub async fn state(&self) -> SequencerState {
        *self.state.read().await
    }

    /// Geometry of the configured scan, once `setup_scan` succeeded.
    pub async fn geometry(&self) -> Option<ScanGeometry> {
        self.geometry.read().await.clone()
    }

    /// The scan description.
    pub fn spec(&self) -> &ScanSpec {
        &self.spec
    }

    async fn set_state(&self, state: SequencerState) {
        *self.state.write().await = state;
    }

    /// Applies the laser parameters, selects the detectors and arms every DAQ
    /// that monitors one of them. Nothing is triggered.
    ///
    /// Claims the session; fails with `SessionBusy` while another run holds it.
    pub async fn setup_scan(&self) -> ScanResult<ScanGeometry> {
        let state = self.state().await;
        if !state.can_setup() {
            return Err(ScanError::InvalidState {
                operation: "setup_scan",
                state: state.to_string(),
            });
        }
        let lease = self.session.claim()?;
        self.session.cancel_token().reset();
        self.set_state(SequencerState::Configuring).await;

        match self.configure().await {
            Ok(geometry) => {
                *self.geometry.write().await = Some(geometry.clone());
                *self.lease.lock().await = Some(lease);
                Ok(geometry)
            }
            Err(err) => {
                error!(error = %err, "Scan setup failed");
                if let Err(release) = self.session.router().lock().await.release_tasks().await {
                    warn!(error = %release, "Could not release tasks after failed setup");
                }
                self.set_state(SequencerState::Failed).await;
                Err(err)
            }
        }
    }

    async fn configure(&self) -> ScanResult<ScanGeometry> {
        let geometry = ScanGeometry::for_scan(&self.spec)?;

        let sweep = self.spec.sweep.normalized();
        if let Err(source) = self.laser.apply_values(&sweep.to_values()).await {
            let err = ScanError::ParameterApply {
                device: self.spec.laser.clone(),
                source,
            };
            warn!(error = %err, "Problem changing values of the laser, keeping previous parameters");
        }

        let plan = AcquisitionPlan {
            accuracy: geometry.accuracy.clone(),
            points: geometry.scan_daq_points(),
            sampling: Sampling::Continuous,
        };
        let mut router = self.session.router().lock().await;
        router.set_monitor_targets(self.session.registry(), &self.spec.detectors)?;
        let armed = router.configure_all(&plan).await?;

        info!(
            wavelength_points = geometry.wavelength_points,
            visited_points = geometry.visited_points,
            accuracy = %geometry.accuracy,
            approx_time_to_scan = %geometry.approx_time_to_scan,
            daqs = ?armed,
            "Scan configured"
        );
        Ok(geometry)
    }

    /// Cycles the shutter closed, open, closed so that a high line means open.
    pub async fn sync_shutter(&self) -> ScanResult<()> {
        let delay = self.session.timing().shutter_sync_delay();
        self.shutter.set(false).await?;
        sleep(delay).await;
        self.shutter.set(true).await?;
        sleep(delay).await;
        self.shutter.set(false).await
    }

    /// Runs the configured scan to completion, failure or stop.
    ///
    /// Hardware failures do not surface as `Err`: the outcome carries the error,
    /// the `Failed` state and every line read before it. `Err` is only returned
    /// when the sequencer was not configured.
    pub async fn do_scan(&self) -> ScanResult<ScanOutcome> {
        let state = self.state().await;
        let geometry = match (state.can_scan(), self.geometry().await) {
            (true, Some(geometry)) => geometry,
            _ => {
                return Err(ScanError::InvalidState {
                    operation: "do_scan",
                    state: state.to_string(),
                })
            }
        };

        let run_id = Uuid::new_v4();
        info!(%run_id, lines = geometry.visited_points, "Starting scan");
        let mut lines = Vec::with_capacity(geometry.axis_values.len());
        let result = self.run_lines(&geometry, &mut lines).await;

        let (state, error) = match result {
            Ok(()) => {
                info!(%run_id, lines = lines.len(), "Scan complete");
                (SequencerState::Complete, None)
            }
            Err(err) if err.is_cancellation() => {
                info!(%run_id, lines = lines.len(), "Scan stopped");
                (SequencerState::Stopped, Some(err))
            }
            Err(err) => {
                error!(%run_id, lines = lines.len(), error = %err, "Scan failed");
                (SequencerState::Failed, Some(err))
            }
        };

        if let Err(err) = self.session.router().lock().await.release_tasks().await {
            warn!(error = %err, "Could not release acquisition tasks");
        }
        // Finish the state before giving up the lease so a late stop_scan sees
        // an ended run.
        self.set_state(state).await;
        self.lease.lock().await.take();

        Ok(ScanOutcome {
            run_id,
            geometry,
            lines,
            state,
            error,
        })
    }

    async fn run_lines(&self, geometry: &ScanGeometry, lines: &mut Vec<LineRecord>) -> ScanResult<()> {
        let triggered = self.session.router().lock().await.trigger_idle().await?;
        debug!(triggered, "Acquisition tasks started");
        let cancel = self.session.cancel_token();

        for (index, value) in geometry.axis_values.iter().enumerate() {
            cancel.check()?;
            self.set_state(SequencerState::Scanning {
                outer_index: index,
                sweeping: false,
            })
            .await;

            if let Axis::Device { device, output } = &self.spec.axis {
                self.move_axis(device, output, value).await?;
            }

            self.set_state(SequencerState::Scanning {
                outer_index: index,
                sweeping: true,
            })
            .await;
            self.line_scan(geometry).await?;
            self.set_state(SequencerState::Scanning {
                outer_index: index,
                sweeping: false,
            })
            .await;

            let samples = self.session.router().lock().await.read_all().await?;
            debug!(index, value = %value, devices = samples.len(), "Line read back");
            lines.push(LineRecord {
                index,
                axis_value: value.clone(),
                acquired_at: Utc::now(),
                samples,
            });
        }
        Ok(())
    }

    async fn move_axis(&self, device: &str, output: &str, value: &Quantity) -> ScanResult<()> {
        let registry = self.session.registry();
        let timing = self.session.timing();
        set_value(registry, device, output, value).await?;
        sleep(timing.settle_delay()).await;

        // Only directly driven devices report motion; DAQ outputs settle at once.
        let Some(actuator) = registry
            .get(device)?
            .driver()
            .and_then(|d| d.as_actuator())
            .cloned()
        else {
            return Ok(());
        };
        let actuator = &actuator;
        let what = format!("{} to finish moving", device);
        poll_until(
            &what,
            &timing.motion_policy(),
            self.session.cancel_token(),
            move || async move {
                actuator
                    .finished_moving()
                    .await
                    .map_err(|e| ScanError::driver(device, "finished_moving", e))
            },
        )
        .await?;
        Ok(())
    }

    /// One wavelength sweep with the shutter open, using the configured geometry.
    pub async fn do_line_scan(&self) -> ScanResult<()> {
        let geometry = self.geometry().await.ok_or_else(|| ScanError::InvalidState {
            operation: "do_line_scan",
            state: SequencerState::Idle.to_string(),
        })?;
        self.line_scan(&geometry).await
    }

    async fn line_scan(&self, geometry: &ScanGeometry) -> ScanResult<()> {
        self.shutter.set(false).await?;
        let result = self.sweep_with_shutter_open(geometry).await;
        let closed = self.shutter.set(false).await;
        match (result, closed) {
            (Ok(()), closed) => closed,
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                error!(error = %close_err, "Could not close the shutter after a failed line scan");
                Err(err)
            }
        }
    }

    async fn sweep_with_shutter_open(&self, geometry: &ScanGeometry) -> ScanResult<()> {
        sleep(self.shutter.delay).await;
        self.shutter.set(true).await?;

        self.laser
            .execute_sweep()
            .await
            .map_err(|e| ScanError::driver(&self.spec.laser, "execute_sweep", e))?;

        let policy = self.session.timing().sweep_policy(geometry.line_scan_duration()?);
        let laser = &self.laser;
        let name = self.spec.laser.as_str();
        let polls = poll_until(
            "laser sweep to stop",
            &policy,
            self.session.cancel_token(),
            move || async move {
                laser
                    .sweep_condition()
                    .await
                    .map(|condition| condition == SweepCondition::Stop)
                    .map_err(|e| ScanError::driver(name, "sweep_condition", e))
            },
        )
        .await?;
        debug!(polls, "Sweep finished");
        Ok(())
    }

    /// Stops the run: raises the stop flag, halts the laser sweep, closes the
    /// shutter, releases every DAQ task and the session.
    ///
    /// Every step is attempted even if an earlier one fails; the first failure is
    /// returned.
    ///
    /// A no-op unless this sequencer owns the session: a sequencer that was
    /// never set up, or whose run already ended, leaves the hardware alone.
    pub async fn stop_scan(&self) -> ScanResult<()> {
        let state = self.state().await;
        let owns_session = self.lease.lock().await.is_some();
        if !owns_session
            && !matches!(
                state,
                SequencerState::Configuring | SequencerState::Scanning { .. }
            )
        {
            debug!(%state, "Stop requested without an active run, ignoring");
            return Ok(());
        }
        info!(%state, "Stopping scan");
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
        if let Err(err) = self.shutter.set(false).await {
            warn!(error = %err, "Could not close the shutter");
            first_error.get_or_insert(err);
        }
        if let Err(err) = self.session.router().lock().await.release_tasks().await {
            first_error.get_or_insert(err);
        }
        {
            let mut state = self.state.write().await;
            if !matches!(*state, SequencerState::Idle) && !state.is_finished() {
                *state = SequencerState::Stopped;
            }
        }
        self.lease.lock().await.take();
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ScanSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSequencer")
            .field("laser", &self.spec.laser)
            .field("shutter_daq", &self.shutter.daq)
            .field("shutter_port", &self.shutter.port)
            .finish()
    }
}

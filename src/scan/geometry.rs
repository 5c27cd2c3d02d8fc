//! Point counts and timing budgets derived from a scan description.

use crate::error::{ScanError, ScanResult};
use crate::quantity::{Dimension, Quantity};
use crate::scan::spec::{Axis, AxisRange, LaserSweep, ScanSpec};
use serde::Serialize;
use std::time::Duration;

/// Most outer-axis steps a scan may visit. Axis values are built up front.
pub const MAX_AXIS_POINTS: u64 = 1_000_000;

fn too_many_points(points: f64) -> ScanError {
    ScanError::Configuration(format!(
        "outer axis would visit {:.0} points, more than {}",
        points, MAX_AXIS_POINTS
    ))
}

/// Floors a ratio that should be integral, tolerating float error just below
/// the integer (`20 nm / 10 pm` may evaluate to `1999.9999999999998`).
fn floor_count(ratio: f64) -> u64 {
    (ratio + ratio.abs() * 1e-9 + 1e-12).floor().max(0.0) as u64
}

/// Derived sizes and durations of a scan or monitor session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanGeometry {
    /// Trigger pulses per line scan, all sweeps included.
    pub wavelength_points: u64,
    /// Steps of the outer axis (`floor(span / step)`, or the time-axis count).
    pub axis_points: u64,
    /// Outer-axis values actually visited.
    pub visited_points: u64,
    /// Expected time between two trigger pulses.
    pub accuracy: Quantity,
    /// Duration of one sweep.
    pub approx_time_to_scan: Quantity,
    /// Duration of one line scan, all sweeps included.
    pub line_scan_time: Quantity,
    /// Outer-axis values in visiting order.
    pub axis_values: Vec<Quantity>,
}

struct SweepTiming {
    points_per_sweep: u64,
    accuracy: Quantity,
    approx_time_to_scan: Quantity,
}

fn sweep_timing(sweep: &LaserSweep) -> ScanResult<SweepTiming> {
    let span = sweep
        .stop_wavelength
        .checked_sub(&sweep.start_wavelength)
        .map_err(|e| ScanError::Configuration(format!("wavelength range: {}", e)))?;
    if span.magnitude() <= 0.0 {
        return Err(ScanError::Configuration(format!(
            "stop wavelength {} must be above start wavelength {}",
            sweep.stop_wavelength, sweep.start_wavelength
        )));
    }
    if sweep.interval_trigger.magnitude() <= 0.0 {
        return Err(ScanError::Configuration(format!(
            "interval_trigger {} must be positive",
            sweep.interval_trigger
        )));
    }
    let points_per_sweep = floor_count(
        span.ratio(&sweep.interval_trigger)
            .map_err(|e| ScanError::Configuration(format!("interval_trigger: {}", e)))?,
    );

    if sweep.wavelength_speed.magnitude() <= 0.0 {
        return Err(ScanError::Configuration(format!(
            "wavelength_speed {} must be positive",
            sweep.wavelength_speed
        )));
    }
    let accuracy = sweep.interval_trigger.divide(&sweep.wavelength_speed)?;
    if accuracy.dimension() != Dimension::TIME {
        return Err(ScanError::Configuration(format!(
            "wavelength_speed {} is not a length per time",
            sweep.wavelength_speed
        )));
    }
    let approx_time_to_scan = span.divide(&sweep.wavelength_speed)?;

    Ok(SweepTiming {
        points_per_sweep,
        accuracy,
        approx_time_to_scan,
    })
}

fn span_values(start: &Quantity, stop: &Quantity, step: &Quantity) -> ScanResult<(u64, Vec<Quantity>)> {
    let span = stop
        .checked_sub(start)
        .map_err(|e| ScanError::Configuration(format!("axis range: {}", e)))?;
    if span.magnitude() < 0.0 {
        return Err(ScanError::Configuration(format!(
            "axis stop {} is below start {}",
            stop, start
        )));
    }
    if step.magnitude() <= 0.0 {
        return Err(ScanError::Configuration(format!(
            "axis step {} must be positive",
            step
        )));
    }
    let ratio = span
        .ratio(step)
        .map_err(|e| ScanError::Configuration(format!("axis step: {}", e)))?;
    if !ratio.is_finite() || ratio >= MAX_AXIS_POINTS as f64 {
        return Err(too_many_points(ratio));
    }
    let axis_points = floor_count(ratio);

    // Evenly spaced from start to stop inclusive, in start's unit.
    let stop_in_start_unit = stop.m_as(start.unit().symbol())?;
    let first = start.magnitude();
    let values = (0..=axis_points)
        .map(|i| {
            let magnitude = if i == axis_points {
                stop_in_start_unit
            } else {
                first + (stop_in_start_unit - first) * i as f64 / axis_points as f64
            };
            start.with_magnitude(magnitude)
        })
        .collect();
    Ok((axis_points, values))
}

impl ScanGeometry {
    /// Geometry of a 1D or 2D scan. The sweep count is normalized first, so an
    /// absent or zero count is treated as one sweep.
    pub fn for_scan(spec: &ScanSpec) -> ScanResult<Self> {
        let sweep = spec.sweep.normalized();
        let sweeps = sweep.sweeps();
        let timing = sweep_timing(&sweep)?;

        let (axis_points, axis_values) = match (&spec.axis, &spec.range) {
            (Axis::Device { .. }, AxisRange::Span { start, stop, step }) => {
                span_values(start, stop, step)?
            }
            (Axis::Time, AxisRange::Count { points: 0 }) => {
                return Err(ScanError::Configuration(
                    "a time axis needs at least one point".into(),
                ))
            }
            (Axis::Time, AxisRange::Count { points }) => {
                let n = u64::from(*points);
                if n > MAX_AXIS_POINTS {
                    return Err(too_many_points(n as f64));
                }
                let values = (1..=n).map(|i| Quantity::count(i as f64)).collect();
                (n, values)
            }
            _ => {
                return Err(ScanError::Configuration(
                    "axis and range kinds do not match".into(),
                ))
            }
        };

        Ok(Self {
            wavelength_points: timing.points_per_sweep * u64::from(sweeps),
            axis_points,
            visited_points: axis_values.len() as u64,
            accuracy: timing.accuracy,
            line_scan_time: timing.approx_time_to_scan.scale(f64::from(sweeps)),
            approx_time_to_scan: timing.approx_time_to_scan,
            axis_values,
        })
    }

    /// Geometry of a continuous monitor session: one line of
    /// `floor(span / interval)` points and no outer axis.
    pub fn for_monitor(sweep: &LaserSweep) -> ScanResult<Self> {
        let timing = sweep_timing(sweep)?;
        Ok(Self {
            wavelength_points: timing.points_per_sweep,
            axis_points: 0,
            visited_points: 0,
            accuracy: timing.accuracy,
            line_scan_time: timing.approx_time_to_scan.clone(),
            approx_time_to_scan: timing.approx_time_to_scan,
            axis_values: Vec::new(),
        })
    }

    /// Points per channel a DAQ task must hold for the whole scan.
    pub fn scan_daq_points(&self) -> u64 {
        self.wavelength_points * self.visited_points.max(1)
    }

    /// [`line_scan_time`](Self::line_scan_time) as a [`Duration`].
    pub fn line_scan_duration(&self) -> ScanResult<Duration> {
        self.line_scan_time.as_duration()
    }
}

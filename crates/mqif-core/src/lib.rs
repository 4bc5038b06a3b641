//! # MQIF Core
//!
//! Shared types and utilities for multi-quadratic integrate-and-fire simulation.
//!
//! ## Contents
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`MqifError`] | Caller-input and configuration errors |
//! | [`RunConfig`] | Fixed-step timebase (`dt`, `num_steps`) |
//! | [`OdeSystem`] | Right-hand side of a fixed-dimension ODE |
//! | [`TimeSeries`] | Named, unit-tagged samples on a time axis |
//!
//! ## Design Philosophy
//!
//! 1. Preserve numerical equivalence with the reference model
//! 2. Validate caller input once, before any integration starts
//! 3. No global state: every run is described by explicit values

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common errors
#[derive(Debug, Error)]
pub enum MqifError {
    #[error("Invalid step size: dt must be positive and finite, got {0}")]
    InvalidStepSize(f64),

    #[error("Invalid step count: num_steps must be at least 1, got {0}")]
    InvalidStepCount(usize),

    #[error("Input length mismatch: expected at least {expected} current samples, got {got}")]
    InputLengthMismatch { expected: usize, got: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MqifError>;

/// Time point
pub type Time = f64;

/// Voltage (mV)
pub type Voltage = f64;

/// Current (mA/nF)
pub type Current = f64;

/// Conductance
pub type Conductance = f64;

/// Capacitance
pub type Capacitance = f64;

/// Time series data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Time points
    pub time: Vec<Time>,
    /// Values at each time point
    pub values: Vec<f64>,
    /// Variable name
    pub name: String,
    /// Units
    pub units: Option<String>,
}

impl TimeSeries {
    /// Build a series from uniformly spaced samples, `time[i] = i * dt`.
    pub fn from_samples(name: &str, units: Option<&str>, dt: Time, samples: &[f64]) -> Self {
        Self {
            time: (0..samples.len()).map(|i| i as f64 * dt).collect(),
            values: samples.to_vec(),
            name: name.to_string(),
            units: units.map(str::to_string),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Column header, e.g. `v (mV)`.
    pub fn header(&self) -> String {
        match &self.units {
            Some(units) => format!("{} ({})", self.name, units),
            None => self.name.clone(),
        }
    }
}

/// ODE system trait (for fixed-dimension models)
pub trait OdeSystem<const N: usize> {
    /// Compute derivatives: dy/dt = f(y, I)
    fn derivatives(&self, y: &[f64; N], input: Current) -> [f64; N];

    /// Forward-Euler candidate `y + dt * f(y, I)`.
    fn euler_step(&self, y: &[f64; N], input: Current, dt: Time) -> [f64; N] {
        let dy = self.derivatives(y, input);
        let mut next = *y;
        for (value, rate) in next.iter_mut().zip(dy) {
            *value += dt * rate;
        }
        next
    }
}

/// Fixed-step timebase for one simulation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of integration steps (and samples per output series)
    pub num_steps: usize,
    /// Time step
    pub dt: Time,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_runtime(10.0, 1e-4)
    }
}

impl RunConfig {
    pub fn new(num_steps: usize, dt: Time) -> Self {
        Self { num_steps, dt }
    }

    /// Timebase covering `runtime`, truncated to a whole number of steps.
    pub fn from_runtime(runtime: Time, dt: Time) -> Self {
        let num_steps = if dt > 0.0 && runtime > 0.0 {
            (runtime / dt).floor() as usize
        } else {
            0
        };
        Self { num_steps, dt }
    }

    /// Total simulated time
    pub fn duration(&self) -> Time {
        self.num_steps as f64 * self.dt
    }

    /// Reporting axis, `step_index * dt`.
    pub fn time_axis(&self) -> Array1<Time> {
        Array1::from_iter((0..self.num_steps).map(|i| i as f64 * self.dt))
    }

    /// Check the timebase against an input sequence of `input_len` samples.
    pub fn validate(&self, input_len: usize) -> Result<()> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(MqifError::InvalidStepSize(self.dt));
        }
        if self.num_steps < 1 {
            return Err(MqifError::InvalidStepCount(self.num_steps));
        }
        if input_len < self.num_steps {
            return Err(MqifError::InputLengthMismatch {
                expected: self.num_steps,
                got: input_len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;

    impl OdeSystem<2> for Decay {
        fn derivatives(&self, y: &[f64; 2], input: Current) -> [f64; 2] {
            [-y[0] + input, -2.0 * y[1]]
        }
    }

    #[test]
    fn test_euler_step() {
        let next = Decay.euler_step(&[1.0, 1.0], 0.5, 0.1);
        assert_eq!(next, [1.0 + 0.1 * -0.5, 1.0 + 0.1 * -2.0]);
    }

    #[test]
    fn test_run_config_from_runtime() {
        let run = RunConfig::from_runtime(10.0, 1e-4);
        assert_eq!(run.num_steps, 100_000);
        assert_eq!(RunConfig::new(4, 0.5).duration(), 2.0);
        assert_eq!(RunConfig::from_runtime(1.0, 0.0).num_steps, 0);
    }

    #[test]
    fn test_validate() {
        assert!(RunConfig::new(10, 0.1).validate(10).is_ok());
        assert!(matches!(
            RunConfig::new(10, 0.0).validate(10),
            Err(MqifError::InvalidStepSize(_))
        ));
        assert!(matches!(
            RunConfig::new(10, f64::NAN).validate(10),
            Err(MqifError::InvalidStepSize(_))
        ));
        assert!(matches!(
            RunConfig::new(0, 0.1).validate(10),
            Err(MqifError::InvalidStepCount(0))
        ));
        assert!(matches!(
            RunConfig::new(10, 0.1).validate(9),
            Err(MqifError::InputLengthMismatch { expected: 10, got: 9 })
        ));
    }

    #[test]
    fn test_time_axis() {
        let axis = RunConfig::new(4, 0.5).time_axis();
        assert_eq!(axis.to_vec(), vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_time_series() {
        let ts = TimeSeries::from_samples("v", Some("mV"), 0.5, &[1.0, 2.0, 3.0]);
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.time, vec![0.0, 0.5, 1.0]);
        assert_eq!(ts.header(), "v (mV)");

        let spikes = TimeSeries::from_samples("spike", None, 0.5, &[]);
        assert!(spikes.is_empty());
        assert_eq!(spikes.header(), "spike");
    }
}

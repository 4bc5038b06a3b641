//! # MQIF-RS: Multi-Quadratic Integrate-and-Fire Bursting
//!
//! A three-variable integrate-and-fire neuron with quadratic fast, slow and
//! ultraslow feedback. The slow variable shapes individual spikes, the
//! ultraslow variable accumulates across spikes and terminates bursts.
//!
//! This crate provides:
//! - Model parameters and state ([`MqifParams`], [`MqifState`])
//! - Forward-Euler integration with spike reset and a burst-position spike log
//! - Burst characterisation (frequency, spikes per burst, duration, duty cycle)
//! - Input current waveforms
//! - TOML experiment configuration and parallel parameter sweeps
//!
//! ## Equations
//!
//! ```text
//! C dV/dt   = k (I + g_f (V - V0)^2 - g_s (Vs - Vs0)^2 - g_us (Vus - Vus0)^2)
//! dVs/dt    = k (V - Vs) / tau_s
//! dVus/dt   = k (V - Vus) / tau_us
//! if V > V_threshold: V = V_reset, Vs = Vs_reset, Vus += delta_Vus
//! ```
//!
//! ## Operational caveat
//!
//! The step size is never checked for stability. A `dt` that is too large
//! (0.1 already is, for the default parameters) silently yields an inaccurate
//! or diverging trajectory. [`Trajectory::divergence`] flags runaway state but
//! does not stop the run.

use mqif_core::{
    Capacitance, Conductance, Current, MqifError, OdeSystem, Result, RunConfig, Time,
    TimeSeries, Voltage,
};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// MODEL PARAMETERS
// ============================================================================

/// MQIF model parameters, fixed for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqifParams {
    pub v_threshold: Voltage, // Spike cutoff (mV)
    pub v_reset: Voltage,     // V after a spike (mV)
    pub vs_reset: Voltage,    // Vs after a spike (mV)
    pub delta_vus: Voltage,   // Vus jump per spike (mV)
    pub g_f: Conductance,     // Fast
    pub g_s: Conductance,     // Slow
    pub g_us: Conductance,    // Ultraslow
    pub tau_s: Time,
    pub tau_us: Time,
    pub c: Capacitance,
    pub v0: Voltage,
    pub vs0: Voltage,
    pub vus0: Voltage,
}

impl Default for MqifParams {
    fn default() -> Self {
        Self {
            v_threshold: 20.0,
            v_reset: -45.0,
            vs_reset: 7.5,
            delta_vus: 1.7,
            g_f: 1.0,
            g_s: 0.5,
            g_us: 0.015,
            tau_s: 4.3,
            tau_us: 278.0,
            c: 0.82,
            v0: -52.0,
            vs0: -50.0,
            vus0: -52.0,
        }
    }
}

impl MqifParams {
    /// Names accepted by [`MqifParams::get`] and [`MqifParams::set`]
    pub const NAMES: [&'static str; 13] = [
        "v_threshold",
        "v_reset",
        "vs_reset",
        "delta_vus",
        "g_f",
        "g_s",
        "g_us",
        "tau_s",
        "tau_us",
        "c",
        "v0",
        "vs0",
        "vus0",
    ];

    fn slot(&mut self, name: &str) -> Option<&mut f64> {
        let slot = match name {
            "v_threshold" => &mut self.v_threshold,
            "v_reset" => &mut self.v_reset,
            "vs_reset" => &mut self.vs_reset,
            "delta_vus" => &mut self.delta_vus,
            "g_f" => &mut self.g_f,
            "g_s" => &mut self.g_s,
            "g_us" => &mut self.g_us,
            "tau_s" => &mut self.tau_s,
            "tau_us" => &mut self.tau_us,
            "c" => &mut self.c,
            "v0" => &mut self.v0,
            "vs0" => &mut self.vs0,
            "vus0" => &mut self.vus0,
            _ => return None,
        };
        Some(slot)
    }

    /// Get parameter value
    pub fn get(&self, name: &str) -> Option<f64> {
        let mut copy = *self;
        copy.slot(name).map(|v| *v)
    }

    /// Set parameter value
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        match self.slot(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(MqifError::Config(format!("Parameter {} not found", name))),
        }
    }
}

/// State vector `(V, Vs, Vus)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqifState {
    pub v: Voltage,
    pub vs: Voltage,
    pub vus: Voltage,
}

impl Default for MqifState {
    fn default() -> Self {
        Self {
            v: -52.0,
            vs: -50.0,
            vus: -52.0,
        }
    }
}

impl MqifState {
    pub fn new(v: Voltage, vs: Voltage, vus: Voltage) -> Self {
        Self { v, vs, vus }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.v, self.vs, self.vus]
    }
}

/// Right-hand side of the MQIF equations, scaled by `time_scale`
#[derive(Debug, Clone, Copy)]
pub struct MqifModel {
    pub params: MqifParams,
    pub time_scale: f64,
}

impl MqifModel {
    pub fn new(params: MqifParams, time_scale: f64) -> Self {
        Self { params, time_scale }
    }
}

impl OdeSystem<3> for MqifModel {
    fn derivatives(&self, y: &[f64; 3], input: Current) -> [f64; 3] {
        let p = &self.params;
        let k = self.time_scale;
        let [v, vs, vus] = *y;

        let dv = k
            * (input + p.g_f * (v - p.v0).powi(2)
                - p.g_s * (vs - p.vs0).powi(2)
                - p.g_us * (vus - p.vus0).powi(2))
            / p.c;
        let dvs = k * (v - vs) / p.tau_s;
        let dvus = k * (v - vus) / p.tau_us;

        [dv, dvs, dvus]
    }
}

// ============================================================================
// INTEGRATOR
// ============================================================================

/// Unit conversion between the model's natural time constant and `dt`.
/// Known parameter sets are tuned against this exact value.
pub const DEFAULT_TIME_SCALE: f64 = 250.0;

/// Silent steps, as a fraction of the whole run, after which a burst is over.
/// Empirical: its effect in seconds scales with `num_steps * dt`.
pub const DEFAULT_SILENCE_FRACTION: f64 = 0.04;

/// State magnitude past which a run is flagged as diverging.
pub const DEFAULT_DIVERGENCE_BOUND: f64 = 1e6;

/// Integrator knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    pub time_scale: f64,
    pub silence_fraction: f64,
    pub divergence_bound: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            time_scale: DEFAULT_TIME_SCALE,
            silence_fraction: DEFAULT_SILENCE_FRACTION,
            divergence_bound: DEFAULT_DIVERGENCE_BOUND,
        }
    }
}

/// Output of one run: three state series and the spike log, all `num_steps` long
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub dt: Time,
    pub v: Array1<f64>,
    pub vs: Array1<f64>,
    pub vus: Array1<f64>,
    /// 0 = no spike, k > 0 = k-th spike of the current burst
    pub spikes: Vec<u32>,
    /// First step whose state was non-finite or beyond the divergence bound
    pub divergence: Option<usize>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.spikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    /// Reporting axis, `step_index * dt`
    pub fn time(&self) -> Array1<Time> {
        RunConfig::new(self.len(), self.dt).time_axis()
    }

    pub fn spike_count(&self) -> usize {
        self.spikes.iter().filter(|&&s| s > 0).count()
    }

    /// Step indices at which a spike was logged
    pub fn spike_steps(&self) -> Vec<usize> {
        self.spikes
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| (s > 0).then_some(i))
            .collect()
    }

    pub fn state_at(&self, step: usize) -> Option<MqifState> {
        (step < self.len()).then(|| MqifState::new(self.v[step], self.vs[step], self.vus[step]))
    }

    /// State variables and spike log as named time series
    pub fn series(&self) -> Vec<TimeSeries> {
        let spikes: Vec<f64> = self.spikes.iter().map(|&s| f64::from(s)).collect();
        vec![
            TimeSeries::from_samples("v", Some("mV"), self.dt, &self.v.to_vec()),
            TimeSeries::from_samples("vs", Some("mV"), self.dt, &self.vs.to_vec()),
            TimeSeries::from_samples("vus", Some("mV"), self.dt, &self.vus.to_vec()),
            TimeSeries::from_samples("spike", None, self.dt, &spikes),
        ]
    }
}

/// Forward-Euler integrator with spike reset and burst-position logging
#[derive(Debug, Clone, Copy, Default)]
pub struct Integrator {
    pub config: IntegratorConfig,
}

impl Integrator {
    pub fn new(config: IntegratorConfig) -> Self {
        Self { config }
    }

    /// Integrate `run.num_steps` steps from `initial`, reading `current[i]` at step `i`.
    pub fn integrate(
        &self,
        run: &RunConfig,
        initial: &MqifState,
        current: &[Current],
        params: &MqifParams,
    ) -> Result<Trajectory> {
        run.validate(current.len())?;

        let RunConfig { num_steps, dt } = *run;
        let model = MqifModel::new(*params, self.config.time_scale);
        let silence_window = self.config.silence_fraction * num_steps as f64;
        let bound = self.config.divergence_bound;
        debug!(num_steps, dt, silence_window, "Starting MQIF integration");
        let started = Instant::now();

        let mut v: Array1<f64> = Array1::zeros(num_steps);
        let mut vs: Array1<f64> = Array1::zeros(num_steps);
        let mut vus: Array1<f64> = Array1::zeros(num_steps);
        let mut spikes = vec![0u32; num_steps];
        let mut divergence = None;

        let mut state = initial.to_array();
        v[0] = initial.v;
        vs[0] = initial.vs;
        vus[0] = initial.vus;

        let mut silent_steps = 0usize;
        let mut num_in_burst = 0u32;

        for i in 0..num_steps - 1 {
            let [v_new, vs_new, vus_new] = model.euler_step(&state, current[i], dt);

            state = if v_new > params.v_threshold {
                num_in_burst += 1;
                spikes[i] = num_in_burst;
                silent_steps = 0;
                [params.v_reset, params.vs_reset, vus_new + params.delta_vus]
            } else {
                silent_steps += 1;
                [v_new, vs_new, vus_new]
            };

            if silent_steps as f64 > silence_window {
                num_in_burst = 0;
            }

            if divergence.is_none() && state.iter().any(|x| !x.is_finite() || x.abs() > bound) {
                warn!(
                    step = i + 1,
                    time = (i + 1) as f64 * dt,
                    "State left the divergence bound {}; dt may be too large",
                    bound
                );
                divergence = Some(i + 1);
            }

            v[i + 1] = state[0];
            vs[i + 1] = state[1];
            vus[i + 1] = state[2];
        }

        let trajectory = Trajectory {
            dt,
            v,
            vs,
            vus,
            spikes,
            divergence,
        };
        info!(
            "Integration completed: {} spikes in {} steps ({:.3?})",
            trajectory.spike_count(),
            num_steps,
            started.elapsed()
        );

        Ok(trajectory)
    }
}

/// Integrate with the default [`IntegratorConfig`]
pub fn integrate(
    num_steps: usize,
    dt: Time,
    initial: &MqifState,
    current: &[Current],
    params: &MqifParams,
) -> Result<Trajectory> {
    Integrator::default().integrate(&RunConfig::new(num_steps, dt), initial, current, params)
}

// ============================================================================
// BURST CHARACTERISATION
// ============================================================================

/// Burst starts needed before statistics are computed. The first burst is a
/// transient; the second and third starts delimit one representative period.
pub const MIN_BURST_STARTS: usize = 3;

/// Period used for the duty cycle when no period was measured
const FALLBACK_PERIOD: Time = 1.0;

/// Summary of periodic bursting
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstStats {
    /// Hz; 0 means no periodic bursting was detected
    pub frequency: f64,
    pub spikes_per_burst: u32,
    pub burst_duration: Time,
    /// Percent of the period spent bursting
    pub duty_cycle: f64,
}

impl BurstStats {
    pub fn is_bursting(&self) -> bool {
        self.frequency > 0.0
    }
}

impl fmt::Display for BurstStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frequency: {} Hz, Spikes per Burst: {}, Duration: {} s, Duty Cycle: {} %",
            self.frequency, self.spikes_per_burst, self.burst_duration, self.duty_cycle
        )
    }
}

/// Indices where a burst begins (spike log value 1)
pub fn burst_starts(spike_log: &[u32]) -> Vec<usize> {
    spike_log
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| (s == 1).then_some(i))
        .collect()
}

/// Characterise bursting from a spike log produced by [`Integrator::integrate`].
pub fn characterize(dt: Time, spike_log: &[u32]) -> BurstStats {
    let starts = burst_starts(spike_log);
    let mut stats = BurstStats::default();
    let mut time_period = FALLBACK_PERIOD;

    if starts.len() >= MIN_BURST_STARTS {
        let (begin, end) = (starts[1], starts[2]);
        time_period = (end - begin) as f64 * dt;
        stats.frequency = 1.0 / time_period;

        let single_burst = &spike_log[begin..end];
        let (peak_offset, peak) = first_max(single_burst);
        stats.spikes_per_burst = peak;
        stats.burst_duration = peak_offset as f64 * dt;
    } else if starts.len() == 1 {
        // Spiking, but not bursting
        stats.spikes_per_burst = 1;
    }

    stats.duty_cycle = stats.burst_duration * 100.0 / time_period;
    stats
}

/// Offset and value of the first maximum
fn first_max(values: &[u32]) -> (usize, u32) {
    values
        .iter()
        .enumerate()
        .fold((0, 0), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
}

// ============================================================================
// INPUT WAVEFORMS
// ============================================================================

/// External current waveform, sampled once per step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Waveform {
    /// Same current at every step
    Constant { amplitude: Current },

    /// Zero, then `amplitude` from step `num_steps / onset_divisor` on
    Step {
        amplitude: Current,
        #[serde(default = "default_onset_divisor")]
        onset_divisor: usize,
    },

    /// Linear from `start` at the first step to `end` at the last
    Ramp { start: Current, end: Current },

    /// offset + amplitude * sin(2 pi frequency t)
    Sine {
        offset: Current,
        amplitude: Current,
        frequency: f64,
    },

    /// `amplitude` for `width` at the start of every `period`
    PulseTrain {
        amplitude: Current,
        period: Time,
        width: Time,
    },
}

fn default_onset_divisor() -> usize {
    6
}

impl Default for Waveform {
    fn default() -> Self {
        Self::Step {
            amplitude: 5.0,
            onset_divisor: default_onset_divisor(),
        }
    }
}

impl Waveform {
    /// One current sample per step of `run`
    pub fn sample(&self, run: &RunConfig) -> Array1<Current> {
        let n = run.num_steps;
        let dt = run.dt;

        match *self {
            Self::Constant { amplitude } => Array1::from_elem(n, amplitude),
            Self::Step {
                amplitude,
                onset_divisor,
            } => {
                let onset = n / onset_divisor.max(1);
                Array1::from_iter((0..n).map(|i| if i >= onset { amplitude } else { 0.0 }))
            }
            Self::Ramp { start, end } => {
                let span = n.saturating_sub(1).max(1) as f64;
                Array1::from_iter((0..n).map(|i| start + (end - start) * i as f64 / span))
            }
            Self::Sine {
                offset,
                amplitude,
                frequency,
            } => Array1::from_iter((0..n).map(|i| {
                let t = i as f64 * dt;
                offset + amplitude * (std::f64::consts::TAU * frequency * t).sin()
            })),
            Self::PulseTrain {
                amplitude,
                period,
                width,
            } => {
                if period <= 0.0 {
                    return Array1::zeros(n);
                }
                Array1::from_iter((0..n).map(|i| {
                    let t = i as f64 * dt;
                    if t % period < width {
                        amplitude
                    } else {
                        0.0
                    }
                }))
            }
        }
    }

    /// Replace the waveform's strength (`end` for a ramp).
    pub fn with_amplitude(self, value: Current) -> Self {
        match self {
            Self::Constant { .. } => Self::Constant { amplitude: value },
            Self::Step { onset_divisor, .. } => Self::Step {
                amplitude: value,
                onset_divisor,
            },
            Self::Ramp { start, .. } => Self::Ramp { start, end: value },
            Self::Sine {
                offset, frequency, ..
            } => Self::Sine {
                offset,
                amplitude: value,
                frequency,
            },
            Self::PulseTrain { period, width, .. } => Self::PulseTrain {
                amplitude: value,
                period,
                width,
            },
        }
    }
}

// ============================================================================
// EXPERIMENT CONFIGURATION
// ============================================================================

/// `[run]` section: timebase in simulated time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub dt: Time,
    pub runtime: Time,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            dt: 1e-4,
            runtime: 10.0,
        }
    }
}

impl RunSection {
    pub fn timebase(&self) -> RunConfig {
        RunConfig::from_runtime(self.runtime, self.dt)
    }
}

/// Everything needed to reproduce one simulation + characterisation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub run: RunSection,
    pub model: MqifParams,
    pub initial: MqifState,
    pub stimulus: Waveform,
    pub integrator: IntegratorConfig,
}

/// Result of [`ExperimentConfig::run`]
#[derive(Debug, Clone, Serialize)]
pub struct Experiment {
    pub current: Array1<Current>,
    pub trajectory: Trajectory,
    pub stats: BurstStats,
    /// Wall-clock seconds for simulation plus characterisation
    pub elapsed: f64,
}

/// Sweepable name for the stimulus strength
pub const AMPLITUDE: &str = "amplitude";

impl ExperimentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MqifError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MqifError::Config(e.to_string()))
    }

    /// Copy with one named parameter replaced: [`AMPLITUDE`] or any of
    /// [`MqifParams::NAMES`].
    pub fn with_parameter(&self, name: &str, value: f64) -> Result<Self> {
        let mut config = self.clone();
        if name == AMPLITUDE {
            config.stimulus = config.stimulus.with_amplitude(value);
        } else {
            config.model.set(name, value)?;
        }
        Ok(config)
    }

    /// Sample the stimulus, integrate and characterise.
    pub fn run(&self) -> Result<Experiment> {
        let started = Instant::now();
        let run = self.run.timebase();
        let current = self.stimulus.sample(&run);

        let trajectory = Integrator::new(self.integrator).integrate(
            &run,
            &self.initial,
            &current.to_vec(),
            &self.model,
        )?;
        let stats = characterize(run.dt, &trajectory.spikes);
        debug!(%stats, "Characterised spike train");

        Ok(Experiment {
            current,
            trajectory,
            stats,
            elapsed: started.elapsed().as_secs_f64(),
        })
    }
}

// ============================================================================
// PARAMETER SWEEPS
// ============================================================================

/// One sweep sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub value: f64,
    pub stats: BurstStats,
    pub spike_count: usize,
    pub diverged: bool,
}

/// `points` evenly spaced values from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Run one independent experiment per value, in parallel; output follows `values`.
pub fn sweep(config: &ExperimentConfig, parameter: &str, values: &[f64]) -> Result<Vec<SweepPoint>> {
    sweep_with_progress(config, parameter, values, |_| {})
}

/// [`sweep`], calling `progress` as each point finishes (in completion order).
pub fn sweep_with_progress<F>(
    config: &ExperimentConfig,
    parameter: &str,
    values: &[f64],
    progress: F,
) -> Result<Vec<SweepPoint>>
where
    F: Fn(&SweepPoint) + Sync,
{
    let configs = values
        .iter()
        .map(|&value| config.with_parameter(parameter, value).map(|c| (value, c)))
        .collect::<Result<Vec<_>>>()?;
    debug!(parameter, points = configs.len(), "Starting parameter sweep");

    configs
        .par_iter()
        .map(|(value, config)| -> Result<SweepPoint> {
            let experiment = config.run()?;
            let point = SweepPoint {
                value: *value,
                stats: experiment.stats,
                spike_count: experiment.trajectory.spike_count(),
                diverged: experiment.trajectory.divergence.is_some(),
            };
            progress(&point);
            Ok(point)
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

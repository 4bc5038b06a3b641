//! Property tests for the integrator and the burst characteriser
//!
//! Tests cover:
//! - Output lengths and initial values
//! - Spike log domain and exact reset values
//! - Burst-position counter monotonicity
//! - Determinism of repeated runs

use mqif_model::{characterize, integrate, BurstStats, MqifParams, MqifState};
use proptest::prelude::*;

fn run_inputs() -> impl Strategy<Value = (f64, MqifState, Vec<f64>)> {
    (
        1e-5f64..1e-4,
        -60.0f64..-40.0,
        -60.0f64..-40.0,
        -60.0f64..-40.0,
        prop::collection::vec(-20.0f64..40.0, 1..400),
    )
        .prop_map(|(dt, v, vs, vus, current)| (dt, MqifState::new(v, vs, vus), current))
}

proptest! {
    #[test]
    fn prop_lengths_and_initial_values((dt, initial, current) in run_inputs()) {
        let n = current.len();
        let traj = integrate(n, dt, &initial, &current, &MqifParams::default()).unwrap();

        prop_assert_eq!(traj.v.len(), n);
        prop_assert_eq!(traj.vs.len(), n);
        prop_assert_eq!(traj.vus.len(), n);
        prop_assert_eq!(traj.spikes.len(), n);
        prop_assert_eq!(traj.state_at(0), Some(initial));
    }

    #[test]
    fn prop_spikes_reset_exactly((dt, initial, current) in run_inputs()) {
        let params = MqifParams::default();
        let traj = integrate(current.len(), dt, &initial, &current, &params).unwrap();

        prop_assert_eq!(traj.spikes.last().copied(), Some(0));
        for i in traj.spike_steps() {
            prop_assert_eq!(traj.v[i + 1], params.v_reset);
            prop_assert_eq!(traj.vs[i + 1], params.vs_reset);
        }
    }

    #[test]
    fn prop_burst_counter_counts_up((dt, initial, current) in run_inputs()) {
        let traj = integrate(current.len(), dt, &initial, &current, &MqifParams::default()).unwrap();

        let mut previous = 0;
        for &k in traj.spikes.iter().filter(|&&k| k > 0) {
            prop_assert!(k == 1 || k == previous + 1, "{} after {}", k, previous);
            previous = k;
        }
    }

    #[test]
    fn prop_runs_are_deterministic((dt, initial, current) in run_inputs()) {
        let params = MqifParams::default();
        let first = integrate(current.len(), dt, &initial, &current, &params).unwrap();
        let second = integrate(current.len(), dt, &initial, &current, &params).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(characterize(dt, &first.spikes), characterize(dt, &second.spikes));
    }

    #[test]
    fn prop_characterize_without_starts_is_default(log in prop::collection::vec(0u32..6, 0..200)) {
        let log: Vec<u32> = log.into_iter().map(|k| if k == 1 { 0 } else { k }).collect();
        prop_assert_eq!(characterize(1e-3, &log), BurstStats::default());
    }

    #[test]
    fn prop_duty_cycle_within_period(gap in 2usize..60, peak in 1u32..10, dt in 1e-5f64..1e-2) {
        let mut log = vec![0u32; 3 * gap + 1];
        for start in [0, gap, 2 * gap] {
            log[start] = 1;
        }
        let offset = (peak as usize).min(gap - 1);
        if offset > 0 {
            log[gap + offset] = peak + 1;
        }

        let stats = characterize(dt, &log);
        prop_assert!(stats.frequency > 0.0);
        prop_assert!(stats.duty_cycle >= 0.0 && stats.duty_cycle < 100.0);
    }
}

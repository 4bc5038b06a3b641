//! # MQIF CLI
//!
//! Command-line interface for MQIF bursting simulations.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use csv::Writer;
use indicatif::{ProgressBar, ProgressStyle};
use mqif_core::TimeSeries;
use mqif_model::{linspace, sweep_with_progress, ExperimentConfig, MqifParams, AMPLITUDE};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mqif")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Multi-quadratic integrate-and-fire bursting toolkit", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate once and characterise the bursts
    Run {
        /// Experiment file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Time step override
        #[arg(long)]
        dt: Option<f64>,
        /// Simulated time override
        #[arg(long)]
        runtime: Option<f64>,
        /// Stimulus amplitude override
        #[arg(short, long, allow_negative_numbers = true)]
        amplitude: Option<f64>,
        /// Write time, current and state series as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the burst statistics as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Characterise bursting across a range of one parameter
    Sweep {
        /// Model parameter name, or "amplitude"
        #[arg(short, long)]
        parameter: String,
        #[arg(long, allow_negative_numbers = true)]
        start: f64,
        #[arg(long, allow_negative_numbers = true)]
        end: f64,
        /// Number of values, endpoints included
        #[arg(short = 'n', long, default_value_t = 11)]
        points: usize,
        /// Experiment file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default experiment as TOML
    Params,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    if let Err(err) = execute(cli.command) {
        error!("Command failed: {:#}", err);
        std::process::exit(1);
    }
}

fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            config,
            dt,
            runtime,
            amplitude,
            output,
            json,
        } => {
            let mut experiment = load_config(config.as_deref())?;
            if let Some(dt) = dt {
                experiment.run.dt = dt;
            }
            if let Some(runtime) = runtime {
                experiment.run.runtime = runtime;
            }
            if let Some(amplitude) = amplitude {
                experiment = experiment.with_parameter(AMPLITUDE, amplitude)?;
            }

            let timebase = experiment.run.timebase();
            println!(
                "{} {} steps, dt = {}, {} s simulated",
                "Simulating MQIF neuron:".green().bold(),
                timebase.num_steps,
                timebase.dt,
                timebase.duration()
            );
            let result = experiment.run()?;
            let stats = result.stats;

            println!();
            println!("  {:<18} {} Hz", "Frequency".cyan(), stats.frequency);
            println!("  {:<18} {}", "Spikes per burst".cyan(), stats.spikes_per_burst);
            println!("  {:<18} {} s", "Burst duration".cyan(), stats.burst_duration);
            println!("  {:<18} {} %", "Duty cycle".cyan(), stats.duty_cycle);
            println!(
                "  {:<18} {} spikes, {:.3} s",
                "Run".cyan(),
                result.trajectory.spike_count(),
                result.elapsed
            );
            if !stats.is_bursting() {
                println!("{}", "No periodic bursting detected".yellow());
            }
            if let Some(step) = result.trajectory.divergence {
                println!(
                    "{} state left the sanity bound at step {}; try a smaller dt",
                    "Warning:".yellow().bold(),
                    step
                );
            }

            if let Some(path) = output {
                let current = TimeSeries::from_samples(
                    "current",
                    Some("mA/nF"),
                    timebase.dt,
                    &result.current.to_vec(),
                );
                let mut columns = vec![current];
                columns.extend(result.trajectory.series());
                write_csv_file(&path, &columns)?;
                info!("Wrote time series to {}", path.display());
            }

            if let Some(path) = json {
                let file = File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                serde_json::to_writer_pretty(file, &stats)?;
                info!("Wrote statistics to {}", path.display());
            }
        }

        Commands::Sweep {
            parameter,
            start,
            end,
            points,
            config,
        } => {
            let experiment = load_config(config.as_deref())?;
            if parameter != AMPLITUDE && !MqifParams::NAMES.iter().any(|name| *name == parameter) {
                anyhow::bail!(
                    "unknown parameter {:?}; expected {} or one of {}",
                    parameter,
                    AMPLITUDE,
                    MqifParams::NAMES.join(", ")
                );
            }

            println!(
                "{} {} from {} to {} ({} points)",
                "Sweeping".green().bold(),
                parameter.cyan(),
                start,
                end,
                points
            );
            let values = linspace(start, end, points);
            let bar = ProgressBar::new(values.len() as u64);
            bar.set_style(ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} {elapsed_precise}",
            )?);
            let results = sweep_with_progress(&experiment, &parameter, &values, |_| bar.inc(1))?;
            bar.finish_and_clear();

            println!(
                "{:>12} {:>12} {:>8} {:>12} {:>10} {:>8}",
                parameter, "freq (Hz)", "spikes", "duration", "duty (%)", "total"
            );
            for point in results {
                let line = format!(
                    "{:>12.4} {:>12.4} {:>8} {:>12.5} {:>10.2} {:>8}",
                    point.value,
                    point.stats.frequency,
                    point.stats.spikes_per_burst,
                    point.stats.burst_duration,
                    point.stats.duty_cycle,
                    point.spike_count
                );
                if point.diverged {
                    println!("{}", line.yellow());
                } else {
                    println!("{}", line);
                }
            }
        }

        Commands::Params => {
            print!("{}", ExperimentConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ExperimentConfig> {
    match path {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("loading experiment {}", path.display())),
        None => Ok(ExperimentConfig::default()),
    }
}

fn write_csv_file(path: &Path, columns: &[TimeSeries]) -> anyhow::Result<()> {
    let mut writer =
        Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    write_csv(&mut writer, columns)?;
    writer.flush()?;
    Ok(())
}

/// One row per sample; the time column is taken from the first series.
fn write_csv<W: Write>(writer: &mut Writer<W>, columns: &[TimeSeries]) -> csv::Result<()> {
    let Some(first) = columns.first() else {
        return Ok(());
    };

    let mut header = vec!["time".to_string()];
    header.extend(columns.iter().map(TimeSeries::header));
    writer.write_record(&header)?;

    for (row, t) in first.time.iter().enumerate() {
        let mut record = vec![t.to_string()];
        record.extend(columns.iter().map(|column| {
            column
                .values
                .get(row)
                .map(f64::to_string)
                .unwrap_or_default()
        }));
        writer.write_record(&record)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_csv() {
        let columns = vec![
            TimeSeries::from_samples("current", Some("mA/nF"), 0.5, &[0.0, 5.0]),
            TimeSeries::from_samples("spike", None, 0.5, &[1.0]),
        ];
        let mut writer = Writer::from_writer(vec![]);
        write_csv(&mut writer, &columns).unwrap();

        assert_eq!(
            String::from_utf8(writer.into_inner().unwrap()).unwrap(),
            "time,current (mA/nF),spike\n0,0,1\n0.5,5,\n"
        );
    }

    #[test]
    fn test_write_csv_quotes_headers() {
        let columns = vec![TimeSeries::from_samples("v", Some("mV, soma"), 1.0, &[-52.0])];
        let mut writer = Writer::from_writer(vec![]);
        write_csv(&mut writer, &columns).unwrap();

        assert_eq!(
            String::from_utf8(writer.into_inner().unwrap()).unwrap(),
            "time,\"v (mV, soma)\"\n0,-52\n"
        );
    }

    #[test]
    fn test_write_csv_empty() {
        let mut writer = Writer::from_writer(vec![]);
        write_csv(&mut writer, &[]).unwrap();
        assert!(writer.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_cli_parses_sweep() {
        let cli = Cli::parse_from([
            "mqif", "sweep", "-p", "delta_vus", "--start", "1.0", "--end", "2.0", "-n", "5",
        ]);
        match cli.command {
            Commands::Sweep { parameter, points, .. } => {
                assert_eq!(parameter, "delta_vus");
                assert_eq!(points, 5);
            }
            _ => panic!("expected sweep"),
        }
    }
}

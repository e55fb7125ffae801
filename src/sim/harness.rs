//! CLI entry point for running motion programs against simulated controllers.

use axl_rs::config::{Config, load_config};
use axl_rs::motion::Coordinator;
use axl_rs::sim::build_machine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Runs coordinated motion programs on simulated stepper controllers.")]
pub struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue a square in the first two axes and wait for it to finish
    Square {
        #[arg(long, default_value_t = 10.0)]
        size: f64,
        #[arg(long, default_value_t = 20.0)]
        velocity: f64,
        #[arg(long, default_value_t = 200.0)]
        accel: f64,
        #[arg(long, default_value_t = 1)]
        loops: usize,
    },
    /// Coordinated absolute move (comma-separated target, one value per axis)
    Move {
        #[arg(long, value_delimiter = ',')]
        target: Vec<f64>,
        #[arg(long)]
        velocity: Option<f64>,
        #[arg(long)]
        accel: Option<f64>,
    },
    /// Queue a long program, stop part way through and report where it ended
    Halt {
        #[arg(long, default_value_t = 1500)]
        after_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    config.validate()?;

    let actuators = build_machine(&config)?;
    let mut machine = Coordinator::new(actuators, &config.coordinator)?;
    tracing::info!("Simulated machine with {} axes", machine.actuator_count());

    match cli.command {
        Commands::Square {
            size,
            velocity,
            accel,
            loops,
        } => {
            let axes = machine.actuator_count();
            if axes < 2 {
                return Err("a square needs at least two axes".into());
            }
            let corner = |x: f64, y: f64| {
                let mut p = vec![0.0; axes];
                p[0] = x;
                p[1] = y;
                p
            };
            for _ in 0..loops {
                for (x, y) in [(size, 0.0), (size, size), (0.0, size), (0.0, 0.0)] {
                    let n = machine
                        .add_move_to_queue(&corner(x, y), Some(velocity), Some(accel))
                        .await?;
                    tracing::debug!("Segment {} to ({}, {})", n, x, y);
                }
            }
            machine.drain_queue().await?;
            let stats = machine.queue_stats().await?;
            println!("Retired {} segments ({} stray completions)", stats.retired, stats.ignored_acks);
        }
        Commands::Move {
            target,
            velocity,
            accel,
        } => {
            machine.absolute(&target, velocity, accel).await?;
        }
        Commands::Halt { after_ms } => {
            let axes = machine.actuator_count();
            for i in 1..=20 {
                let target: Vec<f64> = (0..axes).map(|a| (i * (a + 1)) as f64).collect();
                machine.add_move_to_queue(&target, Some(10.0), Some(100.0)).await?;
            }
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            machine.stop().await?;
            let stats = machine.queue_stats().await?;
            println!("Queue after stop: {:?}", stats.state);
            machine.resume_queue().await?;
        }
    }

    let position = machine.get_position().await?;
    let velocity = machine.get_velocity().await?;
    println!("Position: {:?}", position);
    println!("Velocity: {:?}", velocity);
    Ok(())
}

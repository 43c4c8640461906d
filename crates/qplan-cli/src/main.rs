//! qplan CLI: run, validate and explain YAML scenarios.

mod scenario;

use clap::{Parser, Subcommand};
use qplan_core::config::EngineConfig;
use qplan_exec::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::scenario::{parse_scenario, Scenario};

#[derive(Parser)]
#[command(name = "qplan")]
#[command(about = "Plan cache, replanning and join-strategy playground", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every step of a scenario, printing one JSON result per step
    Run {
        /// Path to the scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Engine configuration YAML (overrides the scenario's `config`)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Spill directory for hash joins (overrides config)
        #[arg(long, env = "QPLAN_SPILL_DIR")]
        spill_dir: Option<String>,

        /// Pretty-print results
        #[arg(long)]
        pretty: bool,
    },

    /// Check that a scenario and every pipeline in it parse
    Validate {
        /// Path to the scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Run the steps before `step`, then explain that step's pipeline
    Explain {
        /// Path to the scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Index of an `aggregate` or `explain` step
        #[arg(long)]
        step: usize,

        /// Engine configuration YAML (overrides the scenario's `config`)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            spill_dir,
            pretty,
        } => {
            if let Err(e) = run_scenario(&scenario, config.as_deref(), spill_dir, pretty) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { scenario } => {
            if let Err(e) = validate_scenario(&scenario) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Scenario is valid");
        }
        Commands::Explain {
            scenario,
            step,
            config,
        } => {
            if let Err(e) = explain_step(&scenario, step, config.as_deref()) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load(path: &Path) -> scenario::Result<Scenario> {
    let text = fs::read_to_string(path)?;
    parse_scenario(&text)
}

/// Environment first, then the scenario's `config`, then `--config`.
fn resolve_config(scenario: &Scenario, config_path: Option<&Path>) -> scenario::Result<EngineConfig> {
    let mut config = scenario.config.clone().unwrap_or_else(EngineConfig::from_env);
    if let Some(path) = config_path {
        config = serde_yaml::from_str(&fs::read_to_string(path)?)?;
    }
    Ok(config)
}

fn run_scenario(
    path: &Path,
    config_path: Option<&Path>,
    spill_dir: Option<String>,
    pretty: bool,
) -> scenario::Result<()> {
    let scenario = load(path)?;
    scenario::validate(&scenario)?;
    let mut config = resolve_config(&scenario, config_path)?;
    if let Some(dir) = spill_dir {
        config.spill_dir = Some(dir);
    }
    let engine = Engine::new(config)?;
    for result in scenario::run(&engine, &scenario)? {
        if pretty {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("{}", result);
        }
    }
    Ok(())
}

fn validate_scenario(path: &Path) -> scenario::Result<()> {
    let scenario = load(path)?;
    scenario::validate(&scenario)
}

fn explain_step(path: &Path, step: usize, config_path: Option<&Path>) -> scenario::Result<()> {
    let scenario = load(path)?;
    scenario::validate(&scenario)?;
    let target = scenario
        .steps
        .get(step)
        .ok_or_else(|| format!("scenario has {} steps", scenario.steps.len()))?;
    let (ns, pipeline, options) = target
        .pipeline()
        .ok_or_else(|| format!("step {step} ({}) has no pipeline", target.name()))?;

    let engine = Engine::new(resolve_config(&scenario, config_path)?)?;
    for earlier in &scenario.steps[..step] {
        scenario::run_step(&engine, earlier)?;
    }
    let pipeline = qplan_planner::parse_pipeline_json(pipeline)?;
    let plan = engine.explain(ns, &pipeline, options)?;

    println!("{}", plan);
    println!("{}", serde_json::to_string_pretty(&plan.to_json())?);
    Ok(())
}

//! agent-weave CLI: a thin wrapper over the `Engine` façade.
//!
//! Enterprise workflow engine CLI for running manifest-driven agent DAGs.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;

use agent_weave::Engine;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agent-weave")]
#[command(about = "Manifest-driven DAG workflow orchestration engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow from a config directory against a JSON input file
    Run {
        /// Directory containing workflow.yaml, agents.yaml, tools.yaml, ...
        config_dir: PathBuf,
        /// JSON file to use as the run input
        input: PathBuf,
        /// Override the DAG's default start node
        #[arg(long)]
        start_node: Option<String>,
    },

    /// Load and validate a config directory without running anything
    Validate {
        /// Directory containing workflow.yaml, agents.yaml, tools.yaml, ...
        config_dir: PathBuf,
    },

    /// Print the recorded summary, history, and events for a task id
    Inspect {
        /// Directory containing workflow.yaml, agents.yaml, tools.yaml, ...
        config_dir: PathBuf,
        /// Task id to inspect
        #[arg(long)]
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config_dir,
            input,
            start_node,
        } => {
            let engine = Engine::from_config_dir(&config_dir)?;
            let raw = std::fs::read_to_string(&input)
                .map_err(|e| format!("failed to read {}: {}", input.display(), e))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| format!("failed to parse {} as JSON: {}", input.display(), e))?;

            let outcome = engine.run(value, start_node.as_deref()).await?;
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "task_id": outcome.task_id,
                "status": outcome.status,
                "output": outcome.output,
                "node_sequence": outcome.node_sequence,
                "execution_time_ms": outcome.execution_time_ms,
                "history_len": outcome.history.len(),
            }))?;
            println!("{json}");
        }

        Commands::Validate { config_dir } => {
            let engine = Engine::from_config_dir(&config_dir)?;
            let node_count = engine.dag().nodes().count();
            let edge_count = engine.dag().edges().len();
            println!(
                "config ok: {} nodes, {} edges",
                node_count, edge_count
            );
        }

        Commands::Inspect { config_dir, task_id } => {
            let engine = Engine::from_config_dir(&config_dir)?;
            match engine.get_task_summary(&task_id) {
                Some(summary) => {
                    let history = engine.get_task_history(&task_id);
                    let events = engine.get_task_events(&task_id);
                    let artifacts = engine.get_task_artifacts(&task_id);
                    let json = serde_json::to_string_pretty(&serde_json::json!({
                        "task_id": summary.task_id,
                        "status": summary.status,
                        "current_node_id": summary.current_node_id,
                        "child_task_ids": summary.child_task_ids,
                        "history_len": history.len(),
                        "event_count": events.len(),
                        "artifact_count": artifacts.len(),
                    }))?;
                    println!("{json}");
                }
                None => {
                    println!("no task found with id {task_id}");
                }
            }
        }
    }

    Ok(())
}

mod builtin;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trellis_core::definition::ComponentDefinition;
use trellis_core::executor::ExecutorRegistry;
use trellis_core::types::{ElementId, ExecutionStatus};
use trellis_run::Runner;

use builtin::{CommandExecutor, FolderScanExecutor};

#[derive(Parser)]
#[command(name = "trellis", version, about = "Hierarchical workflow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition
    Run {
        /// Path to the workflow definition (JSON)
        definition: PathBuf,

        /// Directory holding run artifacts and the run store
        #[arg(long, default_value = "runs", env = "TRELLIS_RUN_ROOT")]
        run_root: PathBuf,

        /// Run id to resume results from (requires --resume-from)
        #[arg(long, requires = "resume_from")]
        previous_run: Option<String>,

        /// Component path to resume execution at (requires --previous-run)
        #[arg(long, requires = "previous_run")]
        resume_from: Option<String>,

        /// Root variables as key=value (value parsed as JSON, else string)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// Validate a workflow definition and exit
    Validate {
        /// Path to the workflow definition (JSON)
        definition: PathBuf,
    },
}

/// On-disk workflow file: a root id plus the component tree.
#[derive(Deserialize)]
struct WorkflowFile {
    id: String,
    #[serde(flatten)]
    definition: ComponentDefinition,
}

fn load_workflow(path: &PathBuf) -> anyhow::Result<(ElementId, ComponentDefinition)> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    let file: WorkflowFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid workflow in {}: {}", path.display(), e))?;
    Ok((ElementId::new(file.id)?, file.definition))
}

fn parse_var(raw: &str) -> anyhow::Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("--var needs KEY=VALUE, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn builtin_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(CommandExecutor));
    registry.register(Arc::new(FolderScanExecutor));
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trellis=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { definition } => {
            let (id, def) = load_workflow(&definition)?;
            def.validate()?;
            println!("ok: {} ({})", id, def.type_name());
            Ok(())
        }
        Commands::Run {
            definition,
            run_root,
            previous_run,
            resume_from,
            vars,
        } => {
            let (id, def) = load_workflow(&definition)?;

            let mut runner = Runner::new(id, def, builtin_registry()).with_run_root(run_root);
            for raw in &vars {
                let (key, value) = parse_var(raw)?;
                runner = runner.with_variable(key, value);
            }
            if let (Some(previous), Some(target)) = (previous_run, resume_from) {
                runner = runner.with_resume(previous, target.parse()?);
            }

            let report = runner.start().await?;
            info!(run_id = %report.run_id, status = %report.status, "run complete");

            println!("run:    {}", report.run_id);
            println!("status: {}", report.status);
            if let Some(error) = &report.error {
                println!("error:  {}", error);
            }
            for (path, result) in &report.results {
                println!(
                    "  {:<9} {} ({}ms)",
                    result.status.to_string(),
                    path,
                    result.elapsed_ms
                );
            }

            if report.status != ExecutionStatus::Completed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vars_as_json_or_string() {
        let (k, v) = parse_var("count=3").unwrap();
        assert_eq!(k, "count");
        assert_eq!(v, serde_json::json!(3));

        let (_, v) = parse_var("name=World").unwrap();
        assert_eq!(v, serde_json::json!("World"));

        let (_, v) = parse_var("items=[1,2]").unwrap();
        assert_eq!(v, serde_json::json!([1, 2]));

        assert!(parse_var("novalue").is_err());
    }
}

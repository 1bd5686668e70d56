//! Builtin node executors shipped with the CLI: shell commands and
//! folder scans. Model nodes need an executor registered by the
//! embedding application.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use trellis_core::definition::{CommandSettings, FolderScanSettings, NodeKind, NodeSettings};
use trellis_core::error::{Result, TrellisError};
use trellis_core::executor::{ExecutionRequest, NodeExecutor};
use trellis_core::types::{FileReference, NodeOutput, Outcome};

/// Runs `sh -c <command>` with a timeout and captured output.
pub struct CommandExecutor;

impl NodeExecutor for CommandExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }

    fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move {
            let NodeSettings::Command(settings) = &request.settings else {
                return Err(TrellisError::Executor {
                    path: request.path.clone(),
                    message: "command executor received non-command settings".to_string(),
                });
            };
            run_command(&request, settings).await
        })
    }
}

async fn run_command(request: &ExecutionRequest, settings: &CommandSettings) -> Result<NodeOutput> {
    debug!(path = %request.path, command = %settings.command, "running command");

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(&settings.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &settings.working_dir {
        cmd.current_dir(dir);
    }
    for (k, v) in &settings.env {
        cmd.env(k, v);
    }

    let child = cmd.spawn().map_err(|e| TrellisError::Executor {
        path: request.path.clone(),
        message: format!("failed to spawn command: {}", e),
    })?;

    let deadline = Duration::from_secs(settings.timeout_secs);
    let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(TrellisError::Executor {
                path: request.path.clone(),
                message: format!("command failed: {}", e),
            })
        }
        Err(_) => {
            return Err(TrellisError::Executor {
                path: request.path.clone(),
                message: format!("command timed out after {}s", settings.timeout_secs),
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    if settings.fail_on_nonzero && !output.status.success() {
        return Err(TrellisError::Executor {
            path: request.path.clone(),
            message: format!("command exited with {}: {}", exit_code, stderr.trim()),
        });
    }

    Ok(NodeOutput {
        output: json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }),
        outcome: Outcome::text(stdout.trim_end().to_string()),
    })
}

/// Lists files under a directory, optionally filtered by a regex over
/// the relative path.
pub struct FolderScanExecutor;

impl NodeExecutor for FolderScanExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::FolderScan
    }

    fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move {
            let NodeSettings::FolderScan(settings) = &request.settings else {
                return Err(TrellisError::Executor {
                    path: request.path.clone(),
                    message: "folder scan executor received non-scan settings".to_string(),
                });
            };
            scan_folder(&request, settings)
        })
    }
}

fn scan_folder(request: &ExecutionRequest, settings: &FolderScanSettings) -> Result<NodeOutput> {
    let include = settings
        .include
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .map_err(|e| TrellisError::Executor {
            path: request.path.clone(),
            message: format!("invalid include pattern: {}", e),
        })?;

    let root = Path::new(&settings.root);
    let mut files = Vec::new();
    walk(
        root,
        root,
        settings.max_depth.unwrap_or(usize::MAX),
        settings.include_hidden,
        include.as_ref(),
        &mut files,
    )?;
    files.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(path = %request.path, root = %settings.root, count = files.len(), "folder scanned");
    let listing: Vec<serde_json::Value> = files
        .iter()
        .map(|f| json!({"path": f.path, "size_bytes": f.size_bytes}))
        .collect();
    Ok(NodeOutput {
        output: json!({"root": settings.root, "files": listing}),
        outcome: Outcome {
            text: None,
            structured: Some(json!(listing)),
            files,
        },
    })
}

fn walk(
    root: &Path,
    dir: &Path,
    depth_left: usize,
    include_hidden: bool,
    include: Option<&regex::Regex>,
    out: &mut Vec<FileReference>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !include_hidden && name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            if depth_left > 1 {
                walk(root, &path, depth_left - 1, include_hidden, include, out)?;
            }
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        if include.map_or(true, |re| re.is_match(&relative)) {
            out.push(FileReference {
                path: relative,
                content_type: None,
                size_bytes: Some(meta.len()),
            });
        }
    }
    Ok(())
}

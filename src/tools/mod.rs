//! External tool orchestration
//!
//! The pipeline's hard logic (caching, ordering, atomicity) talks to the
//! outside world through three capability traits; the modules here provide
//! the production implementations:
//! - skopeo for registry/local-store copies
//! - mkfs.erofs for layer conversion and overlay merging

pub mod capability;
pub mod erofs;
pub mod skopeo;

pub use capability::{Converter, FetchSource, Fetcher, Merger};
pub use erofs::{ErofsConverter, ErofsMerger};
pub use skopeo::SkopeoFetcher;

use crate::error::{CairnError, CairnResult};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in tool error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of tool output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn error_output_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > ERROR_TAIL_LINES {
        lines[total - ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Map a spawn error to something actionable when the binary is missing.
pub(crate) fn spawn_error(tool: &str, install_hint: &str, e: std::io::Error) -> CairnError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CairnError::CliNotFound {
            name: tool.to_string(),
            hint: install_hint.to_string(),
        }
    } else {
        CairnError::command_failed(tool, e)
    }
}

/// Stream stdout+stderr from a child process, forwarding each line to
/// `on_output`.
///
/// Returns all collected output lines for error reporting. This is a
/// standalone async function (not behind `async_trait`) to avoid lifetime
/// issues with the `dyn Fn` callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let stderr = child.stderr.take().expect("stderr piped");
    let stdout = child.stdout.take().expect("stdout piped");

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    all_output
}

/// Wait for a spawned child and fail with the collected output tail when it
/// exits non-zero.
pub(crate) async fn finish_child(
    command: &str,
    child: &mut tokio::process::Child,
    output: &[String],
) -> CairnResult<()> {
    let status = child
        .wait()
        .await
        .map_err(|e| CairnError::command_failed(command, e))?;

    if status.success() {
        Ok(())
    } else {
        let joined = output.join("\n");
        Err(CairnError::command_exec(
            format!("{} (exit: {})", command, status),
            error_output_tail("", &joined),
        ))
    }
}

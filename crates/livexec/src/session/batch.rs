//! One-shot runs
//!
//! Runs a program to completion with stdin at EOF and hands back everything
//! it printed. Goes through the same admission, registry and teardown as an
//! interactive session but never accepts a client.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tracing::debug;

use crate::process::{InterpreterProcess, ProcessError, classify};
use crate::session::RunError;
use crate::session::bridge::DriverSettings;
use crate::session::cleanup::Teardown;
use crate::types::{CancelReason, ExitOutcome, RunResult};

enum Collected {
    Exited {
        stdout: std::io::Result<String>,
        stderr: std::io::Result<String>,
        status: Result<std::process::ExitStatus, ProcessError>,
    },
    Expired,
    Cancelled,
}

/// Wait for a registered one-shot process and clean it up
pub(crate) async fn run_to_completion(
    mut process: InterpreterProcess,
    teardown: Teardown,
    cancel: Arc<Notify>,
    settings: &DriverSettings,
) -> Result<RunResult, RunError> {
    let stdout = process.take_stdout();
    let stderr = process.take_stderr();

    let collected = {
        let collect = async {
            let (stdout, stderr) = tokio::join!(read_stream(stdout), read_stream(stderr));
            let status = process.wait().await;
            (stdout, stderr, status)
        };
        tokio::select! {
            result = tokio::time::timeout(settings.backstop, collect) => match result {
                Ok((stdout, stderr, status)) => Collected::Exited { stdout, stderr, status },
                Err(_) => Collected::Expired,
            },
            _ = cancel.notified() => Collected::Cancelled,
        }
    };

    let (outcome, result) = match collected {
        Collected::Exited {
            stdout,
            stderr,
            status,
        } => match status {
            Ok(status) => {
                let budget_exhausted = process.elapsed() >= settings.time_limit;
                let outcome = classify(status, settings.timeout_exit_code, budget_exhausted);
                let result = match (stdout, stderr) {
                    (Ok(stdout), Ok(stderr)) => Ok(RunResult {
                        stdout,
                        stderr,
                        exit_code: status.code(),
                    }),
                    (Err(e), _) | (_, Err(e)) => Err(RunError::Process(e.into())),
                };
                (outcome, result)
            }
            Err(e) => (
                ExitOutcome::Errored {
                    code: None,
                    signal: None,
                },
                Err(RunError::Process(e)),
            ),
        },
        Collected::Expired => (ExitOutcome::TimedOut, Ok(RunResult::default())),
        Collected::Cancelled => (
            ExitOutcome::Cancelled(CancelReason::Requested),
            Err(RunError::Cancelled),
        ),
    };
    debug!(?outcome, "one-shot run ended");

    teardown.begin(&outcome);
    teardown.finish(&mut process, outcome, None).await;

    match outcome {
        ExitOutcome::TimedOut => Err(RunError::Timeout {
            seconds: settings.time_limit.as_secs_f64(),
        }),
        _ => result,
    }
}

/// Read a whole output stream, decoding it lossily
async fn read_stream<R>(stream: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

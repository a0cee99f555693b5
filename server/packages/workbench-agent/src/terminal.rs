//! Interactive terminal - a PTY-backed shell bridged over WebSocket, plus
//! the one-shot command endpoint's runner.

use std::io::{Read, Write};
use std::process::Stdio;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use workbench_agent_error::WorkbenchError;

pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;
const IO_CHANNEL_DEPTH: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Outcome of a one-shot command. Failures are carried in-band; the
/// endpoint never turns them into HTTP errors.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandResponse {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl RunCommandResponse {
    fn failure(stderr: impl Into<String>, timed_out: bool) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: -1,
            timed_out,
        }
    }
}

/// Runs one command under the given shell. A zero or missing timeout
/// falls back to the default.
pub async fn run_command(shell: &str, request: &RunCommandRequest) -> RunCommandResponse {
    if request.command.trim().is_empty() {
        return RunCommandResponse::failure("Command is empty", false);
    }
    let timeout_secs = request
        .timeout_seconds
        .filter(|&t| t > 0)
        .unwrap_or(DEFAULT_RUN_TIMEOUT_SECS);

    let mut command = tokio::process::Command::new(shell);
    command
        .arg("-c")
        .arg(&request.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = request.cwd.as_deref().filter(|c| !c.is_empty()) {
        command.current_dir(cwd);
    }

    match tokio::time::timeout(Duration::from_secs(timeout_secs), command.output()).await {
        Ok(Ok(output)) => RunCommandResponse {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            timed_out: false,
        },
        Ok(Err(e)) => RunCommandResponse::failure(e.to_string(), false),
        Err(_) => RunCommandResponse::failure("", true),
    }
}

/// A shell running on a native PTY. Output is pumped from a blocking
/// reader thread into `output`; anything sent to `input` is written to
/// the PTY by a blocking writer thread.
pub struct PtySession {
    output: mpsc::Receiver<Vec<u8>>,
    input: mpsc::Sender<Vec<u8>>,
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
}

/// Spawns an interactive login shell on a fresh 24x80 PTY.
pub fn spawn_shell(shell: &str) -> Result<PtySession, WorkbenchError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| WorkbenchError::Io {
            message: format!("failed to open PTY: {e}"),
        })?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.arg("-l");
    cmd.arg("-i");
    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| WorkbenchError::Io {
            message: format!("failed to spawn shell: {e}"),
        })?;
    let pid = child.process_id();

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| WorkbenchError::Io {
            message: format!("failed to clone PTY reader: {e}"),
        })?;
    let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(IO_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut buffer = [0u8; 8192];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => {
                    if output_tx.blocking_send(buffer[..count].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut writer = pair.master.take_writer().map_err(|e| WorkbenchError::Io {
        message: format!("failed to take PTY writer: {e}"),
    })?;
    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(IO_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        while let Some(payload) = input_rx.blocking_recv() {
            if writer.write_all(&payload).is_err() {
                break;
            }
            if writer.flush().is_err() {
                break;
            }
        }
    });

    Ok(PtySession {
        output: output_rx,
        input: input_tx,
        master: pair.master,
        child,
        pid,
    })
}

/// Relays between one WebSocket and one PTY until either side ends, then
/// tears the shell down. PTY output goes to the client as text frames
/// (lossy UTF-8); client text and binary frames go to the PTY verbatim.
pub async fn bridge(socket: WebSocket, session: PtySession) {
    let PtySession {
        mut output,
        input,
        master,
        child,
        pid,
    } = session;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let write_task = tokio::spawn(async move {
        while let Some(chunk) = output.recv().await {
            let text = String::from_utf8_lossy(&chunk).to_string();
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Terminal socket read error: {}", e);
                break;
            }
        };
        let payload = match frame {
            WsMessage::Text(text) => text.into_bytes(),
            WsMessage::Binary(bytes) => bytes,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        if input.send(payload).await.is_err() {
            break;
        }
    }

    drop(input);
    write_task.abort();
    let _ = write_task.await;
    teardown(master, child, pid).await;
}

/// Closes the PTY and reaps the shell.
async fn teardown(
    master: Box<dyn MasterPty + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
) {
    drop(master);
    terminate(pid);
    let _ = tokio::task::spawn_blocking(move || child.wait()).await;
}

#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str) -> RunCommandRequest {
        RunCommandRequest {
            command: command.to_string(),
            timeout_seconds: None,
            cwd: None,
        }
    }

    #[tokio::test]
    async fn empty_command_is_an_in_band_error() {
        let response = run_command("/bin/bash", &request("   ")).await;
        assert!(!response.ok);
        assert_eq!(response.stderr, "Command is empty");
        assert_eq!(response.exit_code, -1);
        assert!(!response.timed_out);
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let response = run_command("/bin/bash", &request("echo hello")).await;
        assert!(response.ok);
        assert_eq!(response.stdout, "hello\n");
        assert_eq!(response.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let response = run_command("/bin/bash", &request("echo oops >&2; exit 3")).await;
        assert!(!response.ok);
        assert_eq!(response.exit_code, 3);
        assert_eq!(response.stderr, "oops\n");
        assert!(!response.timed_out);
    }

    #[tokio::test]
    async fn timeout_is_flagged_in_band() {
        let response = run_command(
            "/bin/bash",
            &RunCommandRequest {
                command: "sleep 5".to_string(),
                timeout_seconds: Some(1),
                cwd: None,
            },
        )
        .await;
        assert!(!response.ok);
        assert!(response.timed_out);
        assert_eq!(response.exit_code, -1);
    }

    #[tokio::test]
    async fn cwd_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let response = run_command(
            "/bin/bash",
            &RunCommandRequest {
                command: "ls".to_string(),
                timeout_seconds: None,
                cwd: Some(dir.path().to_string_lossy().to_string()),
            },
        )
        .await;
        assert!(response.ok);
        assert!(response.stdout.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pty_shell_round_trips_input_and_output() {
        let session = spawn_shell("/bin/bash").unwrap();
        let PtySession {
            mut output,
            input,
            master,
            child,
            pid,
        } = session;

        input
            .send(b"echo pty-roundtrip-$((20 + 3))\n".to_vec())
            .await
            .unwrap();

        let mut collected = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let chunk = tokio::time::timeout(remaining, output.recv())
                .await
                .expect("shell produced no output in time")
                .expect("pty output closed early");
            collected.push_str(&String::from_utf8_lossy(&chunk));
            // The echoed command also contains the literal, so look for the
            // expanded result.
            if collected.contains("pty-roundtrip-23") {
                break;
            }
        }

        drop(input);
        teardown(master, child, pid).await;
    }
}

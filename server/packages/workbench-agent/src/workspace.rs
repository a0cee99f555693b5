use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use utoipa::ToSchema;

use workbench_agent_error::WorkbenchError;

pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteAck {
    pub path: String,
}

/// Outcome of a shell command. A timeout is reported in-band via `timed_out`
/// instead of an error so the agent loop can fold it into a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Path-contained file and process operations rooted at one session's
/// workspace directory. No internal locking: callers serialize read/write
/// ordering themselves.
#[derive(Debug, Clone)]
pub struct WorkspaceAccess {
    root: PathBuf,
    shell: PathBuf,
}

impl WorkspaceAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_shell(root, DEFAULT_SHELL)
    }

    pub fn with_shell(root: impl Into<PathBuf>, shell: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            shell: shell.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read_file(&self, path: &str) -> Result<String, WorkbenchError> {
        let resolved = self.resolve(path)?;
        let metadata = fs::metadata(&resolved).map_err(|_| WorkbenchError::FileNotFound {
            path: path.to_string(),
        })?;
        if metadata.is_dir() {
            return Err(WorkbenchError::IsDirectory {
                path: path.to_string(),
            });
        }
        let bytes = fs::read(&resolved).map_err(|err| WorkbenchError::Io {
            message: format!("failed to read file: {err}"),
        })?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<WriteAck, WorkbenchError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|err| WorkbenchError::Io {
                message: format!("failed to create parent directories: {err}"),
            })?;
        }
        fs::write(&resolved, content).map_err(|err| WorkbenchError::Io {
            message: format!("failed to write file: {err}"),
        })?;
        Ok(WriteAck {
            path: path.to_string(),
        })
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<WorkspaceEntry>, WorkbenchError> {
        let resolved = self.resolve(path)?;
        let metadata = fs::metadata(&resolved).map_err(|_| WorkbenchError::NotADirectory {
            path: path.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(WorkbenchError::NotADirectory {
                path: path.to_string(),
            });
        }

        let read_dir = fs::read_dir(&resolved).map_err(|err| WorkbenchError::Io {
            message: format!("failed to read directory: {err}"),
        })?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|err| WorkbenchError::Io {
                message: format!("failed to read directory entry: {err}"),
            })?;
            let file_type = entry.file_type().map_err(|err| WorkbenchError::Io {
                message: format!("failed to read file type: {err}"),
            })?;
            let entry_type = if file_type.is_dir() {
                "directory"
            } else {
                "file"
            };
            entries.push(WorkspaceEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                entry_type: entry_type.to_string(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, WorkbenchError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(WorkbenchError::EmptyCommand);
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|err| WorkbenchError::Io {
            message: format!("failed to spawn command: {err}"),
        })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandResult {
                ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
                timed_out: false,
            }),
            Ok(Err(err)) => Err(WorkbenchError::Io {
                message: format!("failed to collect command output: {err}"),
            }),
            // Dropping the wait future kills the child via kill_on_drop.
            Err(_) => Ok(CommandResult {
                ok: false,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: true,
            }),
        }
    }

    // Paths must be relative, contain no parent-directory segments, and
    // resolve inside the workspace root.
    fn resolve(&self, input: &str) -> Result<PathBuf, WorkbenchError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(WorkbenchError::InvalidPath {
                path: input.to_string(),
            });
        }
        let candidate = Path::new(trimmed);
        if candidate.is_absolute() {
            return Err(WorkbenchError::InvalidPath {
                path: input.to_string(),
            });
        }
        if candidate
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(WorkbenchError::InvalidPath {
                path: input.to_string(),
            });
        }

        let joined = self.root.join(candidate);
        let resolved = fs::canonicalize(&joined).unwrap_or_else(|_| normalize_path(&joined));
        if !resolved.starts_with(&self.root) {
            return Err(WorkbenchError::PathEscape {
                path: input.to_string(),
            });
        }
        Ok(resolved)
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(value) => normalized.push(value),
        }
    }
    normalized
}

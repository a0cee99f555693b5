//! Agent Execution Loop - drives an AI backend with tool calling against
//! one session's workspace, streaming progress through the log channel.

use serde_json::{json, Value};

use workbench_agent_backends::{AiBackend, BackendError, ModelTurn, ToolDecl, TurnPart, TurnRole};

use crate::events::LogChannelMap;
use crate::registry::{Message, Role};
use crate::workspace::{WorkspaceAccess, DEFAULT_COMMAND_TIMEOUT};

pub const MAX_TOOL_ROUNDS: u32 = 15;

const PREVIEW_MAX_LEN: usize = 300;
const STREAM_CHUNK_LEN: usize = 150;

const SYSTEM_INSTRUCTION: &str = "You are an expert app-building agent. You help users create web applications by creating files and running commands in a project directory.

You have access to:
- read_file(path): read a file
- write_file(path, content): create or overwrite a file
- list_dir(path): list directory contents (use \".\" for project root)
- run_command(command): run shell commands (e.g. npm install, npm run build)

Rules:
- Prefer Next.js or React for web apps. Create package.json, source files, and ensure the app builds.
- After creating files, run npm install and npm run build to verify. If build fails, read the error and fix the code.
- Use relative paths only. Start with list_dir(\".\") to see the project structure.
- Be concise in replies. After completing a task, summarize what you did.
- If the user asks for an app, create a complete runnable project.";

/// Final result of a strategy run, appended to history by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub reply: String,
    pub tool_summaries: Vec<String>,
}

/// The fixed tool catalogue offered to the model.
pub fn tool_declarations() -> Vec<ToolDecl> {
    vec![
        ToolDecl {
            name: "read_file".to_string(),
            description:
                "Read the contents of a file in the project. Use relative path (e.g. 'src/app/page.tsx')."
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Relative file path"}},
                "required": ["path"],
            }),
        },
        ToolDecl {
            name: "write_file".to_string(),
            description:
                "Create or overwrite a file with the given content. Use relative path. Creates parent directories if needed."
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Relative file path"},
                    "content": {"type": "string", "description": "Full file content"},
                },
                "required": ["path", "content"],
            }),
        },
        ToolDecl {
            name: "list_dir".to_string(),
            description: "List files and directories in a path. Use '.' for project root."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Relative path, default '.'"}},
                "required": [],
            }),
        },
        ToolDecl {
            name: "run_command".to_string(),
            description:
                "Run a shell command in the project directory (e.g. npm install, npm run build). Use for installing deps and building."
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"command": {"type": "string", "description": "Shell command to run"}},
                "required": ["command"],
            }),
        },
    ]
}

/// Bounded tool-calling loop. Each round asks the backend for the next
/// turn; tool invocations are executed against the workspace and their
/// raw results folded back into the conversation in request order.
pub struct AgentLoop<'a> {
    backend: &'a dyn AiBackend,
    workspace: &'a WorkspaceAccess,
    channels: &'a LogChannelMap,
    session_id: &'a str,
    max_rounds: u32,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        backend: &'a dyn AiBackend,
        workspace: &'a WorkspaceAccess,
        channels: &'a LogChannelMap,
        session_id: &'a str,
    ) -> Self {
        Self {
            backend,
            workspace,
            channels,
            session_id,
            max_rounds: MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub async fn run(&self, history: &[Message]) -> Result<RunOutcome, BackendError> {
        self.progress("[Step] Starting agent...").await;

        let tools = tool_declarations();
        let mut conversation: Vec<ModelTurn> = history.iter().map(turn_from_message).collect();
        let mut tool_summaries: Vec<String> = Vec::new();
        let mut rounds = 0;

        while rounds < self.max_rounds {
            rounds += 1;
            let turn = self
                .backend
                .generate(SYSTEM_INSTRUCTION, &conversation, &tools)
                .await?;

            let calls: Vec<_> = turn.function_calls().into_iter().cloned().collect();
            if calls.is_empty() {
                self.progress("[Step] Agent finished.").await;
                let text = turn.joined_text().trim().to_string();
                let reply = if text.is_empty() {
                    "Done.".to_string()
                } else {
                    text
                };
                return Ok(RunOutcome {
                    reply,
                    tool_summaries,
                });
            }

            for text in turn.texts() {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                for line in trimmed.lines() {
                    self.progress(format!("[Thinking] {}", line)).await;
                }
            }
            conversation.push(turn.clone());

            let mut result_parts = Vec::with_capacity(calls.len());
            for call in &calls {
                let args_str = format_call_args(&call.args);
                self.progress(format!("[Tool] {}({})", call.name, args_str))
                    .await;
                let result = self.execute_tool(&call.name, &call.args).await;
                let preview = format_result_preview(&call.name, &result);
                self.progress(format!("[Result] {}", preview)).await;
                tool_summaries.push(format!("{}({}) -> {}", call.name, args_str, preview));
                result_parts.push(TurnPart::function_response(call.name.clone(), result));
            }

            self.progress(format!("[Round] {}/{}", rounds, self.max_rounds))
                .await;
            conversation.push(ModelTurn::tool_results(result_parts));
        }

        Ok(RunOutcome {
            reply: "Reached maximum tool rounds. Please try a simpler request.".to_string(),
            tool_summaries,
        })
    }

    /// Runs one tool. Sandbox and lookup failures fold into the result so
    /// the model can see them and react; nothing here aborts the run.
    async fn execute_tool(&self, name: &str, args: &Value) -> Value {
        match name {
            "read_file" => match self.workspace.read_file(string_arg(args, "path")) {
                Ok(content) => json!({"content": content}),
                Err(e) => json!({"error": e.to_string()}),
            },
            "write_file" => {
                match self
                    .workspace
                    .write_file(string_arg(args, "path"), string_arg(args, "content"))
                {
                    Ok(ack) => json!({"success": true, "path": ack.path}),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            "list_dir" => {
                let path = args
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or(".");
                match self.workspace.list_dir(path) {
                    Ok(entries) => json!({"entries": entries, "path": path}),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            "run_command" => {
                match self
                    .workspace
                    .run_command(string_arg(args, "command"), DEFAULT_COMMAND_TIMEOUT)
                    .await
                {
                    Ok(result) => serde_json::to_value(&result)
                        .unwrap_or_else(|e| json!({"error": e.to_string()})),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            other => json!({"error": format!("Unknown tool: {}", other)}),
        }
    }

    async fn progress(&self, message: impl Into<String>) {
        self.channels.emit_progress(self.session_id, message).await;
    }
}

fn turn_from_message(message: &Message) -> ModelTurn {
    let role = match message.role {
        Role::User => TurnRole::User,
        Role::Assistant => TurnRole::Model,
    };
    ModelTurn {
        role,
        parts: vec![TurnPart::text(message.content.clone())],
    }
}

fn string_arg<'v>(args: &'v Value, key: &str) -> &'v str {
    args.get(key).and_then(Value::as_str).unwrap_or("")
}

fn format_call_args(args: &Value) -> String {
    match args.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", "),
        None => String::new(),
    }
}

pub(crate) fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub(crate) fn clip_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", clip(s, max))
    } else {
        s.to_string()
    }
}

/// Human-readable preview of a tool result. Read and command results get
/// tailored detail; everything else is the clipped raw result.
fn format_result_preview(name: &str, result: &Value) -> String {
    if name == "read_file" {
        if result.get("error").is_some() {
            return result.to_string();
        }
        let content = result.get("content").and_then(Value::as_str).unwrap_or("");
        if !content.is_empty() {
            let head: Vec<&str> = content.split('\n').take(5).collect();
            let mut preview = head.join("\n");
            if content.len() > preview.len() {
                preview.push_str("\n...");
            }
            return clip_with_ellipsis(&preview, PREVIEW_MAX_LEN);
        }
        return clip(&result.to_string(), PREVIEW_MAX_LEN).to_string();
    }
    if name == "run_command" {
        if result.get("error").is_some() {
            return result.to_string();
        }
        let stdout = result.get("stdout").and_then(Value::as_str).unwrap_or("");
        let stderr = result.get("stderr").and_then(Value::as_str).unwrap_or("");
        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(format!(
                "stdout: {}",
                clip_with_ellipsis(stdout, STREAM_CHUNK_LEN)
            ));
        }
        if !stderr.is_empty() {
            parts.push(format!(
                "stderr: {}",
                clip_with_ellipsis(stderr, STREAM_CHUNK_LEN)
            ));
        }
        if let Some(code) = result.get("exitCode") {
            parts.push(format!("exit_code={}", code));
        }
        if parts.is_empty() {
            return clip(&result.to_string(), PREVIEW_MAX_LEN).to_string();
        }
        return parts.join(" | ");
    }
    clip_with_ellipsis(&result.to_string(), PREVIEW_MAX_LEN)
}

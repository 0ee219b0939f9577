//! The JSON tool surface a chunk session exposes to the model.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::document::ParagraphWriter;
use crate::gateway::{BatchGateway, BatchItem, BatchRequest, ChunkSession};
use crate::llm::{ToolCall, ToolSpec};
use crate::tool_loop::{ToolDispatch, ToolOutput};
use crate::workflow::{StateMachine, TaskRegistry, TaskType, WorkflowStatus, apply_status};

pub const UPDATE_TASK_STATUS: &str = "update_task_status";
pub const ADD_TRANSLATION_BATCH: &str = "add_translation_batch";
pub const UPDATE_CHAPTER_TITLE: &str = "update_chapter_title";

#[derive(Debug, Deserialize)]
struct StatusArgs {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    #[serde(default)]
    chapter_id: Option<String>,
    #[serde(alias = "paragraphs")]
    items: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
struct TitleArgs {
    #[serde(alias = "title")]
    translated_title: String,
}

/// Dispatches workflow tool calls for one chunk session.
pub struct WorkflowTools<'a, R, W> {
    registry: &'a R,
    writer: &'a W,
    session: ChunkSession,
    max_batch: usize,
}

impl<'a, R, W> WorkflowTools<'a, R, W>
where
    R: TaskRegistry,
    W: ParagraphWriter,
{
    pub fn new(registry: &'a R, writer: &'a W, session: ChunkSession, max_batch: usize) -> Self {
        Self {
            registry,
            writer,
            session,
            max_batch,
        }
    }

    pub fn session(&self) -> &ChunkSession {
        &self.session
    }

    pub fn workflow_status(&self) -> Option<WorkflowStatus> {
        self.registry
            .task(&self.session.task_id)
            .and_then(|t| t.workflow_status)
    }

    /// Boundary IDs not yet committed in this session.
    pub fn remaining_ids(&self) -> Vec<String> {
        match &self.session.boundary {
            Some(boundary) => self
                .session
                .ledger
                .remaining(boundary.ids().iter().map(String::as_str)),
            None => Vec::new(),
        }
    }

    async fn update_status(&mut self, args: Value) -> Result<Value, String> {
        let args: StatusArgs = parse_args(UPDATE_TASK_STATUS, args)?;
        let requested: WorkflowStatus = args.status.parse().map_err(|e| format!("{e}"))?;
        let change = apply_status(
            self.registry,
            self.writer,
            &self.session.task_id,
            requested,
            self.session.boundary.as_ref(),
        )
        .await
        .map_err(|e| e.to_string())?;

        Ok(json!({
            "success": true,
            "task_id": change.task_id,
            "previous_status": change.previous.map(|s| s.as_str()),
            "status": change.current.as_str(),
        }))
    }

    async fn add_batch(&mut self, args: Value) -> Result<Value, String> {
        let args: BatchArgs = parse_args(ADD_TRANSLATION_BATCH, args)?;
        let request = BatchRequest {
            chapter_id: args
                .chapter_id
                .unwrap_or_else(|| self.session.chapter_id.clone()),
            items: args.items,
        };
        let accepted = BatchGateway::new(self.registry, self.writer, self.max_batch)
            .submit(&mut self.session, request)
            .await
            .map_err(|e| e.to_string())?;

        let mut body = json!({ "success": true });
        if let (Value::Object(out), Ok(Value::Object(fields))) =
            (&mut body, serde_json::to_value(&accepted))
        {
            out.extend(fields);
        }
        Ok(body)
    }

    async fn update_title(&mut self, args: Value) -> Result<Value, String> {
        let args: TitleArgs = parse_args(UPDATE_CHAPTER_TITLE, args)?;
        let title = args.translated_title.trim();
        if title.is_empty() {
            return Err("translated_title must not be empty".to_string());
        }
        if self.workflow_status() != Some(WorkflowStatus::Working) {
            return Err("the chapter title can only be updated while the task is `working`".into());
        }
        self.writer
            .commit_title(&self.session.chapter_id, title)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "success": true, "translated_title": title }))
    }
}

impl<R, W> ToolDispatch for WorkflowTools<'_, R, W>
where
    R: TaskRegistry,
    W: ParagraphWriter,
{
    async fn dispatch(&mut self, call: &ToolCall) -> ToolOutput {
        let args = call.arguments.clone();
        let result = match call.name.as_str() {
            UPDATE_TASK_STATUS => self.update_status(args).await,
            ADD_TRANSLATION_BATCH => self.add_batch(args).await,
            UPDATE_CHAPTER_TITLE => self.update_title(args).await,
            other => Err(format!("unknown tool `{other}`")),
        };
        match result {
            Ok(body) => ToolOutput::success(body),
            Err(error) => {
                tracing::debug!(tool = %call.name, %error, "tool call rejected");
                ToolOutput::failure(json!({ "success": false, "error": error }))
            }
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments for {tool}: {e}"))
}

/// Tool definitions offered for a task type.
pub fn workflow_tool_specs(task_type: TaskType) -> Vec<ToolSpec> {
    let statuses: Vec<&str> = WorkflowStatus::ALL
        .into_iter()
        .filter(|s| {
            *s == WorkflowStatus::Planning
                || WorkflowStatus::ALL
                    .iter()
                    .any(|from| StateMachine::allowed(task_type, *from).contains(s))
        })
        .map(|s| s.as_str())
        .collect();

    let mut specs = vec![
        ToolSpec {
            name: UPDATE_TASK_STATUS.to_string(),
            description: format!(
                "Move the task to the next workflow status. Start with `planning`, then `working`. \
                 Allowed statuses for a {task_type} task: {}.",
                statuses.join(", ")
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": statuses }
                },
                "required": ["status"]
            }),
        },
        ToolSpec {
            name: ADD_TRANSLATION_BATCH.to_string(),
            description: "Submit results for several paragraphs at once. Address every item by \
                          its paragraph_id. Only allowed while the task is `working`."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "chapter_id": { "type": "string" },
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "paragraph_id": { "type": "string" },
                                "translated_text": { "type": "string" }
                            },
                            "required": ["paragraph_id", "translated_text"]
                        }
                    }
                },
                "required": ["items"]
            }),
        },
    ];

    if task_type == TaskType::Translation {
        specs.push(ToolSpec {
            name: UPDATE_CHAPTER_TITLE.to_string(),
            description: "Set the translated chapter title. Required before `review`.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "translated_title": { "type": "string" }
                },
                "required": ["translated_title"]
            }),
        });
    }
    specs
}

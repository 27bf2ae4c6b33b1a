//! Subagent manager — bounded background task delegation.
//!
//! The main agent delegates work via the `spawn` tool. Each subagent is a
//! reduced agent loop: same tool registry and provider chain, the fast
//! routing hint, a tighter iteration cap, no bus ingress and no history
//! store. On completion it publishes a scrubbed `[Task <id> …]` outbound
//! message to the originating chat and removes itself from the table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use aeon_core::bus::{MessageBus, OutboundMessage};
use aeon_core::security::CredentialScrubber;
use aeon_core::types::{CompletionRequest, Message, RouteHint};
use aeon_providers::ProviderChain;

use crate::tools::ToolRegistry;

/// Maximum concurrent background tasks (default).
pub const DEFAULT_MAX_SUBAGENTS: usize = 3;

/// Iteration cap for a subagent's LLM ↔ tool loop.
const SUBAGENT_MAX_ITERATIONS: usize = 15;

const SUBAGENT_SYSTEM_PROMPT: &str = "You are running a background subtask for the main \
     assistant. Complete only the assigned task, then report the outcome. Be concise. \
     Do not initiate conversations or take on side work.";

/// Snapshot of an active task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub id: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
}

struct TaskEntry {
    info: TaskInfo,
    /// Set right after spawn; None for the instant between registration
    /// and the spawn call.
    handle: Option<JoinHandle<()>>,
}

/// Manages the lifecycle of background subagent tasks.
pub struct SubagentManager {
    chain: Arc<ProviderChain>,
    tools: Arc<ToolRegistry>,
    bus: Arc<MessageBus>,
    scrubber: Arc<CredentialScrubber>,
    max_concurrent: usize,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    counter: AtomicU64,
}

impl SubagentManager {
    pub fn new(
        chain: Arc<ProviderChain>,
        tools: Arc<ToolRegistry>,
        bus: Arc<MessageBus>,
        scrubber: Arc<CredentialScrubber>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            chain,
            tools,
            bus,
            scrubber,
            max_concurrent,
            tasks: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Spawn a background task. Rejects synchronously at the cap.
    ///
    /// The returned string confirms the start; the result arrives later
    /// as an outbound `[Task <id> …]` message on `reply_channel`.
    pub fn spawn(
        self: &Arc<Self>,
        description: String,
        reply_channel: String,
        reply_chat_id: String,
    ) -> Result<String> {
        // Register before spawning so a fast-finishing task can always
        // find (and remove) its own entry.
        let id = {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.len() >= self.max_concurrent {
                anyhow::bail!(
                    "max concurrent subagents reached ({})",
                    self.max_concurrent
                );
            }
            let id = format!("task_{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
            tasks.insert(
                id.clone(),
                TaskEntry {
                    info: TaskInfo {
                        id: id.clone(),
                        description: description.clone(),
                        started_at: Utc::now(),
                    },
                    handle: None,
                },
            );
            id
        };

        let mgr = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            info!(task_id = %task_id, "subagent starting");
            let outcome = mgr.run_subagent(&task_id, &description).await;

            let content = match outcome {
                Ok(result) => format!("[Task {task_id} completed] {result}"),
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "subagent failed");
                    format!("[Task {task_id} completed with error] {e}")
                }
            };
            let content = mgr.scrubber.scrub(&content);
            mgr.bus
                .send(OutboundMessage::new(&reply_channel, &reply_chat_id, content));

            mgr.tasks.lock().unwrap().remove(&task_id);
            debug!(task_id = %task_id, "subagent cleaned up");
        });

        if let Some(entry) = self.tasks.lock().unwrap().get_mut(&id) {
            entry.handle = Some(handle);
        }

        Ok(format!(
            "Subagent {id} started in the background. Its result will be posted here when done."
        ))
    }

    /// The reduced LLM ↔ tool loop for one task.
    async fn run_subagent(&self, task_id: &str, description: &str) -> Result<String> {
        let mut messages = vec![Message::user(description)];
        let tool_defs = self.tools.definitions();

        for iteration in 0..SUBAGENT_MAX_ITERATIONS {
            let request = CompletionRequest {
                system: SUBAGENT_SYSTEM_PROMPT.to_string(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                hint: RouteHint::Fast,
            };

            let response = self
                .chain
                .complete(&request)
                .await
                .map_err(|e| anyhow::anyhow!("provider error: {e}"))?;

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.clone();
                messages.push(Message::assistant_tool_calls(
                    response.content.clone(),
                    tool_calls.clone(),
                ));

                for tc in &tool_calls {
                    debug!(
                        task_id = %task_id,
                        tool = %tc.function.name,
                        iteration,
                        "subagent tool call"
                    );
                    let result = self
                        .tools
                        .execute(&tc.function.name, &tc.function.arguments)
                        .await;
                    let scrubbed = self.scrubber.scrub(&result.for_llm);
                    messages.push(Message::tool_result(&tc.id, scrubbed));
                }
            } else {
                return Ok(response
                    .content
                    .unwrap_or_else(|| "(no output)".to_string()));
            }
        }

        Ok("Reached the iteration limit before finishing.".to_string())
    }

    /// Cancel one task. Returns whether it existed.
    pub fn stop(&self, id: &str) -> bool {
        if let Some(entry) = self.tasks.lock().unwrap().remove(id) {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
            info!(task_id = %id, "subagent cancelled");
            true
        } else {
            false
        }
    }

    /// Cancel all tasks; returns how many were cancelled.
    pub fn stop_all(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        let n = tasks.len();
        for (_, entry) in tasks.drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
        if n > 0 {
            info!(count = n, "cancelled all subagents");
        }
        n
    }

    /// Snapshot of active tasks.
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .map(|e| e.info.clone())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of active tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

//! Agent loop — the LLM ↔ tool-calling state machine.
//!
//! A single sequential consumer of the bus's inbound stream. Each message
//! either dispatches a slash command, echoes (when no provider is
//! configured), or runs a turn: build the system prompt with memory
//! context, call the provider chain, execute any tool calls (in parallel
//! when there are several), feed results back, and emit the final text.
//!
//! The loop exclusively owns its in-memory history, so the history needs
//! no lock. Needs-approval tool results suspend the turn on the approval
//! broker; while suspended, only `/approve` and `/deny` are consumed from
//! the bus and everything else is deferred until the turn ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use aeon_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use aeon_core::security::CredentialScrubber;
use aeon_core::types::{CompletionRequest, Message, RouteHint, ToolCall};
use aeon_memory::MemoryStore;
use aeon_providers::ProviderChain;

use crate::approval::ApprovalBroker;
use crate::context::ContextBuilder;
use crate::subagent::SubagentManager;
use crate::tools::spawn::SpawnTool;
use crate::tools::{ToolRegistry, ToolResult};

/// Tunables for the agent loop.
#[derive(Clone, Debug)]
pub struct AgentSettings {
    /// Display name, used as the echo prefix when no provider is set.
    pub name: String,
    /// Prior turns preloaded on start; in-memory history trims at twice this.
    pub max_history_messages: usize,
    /// Maximum LLM ↔ tool iterations per turn.
    pub max_iterations: usize,
    /// How long an approval request waits before counting as denied.
    pub approval_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "Aeon".to_string(),
            max_history_messages: 20,
            max_iterations: 20,
            approval_timeout: Duration::from_secs(60),
        }
    }
}

/// The main agent loop.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    chain: Option<Arc<ProviderChain>>,
    tools: Arc<ToolRegistry>,
    subagents: Option<Arc<SubagentManager>>,
    memory: Arc<MemoryStore>,
    scrubber: Arc<CredentialScrubber>,
    approvals: Arc<ApprovalBroker>,
    context: ContextBuilder,
    /// Held so each turn can point spawn results at its conversation.
    spawn_tool: Option<Arc<SpawnTool>>,
    settings: AgentSettings,
    session_id: String,
    history: Vec<Message>,
    /// Messages received while a turn was waiting on approval.
    deferred: VecDeque<InboundMessage>,
    shutdown: Arc<Notify>,
}

impl AgentLoop {
    /// Create the loop, resuming the most recent session when one exists.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        chain: Option<Arc<ProviderChain>>,
        tools: Arc<ToolRegistry>,
        subagents: Option<Arc<SubagentManager>>,
        memory: Arc<MemoryStore>,
        scrubber: Arc<CredentialScrubber>,
        approvals: Arc<ApprovalBroker>,
        context: ContextBuilder,
        spawn_tool: Option<Arc<SpawnTool>>,
        settings: AgentSettings,
    ) -> Self {
        let session_id = match memory.latest_session_id() {
            Ok(Some(id)) => {
                info!(session = %id, "resuming session");
                id
            }
            _ => new_session_id(),
        };

        let history = match memory.get_history(&session_id, settings.max_history_messages) {
            Ok(turns) => turns
                .into_iter()
                .filter_map(|t| match t.role.as_str() {
                    "user" => Some(Message::user(t.content)),
                    "assistant" => Some(Message::assistant(t.content)),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to preload history");
                Vec::new()
            }
        };

        info!(
            tools = tools.len(),
            history = history.len(),
            max_iterations = settings.max_iterations,
            "agent loop initialized"
        );

        Self {
            bus,
            chain,
            tools,
            subagents,
            memory,
            scrubber,
            approvals,
            context,
            spawn_tool,
            settings,
            session_id,
            history,
            deferred: VecDeque::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle used to stop the loop from outside.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until the bus closes or the shutdown handle fires.
    pub async fn run(&mut self) {
        info!("agent loop started, waiting for messages");
        eprintln!("DEBUG: run() started");
        loop {
            eprintln!("DEBUG: loop top, waiting for message");
            let msg = if let Some(m) = self.deferred.pop_front() {
                Some(m)
            } else {
                tokio::select! {
                    _ = self.shutdown.notified() => None,
                    m = self.bus.consume_inbound() => m,
                }
            };
            eprintln!("DEBUG: got msg: {:?}", msg.is_some());

            let Some(msg) = msg else {
                break;
            };
            self.handle_message(msg).await;
            eprintln!("DEBUG: handle_message done");
        }
        info!("agent loop exiting");
        eprintln!("DEBUG: run() exiting");
    }

    /// Process one inbound message.
    pub async fn handle_message(&mut self, msg: InboundMessage) {
        let text = msg.content.trim().to_string();

        if text.starts_with('/') {
            let reply = self.handle_command(&text);
            self.send_text(&msg, reply);
            return;
        }

        let Some(chain) = self.chain.clone() else {
            let echo = format!("[{}] {}", self.settings.name, msg.content);
            self.send_text(&msg, echo);
            return;
        };

        self.run_turn(chain, &msg).await;
    }

    // ─────────────────────────────────────────
    // Turn loop
    // ─────────────────────────────────────────

    async fn run_turn(&mut self, chain: Arc<ProviderChain>, msg: &InboundMessage) {
        if let Some(spawn) = &self.spawn_tool {
            spawn.set_context(&msg.channel, &msg.chat_id);
        }

        self.history.push(Message::user(&msg.content));
        self.persist("user", &msg.content);

        let system = self
            .context
            .build_system_prompt(&chain.primary_name(), &msg.content);
        let tool_defs = self.tools.definitions();
        let mut messages = self.history.clone();

        for iteration in 0..self.settings.max_iterations {
            debug!(iteration, "provider call");

            let request = CompletionRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                hint: RouteHint::Normal,
            };

            let response = match chain.complete(&request).await {
                Ok(r) => r,
                Err(e) => {
                    self.send_text(msg, format!("[Error] {e}"));
                    return;
                }
            };

            if response.has_tool_calls() {
                let assistant = Message::assistant_tool_calls(
                    response.content.clone(),
                    response.tool_calls.clone(),
                );
                messages.push(assistant.clone());
                self.history.push(assistant);

                let results = self.execute_tool_calls(&response.tool_calls, msg).await;
                for result in results {
                    let scrubbed = self.scrubber.scrub(&result.for_llm);
                    let tool_msg = Message::tool_result(&result.tool_call_id, scrubbed);
                    messages.push(tool_msg.clone());
                    self.history.push(tool_msg);

                    if !result.silent {
                        if let Some(for_user) = &result.for_user {
                            let out = self.scrubber.scrub(for_user);
                            self.send_text(msg, out);
                        }
                    }
                }
                continue;
            }

            let content = response.content.unwrap_or_default();
            self.send_text(msg, content.clone());
            self.history.push(Message::assistant(&content));
            self.persist("assistant", &content);
            self.trim_history();
            return;
        }

        self.send_text(msg, "Max tool iterations reached. Stopping.".to_string());
    }

    /// Execute the turn's tool calls: a single call runs inline, several
    /// run in parallel. Every call id gets exactly one result, in the
    /// order of the provider's tool-call list.
    async fn execute_tool_calls(
        &mut self,
        calls: &[ToolCall],
        msg: &InboundMessage,
    ) -> Vec<ToolResult> {
        let mut results = if calls.len() == 1 {
            let tc = &calls[0];
            vec![self
                .tools
                .execute(&tc.function.name, &tc.function.arguments)
                .await
                .with_call_id(&tc.id)]
        } else {
            let mut handles = Vec::with_capacity(calls.len());
            for tc in calls {
                let tools = self.tools.clone();
                let name = tc.function.name.clone();
                let args = tc.function.arguments.clone();
                handles.push(tokio::spawn(async move { tools.execute(&name, &args).await }));
            }

            let mut out = Vec::with_capacity(calls.len());
            for (tc, handle) in calls.iter().zip(handles) {
                let result = match handle.await {
                    Ok(r) => r,
                    Err(e) => {
                        ToolResult::error(format!("Error executing {}: {e}", tc.function.name))
                    }
                };
                out.push(result.with_call_id(&tc.id));
            }
            out
        };

        // Approval handshakes run sequentially; they talk to the user.
        for i in 0..results.len() {
            if results[i].needs_approval {
                let resolved = self.resolve_approval(&calls[i], &results[i], msg).await;
                results[i] = resolved.with_call_id(&calls[i].id);
            }
        }

        results
    }

    /// Ask the user to approve a gated tool call, then either run it for
    /// real or report the denial.
    async fn resolve_approval(
        &mut self,
        tc: &ToolCall,
        pending: &ToolResult,
        msg: &InboundMessage,
    ) -> ToolResult {
        let description = pending
            .approval_description
            .clone()
            .unwrap_or_else(|| tc.function.name.clone());

        let mut decision_rx = self.approvals.request(&description);
        self.send_text(
            msg,
            format!("REQUIRES APPROVAL: {description}\nReply /approve or /deny."),
        );

        let deadline = tokio::time::sleep(self.settings.approval_timeout);
        tokio::pin!(deadline);

        enum Wakeup {
            Decision(bool),
            TimedOut,
            Inbound(Option<InboundMessage>),
        }

        let approved = loop {
            let wakeup = tokio::select! {
                decision = &mut decision_rx => Wakeup::Decision(decision.unwrap_or(false)),
                _ = &mut deadline => Wakeup::TimedOut,
                inbound = self.bus.consume_inbound() => Wakeup::Inbound(inbound),
            };

            match wakeup {
                Wakeup::Decision(approved) => break approved,
                Wakeup::TimedOut => {
                    self.approvals.discard(&description);
                    self.send_text(msg, format!("Approval timed out for: {description}"));
                    break false;
                }
                Wakeup::Inbound(Some(m)) => {
                    let t = m.content.trim();
                    if t == "/approve" {
                        self.approvals.resolve_oldest(true);
                    } else if t == "/deny" {
                        self.approvals.resolve_oldest(false);
                    } else {
                        self.deferred.push_back(m);
                    }
                }
                Wakeup::Inbound(None) => break false,
            }
        };

        if approved {
            info!(tool = %tc.function.name, "approval granted");
            self.tools
                .execute_approved(&tc.function.name, &tc.function.arguments)
                .await
        } else {
            info!(tool = %tc.function.name, "approval denied");
            ToolResult::ok(format!("User denied approval for: {description}"))
        }
    }

    // ─────────────────────────────────────────
    // Slash commands
    // ─────────────────────────────────────────

    fn handle_command(&mut self, text: &str) -> String {
        let mut parts = text.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or("");

        match command {
            "/status" => {
                let provider = self
                    .chain
                    .as_ref()
                    .map(|c| c.primary_name())
                    .unwrap_or_else(|| "none".to_string());
                let subagents = self
                    .subagents
                    .as_ref()
                    .map(|s| s.active_count())
                    .unwrap_or(0);
                format!(
                    "Provider: {provider}\nTools: {}\nActive subagents: {subagents}\nHistory: {} messages\nSession: {}",
                    self.tools.len(),
                    self.history.len(),
                    self.session_id
                )
            }
            "/model" => match (&self.chain, arg.is_empty()) {
                (None, _) => "No provider configured.".to_string(),
                (Some(chain), true) => format!(
                    "Current: {}\nAvailable: {}",
                    chain.primary_name(),
                    chain.provider_names().join(", ")
                ),
                (Some(chain), false) => match chain.switch_to(arg) {
                    Ok(()) => {
                        // Tool-call-id conventions differ across providers.
                        self.history.clear();
                        format!("Primary provider switched to {arg}. History cleared.")
                    }
                    Err(e) => format!("[Error] {e}"),
                },
            },
            "/new" => {
                self.history.clear();
                self.session_id = new_session_id();
                format!("Started a new session: {}", self.session_id)
            }
            "/stop" => {
                let n = self
                    .subagents
                    .as_ref()
                    .map(|s| s.stop_all())
                    .unwrap_or(0);
                format!("Cancelled {n} subagent(s).")
            }
            "/approve" => match self.approvals.resolve_oldest(true) {
                Some(description) => format!("Approved: {description}"),
                None => "No pending approval request.".to_string(),
            },
            "/deny" => match self.approvals.resolve_oldest(false) {
                Some(description) => format!("Denied: {description}"),
                None => "No pending approval request.".to_string(),
            },
            "/help" => "Commands:\n\
                 /status — provider, tools, subagents, history\n\
                 /model [name] — show or switch the primary provider\n\
                 /new — start a new session\n\
                 /stop — cancel all subagents\n\
                 /approve — approve the oldest pending request\n\
                 /deny — deny the oldest pending request\n\
                 /help — this list"
                .to_string(),
            other => format!("Unknown command '{other}'. Try /help."),
        }
    }

    // ─────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────

    fn send_text(&self, msg: &InboundMessage, content: impl Into<String>) {
        self.bus
            .send(OutboundMessage::new(&msg.channel, &msg.chat_id, content.into()));
    }

    fn persist(&self, role: &str, content: &str) {
        if let Err(e) = self.memory.save_history(&self.session_id, role, content) {
            warn!(error = %e, role, "failed to persist history turn");
        }
    }

    /// Trim in-memory history once it exceeds twice the load limit,
    /// keeping the most recent messages. Leading orphaned tool results
    /// are dropped so the window never starts mid-exchange.
    fn trim_history(&mut self) {
        let limit = self.settings.max_history_messages;
        if self.history.len() > 2 * limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
            while matches!(self.history.first(), Some(Message::Tool { .. })) {
                self.history.remove(0);
            }
        }
    }

    /// Current session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Number of messages currently in memory.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

fn new_session_id() -> String {
    format!("session-{}", Utc::now().timestamp_millis())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

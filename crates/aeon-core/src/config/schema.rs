//! Configuration schema — the passive record the kernel is wired from.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! Every section has defaults so a missing file yields a runnable
//! (provider-less, echo-mode) kernel.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.aeon/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    /// Provider credentials, keyed by provider name.
    pub providers: HashMap<String, ProviderSettings>,
    pub routing: RoutingConfig,
    pub channels: ChannelsConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
    pub memory: MemoryConfig,
    pub timeouts: TimeoutsConfig,
    pub heartbeat: HeartbeatConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate invariants that must hold before the kernel starts.
    ///
    /// Unexpanded `${VAR}` placeholders in secret fields are fatal: they
    /// mean an env var referenced from the config file is not set.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, settings) in &self.providers {
            if settings.api_key.contains("${") {
                anyhow::bail!(
                    "provider '{}' has an unexpanded placeholder in apiKey: {}",
                    name,
                    settings.api_key
                );
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Agent loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Display name used in prompts and the echo prefix.
    pub name: String,
    /// Base system prompt.
    pub system_prompt: String,
    /// Workspace directory (skills, HEARTBEAT.md, scratch files).
    pub workspace: String,
    /// Prior turns preloaded on startup; history trims at twice this.
    pub max_history_messages: usize,
    /// Maximum LLM ↔ tool iterations per turn.
    pub max_tool_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Aeon".to_string(),
            system_prompt: "You are Aeon, a personal assistant running on the user's own machine. \
                            You have access to tools; prefer using them over guessing. Be concise."
                .to_string(),
            workspace: "~/.aeon/workspace".to_string(),
            max_history_messages: 20,
            max_tool_iterations: 20,
        }
    }
}

// ─────────────────────────────────────────────
// Providers & routing
// ─────────────────────────────────────────────

/// Credentials and endpoint for one LLM provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub api_key: String,
    /// Custom API base URL (overrides the OpenAI default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Model identifier sent on every request.
    pub model: String,
}

impl ProviderSettings {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Role-based routing: which named provider serves which role.
///
/// Empty string means unset; unset roles fall back to `primary`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub primary: String,
    pub fast: String,
    pub multimodal: String,
    pub fallback: String,
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Per-channel enable flags and authorization lists.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    /// The channel one-shot reminders are delivered to.
    pub user_channel: String,
    /// Settings keyed by channel name.
    pub entries: HashMap<String, ChannelSettings>,
}

impl ChannelsConfig {
    /// Allowed recipients of the configured user channel.
    pub fn user_channel_recipients(&self) -> &[String] {
        self.entries
            .get(&self.user_channel)
            .map(|s| s.allowed_users.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    pub enabled: bool,
    /// Empty = allow everyone (gating is the channel's concern).
    pub allowed_users: Vec<String>,
}

// ─────────────────────────────────────────────
// Security
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Path sandbox roots for file tools. Empty = unrestricted.
    pub allowed_paths: Vec<String>,
    /// Extra regex patterns appended to the command deny list.
    pub extra_deny_patterns: Vec<String>,
    /// How long an approval request waits before counting as denied.
    pub approval_timeout_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            extra_deny_patterns: Vec::new(),
            approval_timeout_secs: 60,
        }
    }
}

// ─────────────────────────────────────────────
// Scheduler / memory / timeouts / heartbeat / logging
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Maximum jobs firing concurrently.
    pub max_concurrent: usize,
    /// Consecutive failures before a job auto-pauses.
    pub auto_pause_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            auto_pause_threshold: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// SQLite database path. Empty = `~/.aeon/aeon.db`.
    pub db_path: String,
    /// Age threshold for `consolidate()` in days.
    pub consolidate_after_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            consolidate_after_days: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutsConfig {
    /// Per-request provider timeout.
    pub provider_secs: u64,
    /// Per-call tool deadline.
    pub tool_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            provider_secs: 120,
            tool_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30 * 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "aeon=debug".
    pub level: String,
    /// Log file path; empty = stderr.
    pub path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

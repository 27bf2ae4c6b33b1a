//! Filesystem tools — read, write, list directory.
//!
//! Every path goes through the configured [`PathSandbox`] before any
//! filesystem access.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use aeon_core::security::PathSandbox;
use aeon_core::utils::expand_home;

use super::base::{require_string, Tool, ToolResult};

/// Maximum file size returned to the LLM (characters).
const MAX_READ_LEN: usize = 50_000;

// ─────────────────────────────────────────────
// read_file
// ─────────────────────────────────────────────

/// Reads and returns the content of a file.
pub struct ReadFileTool {
    sandbox: Arc<PathSandbox>,
}

impl ReadFileTool {
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. Returns the full text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or ~-relative path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let path = require_string(&params, "path")?;
        let resolved = match self.sandbox.check(&expand_home(&path)) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::blocked(e.to_string())),
        };

        let content = tokio::fs::read_to_string(&resolved).await?;
        let content = if content.chars().count() > MAX_READ_LEN {
            let cut: String = content.chars().take(MAX_READ_LEN).collect();
            format!("{cut}\n… (truncated)")
        } else {
            content
        };
        Ok(ToolResult::ok(content))
    }
}

// ─────────────────────────────────────────────
// write_file
// ─────────────────────────────────────────────

/// Writes (creates or overwrites) a file.
pub struct WriteFileTool {
    sandbox: Arc<PathSandbox>,
}

impl WriteFileTool {
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if needed and overwriting any existing content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to write" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let path = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;

        let resolved = match self.sandbox.check(&expand_home(&path)) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::blocked(e.to_string())),
        };

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content.as_bytes()).await?;
        Ok(ToolResult::ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            resolved.display()
        )))
    }
}

// ─────────────────────────────────────────────
// list_dir
// ─────────────────────────────────────────────

/// Lists directory entries.
pub struct ListDirTool {
    sandbox: Arc<PathSandbox>,
}

impl ListDirTool {
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let path = require_string(&params, "path")?;
        let resolved = match self.sandbox.check(&expand_home(&path)) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::blocked(e.to_string())),
        };

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&resolved).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }
        entries.sort();

        if entries.is_empty() {
            Ok(ToolResult::ok("(empty directory)"))
        } else {
            Ok(ToolResult::ok(entries.join("\n")))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

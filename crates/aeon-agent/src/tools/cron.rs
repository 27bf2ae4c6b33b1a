//! Cron management tool — lets the LLM create, list and manage jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use aeon_cron::{Clock, CronStore};

use super::base::{optional_i64, optional_string, require_string, Tool, ToolResult};

/// Manage scheduled jobs: reminders, recurring prompts, skill runs.
pub struct CronTool {
    store: Arc<CronStore>,
    clock: Arc<dyn Clock>,
}

impl CronTool {
    pub fn new(store: Arc<CronStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs. Schedules: 'every N[smhd]', 'in N[smhd]' (one-shot), \
         'at HH:MM' / 'at 7pm' (one-shot), 'hourly', 'daily', 'weekly'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove", "enable", "disable"],
                    "description": "What to do"
                },
                "name": { "type": "string", "description": "Job name (for add)" },
                "schedule": { "type": "string", "description": "Schedule expression (for add)" },
                "command": { "type": "string", "description": "Command/prompt to run (for add)" },
                "skill": { "type": "string", "description": "Skill to invoke instead of a command (for add)" },
                "params": { "type": "string", "description": "JSON params for the skill (for add)" },
                "id": { "type": "integer", "description": "Job id (for remove/enable/disable)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let action = require_string(&params, "action")?;
        let now = self.clock.now();

        match action.as_str() {
            "add" => {
                let name = require_string(&params, "name")?;
                let schedule = require_string(&params, "schedule")?;
                let command = optional_string(&params, "command").unwrap_or_default();
                let skill = optional_string(&params, "skill").unwrap_or_default();
                let job_params = optional_string(&params, "params").unwrap_or_default();

                match self
                    .store
                    .create(&name, &schedule, &skill, &command, &job_params, now)
                {
                    Ok(id) => Ok(ToolResult::ok(format!(
                        "Created job {id} '{name}' ({schedule})."
                    ))),
                    Err(e) => Ok(ToolResult::error(format!("Could not create job: {e}"))),
                }
            }
            "list" => {
                let jobs = self.store.list()?;
                if jobs.is_empty() {
                    return Ok(ToolResult::ok("No scheduled jobs."));
                }
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| {
                        format!(
                            "{} [{}] '{}' ({}) next: {} fails: {}",
                            j.id,
                            if j.enabled { "on" } else { "off" },
                            j.name,
                            j.schedule,
                            j.next_run.format("%Y-%m-%d %H:%M:%S"),
                            j.fail_count
                        )
                    })
                    .collect();
                Ok(ToolResult::ok(lines.join("\n")))
            }
            "remove" => {
                let id = required_id(&params)?;
                if self.store.delete(id)? {
                    Ok(ToolResult::ok(format!("Removed job {id}.")))
                } else {
                    Ok(ToolResult::error(format!("No job with id {id}.")))
                }
            }
            "enable" => {
                let id = required_id(&params)?;
                if self.store.resume(id, now)? {
                    Ok(ToolResult::ok(format!("Enabled job {id}.")))
                } else {
                    Ok(ToolResult::error(format!("No job with id {id}.")))
                }
            }
            "disable" => {
                let id = required_id(&params)?;
                if self.store.pause(id)? {
                    Ok(ToolResult::ok(format!("Disabled job {id}.")))
                } else {
                    Ok(ToolResult::error(format!("No job with id {id}.")))
                }
            }
            other => Ok(ToolResult::error(format!("Unknown action '{other}'"))),
        }
    }
}

fn required_id(params: &HashMap<String, Value>) -> anyhow::Result<i64> {
    optional_i64(params, "id").ok_or_else(|| anyhow::anyhow!("Missing required parameter: id"))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_cron::SystemClock;

    fn tool() -> CronTool {
        CronTool::new(
            Arc::new(CronStore::open_in_memory().unwrap()),
            Arc::new(SystemClock),
        )
    }

    fn params(json: Value) -> HashMap<String, Value> {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let t = tool();
        let result = t
            .execute(params(json!({
                "action": "add",
                "name": "meds",
                "schedule": "in 5m",
                "command": "take meds"
            })))
            .await
            .unwrap();
        assert!(result.for_llm.contains("Created job"));

        let result = t.execute(params(json!({"action": "list"}))).await.unwrap();
        assert!(result.for_llm.contains("meds"));
        assert!(result.for_llm.contains("in 5m"));
    }

    #[tokio::test]
    async fn test_add_rejects_bad_schedule() {
        let t = tool();
        let result = t
            .execute(params(json!({
                "action": "add",
                "name": "x",
                "schedule": "whenever",
                "command": "y"
            })))
            .await
            .unwrap();
        assert!(result.for_llm.contains("Could not create job"));
    }

    #[tokio::test]
    async fn test_disable_enable_remove() {
        let t = tool();
        t.execute(params(json!({
            "action": "add", "name": "j", "schedule": "daily", "command": "x"
        })))
        .await
        .unwrap();

        let result = t
            .execute(params(json!({"action": "disable", "id": 1})))
            .await
            .unwrap();
        assert!(result.for_llm.contains("Disabled"));

        let result = t
            .execute(params(json!({"action": "enable", "id": 1})))
            .await
            .unwrap();
        assert!(result.for_llm.contains("Enabled"));

        let result = t
            .execute(params(json!({"action": "remove", "id": 1})))
            .await
            .unwrap();
        assert!(result.for_llm.contains("Removed"));

        let result = t.execute(params(json!({"action": "list"}))).await.unwrap();
        assert_eq!(result.for_llm, "No scheduled jobs.");
    }

    #[tokio::test]
    async fn test_unknown_id_reported() {
        let t = tool();
        let result = t
            .execute(params(json!({"action": "remove", "id": 99})))
            .await
            .unwrap();
        assert!(result.for_llm.contains("No job with id 99"));
    }
}

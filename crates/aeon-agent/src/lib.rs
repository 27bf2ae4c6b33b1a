//! The agent core: the turn/tool-call state machine, the tool registry
//! and built-in tools, the approval broker, and the subagent manager.

pub mod agent_loop;
pub mod approval;
pub mod context;
pub mod subagent;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentSettings};
pub use approval::ApprovalBroker;
pub use subagent::SubagentManager;

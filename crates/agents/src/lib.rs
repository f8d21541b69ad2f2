//! Agent layer for voxgate.
//!
//! An [`Agent`] bundles tool schemas, instructions and tool execution
//! for one conversational role. Agents register once at startup in the
//! [`AgentRegistry`]; during a call the [`AgentManager`] holds exactly
//! one active agent, injects the global tools, and enforces the
//! security gate on everything else.

pub mod agent;
pub mod builtin;
pub mod manager;
pub mod registry;
pub mod router;
pub mod tool;

pub use agent::{Agent, AgentError};
pub use manager::{AgentManager, MAIN_AGENT_NAME, SECURITY_AGENT_NAME};
pub use registry::AgentRegistry;
pub use router::IntentRouter;
pub use tool::{function_tool, HangupKind, ToolResult};

pub mod config;
pub mod error;
pub mod types;

pub use config::SwarmConfig;
pub use error::{Result, SwarmError};
pub use types::{
    agent_id_for_prompt, AgentKey, MessageRole, PreservationPolicy, ToolChoice, ToolKind,
    ToolStatus,
};

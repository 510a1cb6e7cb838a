pub mod broadcast;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod stack;

pub use broadcast::BroadcastResult;
pub use error::{Result, RuntimeError};
pub use graph::SpawnGraph;
pub use runtime::{RoleSource, Runtime, StackFrame, TaskRequest, TaskResult};
pub use stack::{CallStacks, WorkerId};

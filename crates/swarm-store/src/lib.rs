pub mod db;
pub mod dedup;
pub mod error;
pub mod store;
pub mod types;

pub use dedup::{check_duplicate, compute_args_hash, normalized_file_key, ToolProfile};
pub use error::{Result, StoreError};
pub use store::ConversationStore;
pub use types::{
    AppendResult, InvocationRecord, Message, RunningAgent, SortField, SortOrder, ToolMeta, Turn,
    TurnFilter,
};

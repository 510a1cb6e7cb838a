pub mod broker;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod responder;
pub mod tool;

pub use broker::{Broker, PubAck, StreamMessage, Subscription};
pub use dispatcher::Dispatcher;
pub use envelope::{ErrorBody, ExecRequest, ExecResponse, ExecStatus, ResponseMeta};
pub use error::{BusError, Result};
pub use responder::{Responder, ResponderHandle};
pub use tool::{BusTool, EchoTool, ToolError, ToolRegistry};

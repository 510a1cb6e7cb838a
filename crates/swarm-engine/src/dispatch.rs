use std::time::Duration;

use async_trait::async_trait;

use swarm_bus::{Dispatcher, ExecRequest, ExecResponse};

/// The engine's view of the dispatch bus: publish one tool request, get
/// its response within a timeout. Tests plug in scripted impls.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn execute_and_wait(
        &self,
        request: ExecRequest,
        timeout: Duration,
    ) -> swarm_bus::Result<ExecResponse>;
}

#[async_trait]
impl ToolDispatch for Dispatcher {
    async fn execute_and_wait(
        &self,
        request: ExecRequest,
        timeout: Duration,
    ) -> swarm_bus::Result<ExecResponse> {
        Dispatcher::execute_and_wait(self, request, timeout).await
    }
}

//! Responder side of the dispatch bus: the durable consumer loop of the
//! tool service.
//!
//! Each pulled request is handled on its own task so a slow tool never
//! stalls the pull loop. The original request is acked only after the
//! response has been published; a crash in between redelivers the
//! request, which is why dispatchers read only the first inbox message.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, StreamMessage};
use crate::envelope::{ExecRequest, ExecResponse};
use crate::tool::ToolRegistry;

pub struct Responder {
    broker: Arc<Broker>,
    registry: Arc<ToolRegistry>,
}

/// Handle over a spawned responder loop.
pub struct ResponderHandle {
    join: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

impl ResponderHandle {
    /// Request the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

impl Responder {
    pub fn new(broker: Arc<Broker>, registry: Arc<ToolRegistry>) -> Self {
        Self { broker, registry }
    }

    /// Spawn the pull loop onto the runtime.
    pub fn spawn(self) -> ResponderHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            info!(
                subject = %self.broker.config().exec_req_subject,
                consumer = %self.broker.config().consumer_name,
                "responder listening"
            );
            loop {
                let msg = tokio::select! {
                    msg = self.broker.pull() => match msg {
                        Ok(m) => m,
                        Err(e) => {
                            error!(error = %e, "pull failed; responder stopping");
                            return;
                        }
                    },
                    _ = stop_rx.changed() => {
                        info!("responder stopping");
                        return;
                    }
                };

                let broker = Arc::clone(&self.broker);
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    handle_request(broker, registry, msg).await;
                });
            }
        });
        ResponderHandle { join, stop_tx }
    }
}

async fn handle_request(broker: Arc<Broker>, registry: Arc<ToolRegistry>, msg: StreamMessage) {
    let seq = msg.seq;
    debug!(seq, "responder got request");

    let request: ExecRequest = match serde_json::from_slice(&msg.payload) {
        Ok(req) => req,
        Err(e) => {
            // Unparseable requests carry no reply inbox; ack so they do
            // not loop through redelivery forever.
            warn!(seq, error = %e, "dropping malformed request");
            let _ = broker.ack(seq);
            return;
        }
    };
    let reply_to = request.reply_to.clone();

    let envelope = execute_request(&registry, &request).await;

    let body = match serde_json::to_vec(&envelope) {
        Ok(b) => b,
        Err(e) => {
            error!(seq, error = %e, "response serialization failed");
            let _ = broker.ack(seq);
            return;
        }
    };
    if let Err(e) = broker.publish(&reply_to, body).await {
        error!(seq, reply_to = %reply_to, error = %e, "response publish failed");
    } else {
        debug!(seq, reply_to = %reply_to, "response published");
    }

    if let Err(e) = broker.ack(seq) {
        error!(seq, error = %e, "ack failed");
    }
}

async fn execute_request(registry: &ToolRegistry, request: &ExecRequest) -> ExecResponse {
    let Some(tool) = registry.get(&request.tool_name) else {
        return ExecResponse::error(
            "TOOL_NOT_FOUND",
            format!("Tool '{}' not registered", request.tool_name),
        );
    };

    let started = Instant::now();
    // A panicking tool must not take the handler down with it.
    let input = request.input_args.clone();
    let result = tokio::spawn(async move { tool.execute(input).await }).await;
    let exec_time = started.elapsed().as_secs_f64();

    match result {
        Ok(Ok(response)) => ExecResponse::ok(response).with_exec_time(exec_time),
        Ok(Err(e)) => {
            warn!(tool = %request.tool_name, error = %e, "tool execution failed");
            ExecResponse::failure("EXECUTION_ERROR", e.to_string()).with_exec_time(exec_time)
        }
        Err(join_err) => {
            error!(tool = %request.tool_name, error = %join_err, "tool task panicked");
            ExecResponse::failure("EXECUTION_ERROR", join_err.to_string())
                .with_exec_time(exec_time)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::envelope::ExecStatus;
    use crate::tool::{BusTool, EchoTool, ToolError};
    use async_trait::async_trait;
    use std::time::Duration;
    use swarm_core::config::BusConfig;

    struct FailingTool;

    #[async_trait]
    impl BusTool for FailingTool {
        fn name(&self) -> &str {
            "always_fails"
        }
        fn description(&self) -> &str {
            "fails on purpose"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            Err(ToolError::Execution("boom".into()))
        }
    }

    fn setup() -> (Arc<Broker>, Arc<ToolRegistry>) {
        let broker = Broker::new(BusConfig::default());
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        (broker, registry)
    }

    #[tokio::test]
    async fn echo_request_roundtrip() {
        let (broker, registry) = setup();
        let handle = Responder::new(Arc::clone(&broker), registry).spawn();

        let dispatcher = Dispatcher::new(Arc::clone(&broker));
        let req = ExecRequest::new("echo", serde_json::json!({"text": "ping"}), "repo");
        let resp = dispatcher
            .execute_and_wait(req, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(resp.status, ExecStatus::Ok);
        assert_eq!(resp.response.unwrap()["echo"], "ping");
        assert!(resp.meta.exec_time >= 0.0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_envelope() {
        let (broker, registry) = setup();
        let handle = Responder::new(Arc::clone(&broker), registry).spawn();

        let dispatcher = Dispatcher::new(Arc::clone(&broker));
        let req = ExecRequest::new("no_such_tool", serde_json::json!({}), "repo");
        let resp = dispatcher
            .execute_and_wait(req, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(resp.status, ExecStatus::Error);
        assert_eq!(resp.error.unwrap().code, "TOOL_NOT_FOUND");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn tool_failure_yields_failure_envelope_and_ack() {
        let (broker, registry) = setup();
        let handle = Responder::new(Arc::clone(&broker), registry).spawn();

        let dispatcher = Dispatcher::new(Arc::clone(&broker));
        let req = ExecRequest::new("always_fails", serde_json::json!({}), "repo");
        let resp = dispatcher
            .execute_and_wait(req, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(resp.status, ExecStatus::Failure);
        assert_eq!(resp.error.unwrap().code, "EXECUTION_ERROR");
        // The failed request must still have been removed from the stream.
        assert_eq!(broker.stream_depth(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn no_responder_times_out() {
        let broker = Broker::new(BusConfig::default());
        let dispatcher = Dispatcher::new(Arc::clone(&broker));
        let req = ExecRequest::new("echo", serde_json::json!({"text": "x"}), "repo");
        let err = dispatcher
            .execute_and_wait(req, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::BusError::ResponseTimeout { .. }));
    }
}

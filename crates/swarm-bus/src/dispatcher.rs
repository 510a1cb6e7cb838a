//! Requester side of the dispatch bus.
//!
//! The private reply inbox per request makes the sequence trivially
//! correct: subscribe → publish → await-one → ack → drain. Should a
//! crashed responder redeliver and answer twice, only the first message
//! on the inbox is read and the rest are drained.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::broker::Broker;
use crate::envelope::{ExecRequest, ExecResponse};
use crate::error::{BusError, Result};

pub struct Dispatcher {
    broker: Arc<Broker>,
}

impl Dispatcher {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Publish one execution request and block until its response
    /// arrives on the private inbox, bounded by `timeout`.
    #[instrument(skip(self, request), fields(tool = %request.tool_name))]
    pub async fn execute_and_wait(
        &self,
        mut request: ExecRequest,
        timeout: Duration,
    ) -> Result<ExecResponse> {
        let cfg = self.broker.config();
        let reply_to = format!("{}.{}", cfg.exec_resp_prefix, Uuid::new_v4().simple());

        // Subscribe before publishing so a fast responder cannot race us.
        let mut sub = self.broker.subscribe(&reply_to);
        request.reply_to = reply_to.clone();

        let payload = serde_json::to_vec(&request)?;
        let publish_timeout = Duration::from_secs_f64(cfg.publish_ack_timeout_secs);
        let subject = cfg.exec_req_subject.clone();
        let ack = tokio::time::timeout(publish_timeout, self.broker.publish(&subject, payload))
            .await
            .map_err(|_| BusError::PublishTimeout {
                subject,
                secs: publish_timeout.as_secs_f64(),
            })??;
        debug!(
            stream = %ack.stream,
            seq = ack.seq,
            reply_to = %reply_to,
            "request enqueued"
        );

        let body = sub.next(timeout).await?;
        let response: ExecResponse = serde_json::from_slice(&body)?;

        // First response wins; anything else on the inbox is a duplicate
        // from redelivery.
        sub.drain();

        Ok(response)
    }
}

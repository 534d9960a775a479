//! Per-platform delivery queues.
//!
//! Each push platform gets one FIFO queue and one worker, created lazily on
//! the first message for that platform. Within a platform messages are sent
//! strictly one at a time, in enqueue order, with the endpoint's delay between
//! sends. Delivery is at-most-once: failures are logged and the message is
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::sender::{OutboundSender, SenderEndpoint};
use crate::domain::OutboundMessage;
use crate::{Error, Result};

pub struct DeliveryScheduler {
    endpoints: HashMap<String, SenderEndpoint>,
    sender: Arc<dyn OutboundSender>,
    queues: DashMap<String, mpsc::UnboundedSender<OutboundMessage>>,
    cancellation_token: CancellationToken,
}

impl DeliveryScheduler {
    pub fn new(endpoints: HashMap<String, SenderEndpoint>, sender: Arc<dyn OutboundSender>) -> Self {
        Self {
            endpoints,
            sender,
            queues: DashMap::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Queue `message` for its platform. Never waits on delivery.
    ///
    /// Fails when the platform has no configured endpoint or the scheduler
    /// has been shut down.
    pub fn enqueue(&self, message: OutboundMessage) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(Error::Delivery(format!(
                "Scheduler is shut down, dropping message for {}: {}",
                message.platform,
                message.display()
            )));
        }

        let queue = match self.queues.get(&message.platform) {
            Some(queue) => queue.clone(),
            None => {
                let Some(endpoint) = self.endpoints.get(&message.platform) else {
                    return Err(Error::Delivery(format!(
                        "No sender configured for platform {}",
                        message.platform
                    )));
                };
                self.queues
                    .entry(message.platform.clone())
                    .or_insert_with(|| self.start_worker(&message.platform, endpoint.clone()))
                    .clone()
            }
        };

        queue.send(message).map_err(|e| {
            Error::Delivery(format!(
                "Queue for platform {} is closed, dropping message: {}",
                e.0.platform,
                e.0.display()
            ))
        })
    }

    /// Platforms that currently have a worker.
    pub fn active_platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        platforms.sort();
        platforms
    }

    /// Stop all workers. Queued messages that were not yet sent are dropped.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.queues.clear();
    }

    fn start_worker(
        &self,
        platform: &str,
        endpoint: SenderEndpoint,
    ) -> mpsc::UnboundedSender<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = PlatformWorker {
            platform: platform.to_string(),
            endpoint,
            sender: self.sender.clone(),
        };
        tokio::spawn(worker.run(rx, self.cancellation_token.child_token()));
        tx
    }
}

impl Drop for DeliveryScheduler {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

struct PlatformWorker {
    platform: String,
    endpoint: SenderEndpoint,
    sender: Arc<dyn OutboundSender>,
}

impl PlatformWorker {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
        cancellation_token: CancellationToken,
    ) {
        info!(platform = %self.platform, "Delivery worker started");
        let name = self.endpoint.display_name(&self.platform).to_string();
        let delay = self.endpoint.delay();
        let mut sequence: u64 = 0;

        loop {
            let mut message = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            sequence += 1;
            message.sequence = Some(sequence);

            match self.sender.send(&self.endpoint, &message).await {
                Ok(()) => info!(
                    "live-relay -> {} ([{}] {}) [{}]: {}",
                    name,
                    message.kind,
                    message.target,
                    sequence,
                    message.display()
                ),
                Err(e) => error!(
                    "Delivery failed ({}): live-relay -> {} ([{}] {}) [{}]: {}",
                    e,
                    name,
                    message.kind,
                    message.target,
                    sequence,
                    message.display()
                ),
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(platform = %self.platform, sent = sequence, "Delivery worker stopped");
    }
}

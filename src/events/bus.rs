use anyhow::Result;
use glob_match::glob_match;
use tokio::sync::broadcast;
use tracing::warn;

const BUFFER_CAPACITY: usize = 256;

/// One message on the bus: raw payload bytes under a dotted topic name.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker-independent publish/subscribe primitive. The in-process
/// implementation below rides a tokio broadcast channel; an external message
/// broker satisfies the same contract by bridging into a subscription.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to every topic matching a glob pattern (e.g. "job.events.*").
    fn subscribe(&self, pattern: &str) -> BusSubscription;
}

pub struct BusSubscription {
    pattern: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    /// Next message whose topic matches the subscription pattern, or None
    /// once the bus is gone. Per-topic order follows publish order.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if glob_match(&self.pattern, &message.topic) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(pattern = %self.pattern, missed, "Bus subscriber lagged, dropping events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-memory bus used when all components share one process.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(BUFFER_CAPACITY);
        Self { sender }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // A send error only means no subscriber is listening right now.
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> BusSubscription {
        BusSubscription {
            pattern: pattern.to_string(),
            receiver: self.sender.subscribe(),
        }
    }
}

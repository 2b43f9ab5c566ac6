use crate::events::bus::EventBus;
use crate::events::emitter::{all_accounts_pattern, parse_account_topic};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// One live observer connection, owned by the external real-time transport
/// (websocket session, SSE stream, ...). Delivery must not assume the peer
/// is healthy.
#[async_trait]
pub trait ObserverConnection: Send + Sync {
    async fn deliver(&self, payload: &[u8]) -> Result<()>;
}

struct ObserverHandle {
    id: Uuid,
    conn: Arc<dyn ObserverConnection>,
}

/// Tracks open observer sessions per account and fans event payloads out to
/// all of them. Purely in-memory; sessions die with their transport.
pub struct ConnectionManager {
    connections: DashMap<i64, Vec<ObserverHandle>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a freshly opened observer connection; returns the handle id
    /// to pass back on disconnect.
    pub fn on_connect(&self, account_id: i64, conn: Arc<dyn ObserverConnection>) -> Uuid {
        let id = Uuid::new_v4();
        self.connections
            .entry(account_id)
            .or_default()
            .push(ObserverHandle { id, conn });
        debug!(account_id, connection_id = %id, "Observer connected");
        id
    }

    pub fn on_disconnect(&self, account_id: i64, connection_id: Uuid) {
        if let Some(mut handles) = self.connections.get_mut(&account_id) {
            handles.retain(|h| h.id != connection_id);
        }
        debug!(account_id, connection_id = %connection_id, "Observer disconnected");
    }

    pub fn connection_count(&self, account_id: i64) -> usize {
        self.connections
            .get(&account_id)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Deliver a raw payload to every open connection for the account,
    /// concurrently. Best effort: each delivery runs in its own task, so a
    /// slow or dead connection never blocks the others, and failures are
    /// logged rather than propagated.
    pub async fn broadcast_to_account(&self, account_id: i64, payload: &[u8]) {
        let targets: Vec<(Uuid, Arc<dyn ObserverConnection>)> = match self
            .connections
            .get(&account_id)
        {
            Some(handles) => handles.iter().map(|h| (h.id, h.conn.clone())).collect(),
            None => return,
        };

        let deliveries: Vec<JoinHandle<()>> = targets
            .into_iter()
            .map(|(id, conn)| {
                let payload = payload.to_vec();
                tokio::spawn(async move {
                    if let Err(error) = conn.deliver(&payload).await {
                        warn!(
                            account_id,
                            connection_id = %id,
                            error = %error,
                            "Failed to deliver event to observer"
                        );
                    }
                })
            })
            .collect();

        for delivery in deliveries {
            let _ = delivery.await;
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Long-lived relay: consumes every account's job-event topic off the bus,
/// decodes the account id from the topic name, and hands the raw payload to
/// the connection manager unmodified.
pub fn spawn_relay(bus: Arc<dyn EventBus>, manager: Arc<ConnectionManager>) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(&all_accounts_pattern());

    tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            match parse_account_topic(&message.topic) {
                Some(account_id) => {
                    manager
                        .broadcast_to_account(account_id, &message.payload)
                        .await;
                }
                None => {
                    warn!(topic = %message.topic, "Dropping bus message with unparseable topic");
                }
            }
        }
    })
}

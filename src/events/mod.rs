pub mod bus;
pub mod connections;
pub mod emitter;

pub use bus::{BusMessage, BusSubscription, EventBus, InMemoryBus};
pub use connections::{ConnectionManager, ObserverConnection, spawn_relay};
pub use emitter::{JobEventEmitter, account_topic, all_accounts_pattern, parse_account_topic};

//! Infrastructure adapters for the durable store and the notification bus.

pub mod bus;
pub mod store;

pub use bus::{FileMessagingService, InMemoryMessagingService, Message, MessageId, MessagingService};
pub use store::{InMemoryBackend, JsonlBackend, Store, StoreBackend, Table, Transaction};

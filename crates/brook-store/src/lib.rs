pub mod entities;
pub mod message_store;

pub use message_store::{MessageStorage, StorageError};

pub mod json_store;
pub mod memory_store;
pub mod notifier;

pub use json_store::JsonTaskStore;
pub use memory_store::MemoryTaskStore;
pub use notifier::{LogNotifier, WebhookNotifier};

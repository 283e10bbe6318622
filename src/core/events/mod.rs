pub mod bridge;
pub mod hub;
pub mod indicator;
pub mod payloads;

pub use bridge::{ProgressBridge, Subscription};
pub use hub::{emit, EventHandler, EventHub, EventSink, EventSource, ListenerId};
pub use indicator::{NoIndicator, ProgressIndicator};
pub use payloads::*;

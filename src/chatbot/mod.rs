//! Chatbot module - relays user text to Groq and logs each exchange.

pub mod context;
pub mod database;
pub mod engine;
pub mod message;
pub mod relay;
pub mod webhook;


pub use context::{CancelHandle, Done, RequestContext};
pub use database::{Store, StoreError, StoreOptions};
pub use engine::{ConversationHandler, LogOutcome, Reply};
pub use message::{ChatMessage, RelayMessage, Role, WebhookPayload};
pub use relay::RelayClient;

//! Conversation handler - one LLM call, then a best-effort log write.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chatbot::context::{Done, RequestContext};
use crate::chatbot::database::Store;
use crate::groq;

/// What happened to the interaction log write.
///
/// Logging is diagnostic: none of these outcomes turn a successful reply into
/// an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Stored,
    /// The write was attempted and failed.
    Failed(String),
    /// The context finished before the write could start.
    Skipped(Done),
}

/// A successful reply.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The completion text, exactly as the gateway returned it.
    pub text: String,
    pub logged: LogOutcome,
}

pub struct ConversationHandler {
    gateway: groq::Client,
    store: Arc<Store>,
}

impl ConversationHandler {
    pub fn new(gateway: groq::Client, store: Arc<Store>) -> Self {
        Self { gateway, store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn handle(&self, ctx: &RequestContext, input: &str) -> Result<Reply, groq::Error> {
        let preview: String = input.chars().take(100).collect();
        info!("💬 Prompt: \"{preview}\"");

        let text = self.gateway.send(ctx, input).await?;
        let logged = self.record(ctx, input, &text).await;

        Ok(Reply { text, logged })
    }

    /// Best-effort write of a completed exchange. Skipped once `ctx` is done.
    pub(crate) async fn record(&self, ctx: &RequestContext, input: &str, text: &str) -> LogOutcome {
        if let Some(done) = ctx.err() {
            warn!("Skipping interaction log: {done}");
            return LogOutcome::Skipped(done);
        }
        match self.store.log_interaction(input, text).await {
            Ok(()) => LogOutcome::Stored,
            Err(e) => {
                warn!("Failed to log interaction: {e}");
                LogOutcome::Failed(e.to_string())
            }
        }
    }
}

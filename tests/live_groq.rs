//! Live tests against the real Groq API.
//!
//! These tests require GROQ_API_KEY in the environment (or .env).
//!
//! Run with: cargo test --features integ_test --test live_groq

#[cfg(feature = "integ_test")]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use groqbot::chatbot::{ConversationHandler, LogOutcome, RequestContext, Store, StoreOptions};
    use groqbot::config::Config;
    use groqbot::groq;
    use groqbot::retry::RetryPolicy;

    fn live_config() -> Option<Config> {
        let _ = dotenvy::dotenv();
        match Config::from_env() {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Skipping test: {e}");
                None
            }
        }
    }

    #[tokio::test]
    async fn test_live_completion() {
        let Some(config) = live_config() else { return };

        let client = groq::Client::new(&config, RetryPolicy::default()).unwrap();
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(60));
        let reply = client
            .send(&ctx, "Reply with the single word: pong")
            .await
            .unwrap();

        println!("Model {} replied: {reply:?}", client.model());
        assert!(!reply.trim().is_empty());
    }

    #[tokio::test]
    async fn test_live_round_trip_is_logged() {
        let Some(config) = live_config() else { return };

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&StoreOptions::at(dir.path().join("live.db"))).unwrap();
        let gateway = groq::Client::new(&config, RetryPolicy::default()).unwrap();
        let handler = ConversationHandler::new(gateway, Arc::new(store));

        let ctx = RequestContext::background().with_timeout(Duration::from_secs(60));
        let reply = handler.handle(&ctx, "Say hello in three words.").await.unwrap();

        assert_eq!(reply.logged, LogOutcome::Stored);
        assert_eq!(handler.store().count().await.unwrap(), 1);
    }
}

//! WhatsApp relay client.
//!
//! Talks to a go-whatsapp-web-multidevice style bridge: replies go out through
//! `/send/message`, and `/webhook/register` tells the bridge where to deliver
//! inbound messages.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::chatbot::message::RelayMessage;

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Events the bridge should forward to our webhook.
const WEBHOOK_EVENTS: [&str; 3] = ["message_received", "message_sent", "message_updated"];

#[derive(Serialize)]
struct RegisterRequest<'a> {
    webhook_url: &'a str,
    events: [&'static str; 3],
}

pub struct RelayClient {
    base_url: String,
    client: reqwest::Client,
}

impl RelayClient {
    /// `base_url` is the bridge root, e.g. "http://localhost:3000".
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `text` to the WhatsApp JID `phone`.
    pub async fn send_message(&self, phone: &str, text: &str) -> Result<(), Error> {
        let body = RelayMessage::reply(phone, text);
        debug!("Sending to relay: {:?}", body);

        let response = self
            .client
            .post(format!("{}/send/message", self.base_url))
            .header("Accept", "application/json")
            .header("Origin", &self.base_url)
            .header("Referer", format!("{}/", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_else(|e| {
            debug!("Failed to read relay response body: {e}");
            String::new()
        });
        debug!("Relay response {status}: {body}");

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("📤 Reply delivered to {phone}");
        Ok(())
    }

    /// Ask the bridge to deliver message events to `webhook_url`.
    pub async fn register_webhook(&self, webhook_url: &str) -> Result<(), Error> {
        let request = RegisterRequest {
            webhook_url,
            events: WEBHOOK_EVENTS,
        };

        let response = self
            .client
            .post(format!("{}/webhook/register", self.base_url))
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_else(|e| {
            debug!("Failed to read relay response body: {e}");
            String::new()
        });

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("Registered webhook {webhook_url} with relay: {body}");
        Ok(())
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Status { status: u16, body: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "relay request failed: {e}"),
            Error::Status { status, body } => {
                write!(f, "unexpected status code: {status}, body: {body}")
            }
        }
    }
}

impl std::error::Error for Error {}

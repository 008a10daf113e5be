//! Groq chat-completion client.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chatbot::context::{Done, RequestContext};
use crate::chatbot::message::ChatMessage;
use crate::config::Config;
use crate::retry::{Attempt, RetryPolicy};

pub struct Client {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    system_prompt: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage; 2],
    model: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl Client {
    pub fn new(config: &Config, retry: RetryPolicy) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.groq_api_key.clone(),
            endpoint: config.groq_api_url.clone(),
            model: config.model_name.clone(),
            system_prompt: config.system_prompt.clone(),
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, prompt: &str) -> ChatRequest<'a> {
        ChatRequest {
            messages: [
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::user(prompt),
            ],
            model: &self.model,
        }
    }

    /// Send `prompt` with the configured system prompt and return the first
    /// completion.
    pub async fn send(&self, ctx: &RequestContext, prompt: &str) -> Result<String, Error> {
        let request = self.request(prompt);
        let mut retry = 0;

        let response = loop {
            let sent = ctx
                .run(
                    self.http
                        .post(&self.endpoint)
                        .bearer_auth(&self.api_key)
                        .json(&request)
                        .send(),
                )
                .await
                .map_err(Error::Cancelled)?;

            let attempt = match &sent {
                Ok(response) if response.status().is_success() => None,
                Ok(response) => Some(Attempt::Status(response.status())),
                Err(_) => Some(Attempt::Transport),
            };
            let Some(attempt) = attempt else {
                break sent;
            };

            retry += 1;
            let Some(delay) = self.retry.next_delay(retry, attempt) else {
                break sent;
            };
            warn!("Groq attempt {retry} failed ({attempt:?}), retrying in {delay:?}");
            ctx.run(tokio::time::sleep(delay))
                .await
                .map_err(Error::Cancelled)?;
        };

        let response = response.map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = ctx
                .run(response.text())
                .await
                .map_err(Error::Cancelled)?
                .unwrap_or_else(|e| {
                    debug!("Failed to read Groq error body: {e}");
                    String::new()
                });
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = ctx
            .run(response.text())
            .await
            .map_err(Error::Cancelled)?
            .map_err(|e| Error::Http(e.to_string()))?;
        debug!("Groq response: {} bytes", body.len());

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| Error::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(Error::Empty)
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
    Empty,
    Cancelled(Done),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api { status, body } => write!(f, "API error: {status}: {body}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
            Error::Cancelled(done) => write!(f, "Request aborted: {done}"),
        }
    }
}

impl std::error::Error for Error {}

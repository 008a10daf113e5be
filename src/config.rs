use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL_NAME: &str = "llama3-8b-8192";
pub const DEFAULT_DB_PATH: &str = "interactions.db";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful personal assistant with the following traits:
1. You are supportive and friendly in your interactions
2. You communicate in a warm and engaging manner
3. You are knowledgeable and always ready to help
4. You maintain a professional yet approachable demeanor
5. You provide accurate and helpful information
6. You adapt your communication style to be most helpful for the user";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    Missing(&'static str),
    /// A variable is set but cannot be parsed.
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "{key} environment variable is required"),
            Self::Invalid { key, value, reason } => {
                write!(f, "invalid value for {key} ('{value}'): {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Process-wide settings, built once at startup.
#[derive(Clone)]
pub struct Config {
    pub groq_api_key: String,
    pub groq_api_url: String,
    pub model_name: String,
    pub system_prompt: String,
    /// Timeout for a single LLM request, also the per-message deadline.
    pub request_timeout: Duration,

    pub db_path: PathBuf,
    pub db_max_open_conns: u32,
    pub db_max_idle_conns: u32,
    /// Zero means connections are never recycled for age.
    pub db_conn_max_lifetime: Duration,

    /// Listen address for webhook mode.
    pub webhook_addr: String,
    /// Base URL of the WhatsApp relay (e.g. "http://localhost:3000").
    pub relay_url: String,
    /// If set, registered with the relay when the webhook server starts.
    pub webhook_public_url: Option<String>,
    pub log_dir: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("groq_api_key", &"<redacted>")
            .field("groq_api_url", &self.groq_api_url)
            .field("model_name", &self.model_name)
            .field("system_prompt_chars", &self.system_prompt.chars().count())
            .field("request_timeout", &self.request_timeout)
            .field("db_path", &self.db_path)
            .field("db_max_open_conns", &self.db_max_open_conns)
            .field("db_max_idle_conns", &self.db_max_idle_conns)
            .field("db_conn_max_lifetime", &self.db_conn_max_lifetime)
            .field("webhook_addr", &self.webhook_addr)
            .field("relay_url", &self.relay_url)
            .field("webhook_public_url", &self.webhook_public_url)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let groq_api_key = get("GROQ_API_KEY").ok_or(ConfigError::Missing("GROQ_API_KEY"))?;

        let db_max_open_conns = parse_u32(&get, "DB_MAX_OPEN_CONNS", 25)?;
        if db_max_open_conns == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_MAX_OPEN_CONNS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            groq_api_key,
            groq_api_url: get("GROQ_API_URL").unwrap_or_else(|| DEFAULT_GROQ_API_URL.into()),
            model_name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.into()),
            system_prompt: get("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            request_timeout: parse_duration_var(&get, "REQUEST_TIMEOUT", Duration::from_secs(30))?,
            db_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            db_max_open_conns,
            db_max_idle_conns: parse_u32(&get, "DB_MAX_IDLE_CONNS", 25)?,
            db_conn_max_lifetime: parse_duration_var(
                &get,
                "DB_CONN_MAX_LIFETIME",
                Duration::from_secs(5 * 60),
            )?,
            webhook_addr: get("WEBHOOK_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            relay_url: get("RELAY_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost:3000".into()),
            webhook_public_url: get("WEBHOOK_PUBLIC_URL"),
            log_dir: get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        })
    }
}

fn parse_u32<G>(get: &G, key: &'static str, default: u32) -> Result<u32, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
    }
}

fn parse_duration_var<G>(
    get: &G,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => {
            parse_duration(&value).map_err(|reason| ConfigError::Invalid { key, value, reason })
        }
    }
}

/// Parse "300ms", "30s", "5m", "1h30m", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number at '{rest}'"));
        }
        let amount: u64 = rest[..digits].parse().map_err(|e| format!("{e}"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(3600).map(Duration::from_secs),
            "" => return Err(format!("missing unit after {amount}")),
            other => return Err(format!("unknown unit '{other}'")),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| "duration overflows".to_string())?;
    }
    Ok(total)
}

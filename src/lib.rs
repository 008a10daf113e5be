pub mod chatbot;
pub mod config;
pub mod groq;
pub mod retry;

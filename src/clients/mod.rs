//! HTTP clients for the external services used by the news and narrative stages

pub mod chat;
pub mod news;

pub use chat::{ChatClient, ChatMessage, ChatRequest};
pub use news::{NewsArticle, NewsClient, NewsQuery};

//! VERITAS chat layer: conversation history, depth-aware prompt framing and
//! citation extraction on top of the request orchestrator, with optional
//! context enrichment from outside sources.

pub mod citations;
pub mod context;
pub mod conversation;
pub mod error;
pub mod prompt;
pub mod service;
pub mod structured;

pub use {
    context::{ContextError, ContextSource, GithubSource, WaybackSource},
    conversation::Conversation,
    error::ChatError,
    service::{ChatReply, ChatService, ChatSettings},
    structured::StructuredAnswer,
};

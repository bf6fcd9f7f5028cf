//! affectmap-llm — LLM backend abstraction for paper classification and
//! topic summarization. Implements the `LlmBackend` trait, the concrete
//! chat-completion backends, and the retry/JSON-contract helpers the
//! analysis worker builds on.

pub mod backend;
pub mod json;

pub use backend::{complete_with_retry, LlmBackend, LlmError, LlmRequest, LlmResponse, Message};

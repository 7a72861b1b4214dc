//! API translation between Anthropic and `OpenAI` formats.
//!
//! Converts requests, responses, and streaming events between the two API
//! formats. Everything here is pure (no I/O); pricing for cache-token
//! estimation is passed in by the caller.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

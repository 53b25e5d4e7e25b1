//! API translation between Anthropic and OpenAI-style chat completion formats.
//!
//! The core of the bridge: converts requests, responses, and streaming events
//! between the two API formats. Everything here is pure apart from the stream
//! driver, which only awaits the chunk stream it is handed.

pub mod anthropic_types;
pub mod normalize;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod view;

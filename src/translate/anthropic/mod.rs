//! Anthropic Messages dialect, also served under the Claude Code prefix.

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

pub use request::normalize;
pub use response::to_messages_response;
pub use streaming::AnthropicStreamSynthesizer;

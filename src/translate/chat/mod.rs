//! OpenAI Chat Completions dialect.

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

pub use request::normalize;
pub use response::to_chat_response;
pub use streaming::ChatStreamSynthesizer;

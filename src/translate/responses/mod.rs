//! OpenAI Responses dialect.

pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

pub use request::normalize;
pub use response::to_response_object;
pub use streaming::ResponsesStreamSynthesizer;

pub mod canonical;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod journal;
pub mod models;
pub mod providers;
pub mod server;
pub mod taxonomy;
pub mod tokens;
pub mod translate;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use journal::SharedJournal;
pub use models::ModelSelector;
pub use server::{build_router, AppState};

pub mod adapters;
pub mod analysis;
pub mod config;
pub mod core;
pub mod domain;
pub mod extract;
pub mod server;
pub mod store;
pub mod utils;

pub use adapters::LocalStorage;
pub use analysis::{AnthropicClient, ProtocolAnalyzer, ProtocolGenerator};
pub use config::Settings;
pub use core::{ReportEngine, ReportOptions, ReportPipeline};
pub use extract::TextExtractor;
pub use server::{create_router, serve, AppState};
pub use store::SuggestionStore;
pub use utils::error::{ProtocolError, Result};

//! Types, configuration, errors and inference plumbing shared by every
//! docsift crate.

pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::{PipelineError, Result};
pub use llm::{InferenceBackend, OllamaClient, Summarizer, VisionModel};
pub use logging::init_tracing;
pub use types::*;

//! Analysis runtime: the engine transport, response parsing, and the
//! orchestrator that owns per-customer sync and refresh exclusivity.
//!
//! The LLM is only a text source here. Nothing it returns is trusted until
//! `parser` has decoded it, and a failed refresh never touches stored state.

pub mod engine;
pub mod llm;
pub mod locks;
pub mod orchestrator;
pub mod parser;
pub mod sync;

pub use engine::AnalysisEngineClient;
pub use llm::{ChatCompletionsClient, LlmClient};
pub use locks::LockTable;
pub use orchestrator::AnalysisOrchestrator;
pub use parser::ResponseParser;
pub use sync::{HistoryMerger, ProfileSummaries, SyncFailure, SyncReport};

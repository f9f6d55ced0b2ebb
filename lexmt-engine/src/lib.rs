//! lexmt-engine library interface
//!
//! Exposes the pipeline building blocks for the eval harness and for
//! integration testing: service clients, retrieval stores, agents, the
//! refinement layers, the orchestrator, and the preprocessing pipeline.

pub mod agents;
pub mod clients;
pub mod layers;
pub mod pipeline;
pub mod preprocess;
pub mod termbase;
pub mod tm;

pub use clients::{ChatBackend, ChatMessage, ChatRequest, EmbeddingClient, LlmClient, VectorDbClient};
pub use pipeline::{SegmentOutcome, SegmentStatus, Translator};
pub use preprocess::{PreprocessReport, TermPreprocessor};
pub use termbase::TermStore;
pub use tm::TmIndex;

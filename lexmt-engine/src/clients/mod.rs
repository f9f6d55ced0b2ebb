//! External service clients: chat completions, embeddings, vector collections

pub mod embedding;
pub mod llm;
pub mod vector;

pub use embedding::EmbeddingClient;
pub use llm::{ChatBackend, ChatMessage, ChatRequest, LlmClient};
pub use vector::{collection_name, CollectionKind, VectorDbClient, VectorMatch, VectorPoint};

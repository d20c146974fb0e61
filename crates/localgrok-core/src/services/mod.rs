pub mod ollama_client;
pub mod ollama_types;
pub mod prompt_builder;
pub mod search_client;

pub use ollama_client::{ByteStream, ChatBackend, ClientError, OllamaClient};
pub use ollama_types::{ChatChunk, ChatRequest, ChunkMessage, ServerModel, WireMessage};
pub use prompt_builder::build_system_prompt;
pub use search_client::{
    NO_RESULTS, SearchError, SearchHit, SearchProvider, SearchResults, SearxngClient,
    format_for_model,
};

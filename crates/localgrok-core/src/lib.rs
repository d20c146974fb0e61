//! Streaming chat orchestration for a locally hosted, Ollama-compatible model
//! server with an optional web-search tool.
//!
//! The UI layer talks to [`ChatOrchestrator`]; everything else is plumbing the
//! orchestrator drives: the model-server and search clients, the NDJSON stream
//! parser with its in-band tool-call scanner, the prompt builder, and the
//! conversation store it persists into.

pub mod config;
pub mod error;
pub mod models;
pub mod observable;
pub mod orchestrator;
pub mod repositories;
pub mod services;
pub mod settings;
pub mod stream;

pub use config::OrchestratorConfig;
pub use error::{ChatError, ChatResult};
pub use models::{
    Chat, ChatId, ConnectionStatus, Message, MessageId, ModelOption, Role, StreamingState,
    TurnOutcome, TurnPhase,
};
pub use observable::{Observable, Subscription};
pub use orchestrator::{ChatOrchestrator, ChatUiState, SessionContext, TurnHandle};
pub use repositories::{
    ConversationStore, InMemoryConversationStore, RepositoryError, RepositoryResult,
    SqliteConversationStore, StoreChange,
};
pub use settings::{Preferences, SettingsJsonRepository, SettingsRepository};

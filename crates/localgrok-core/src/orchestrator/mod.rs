mod chat_orchestrator;
mod session;
mod stream_manager;

pub use chat_orchestrator::{ChatOrchestrator, ChatUiState, TurnHandle};
pub use session::SessionContext;

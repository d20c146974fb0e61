pub mod conversation_repository;
pub mod conversation_sqlite_repository;
pub mod error;
pub mod in_memory_repository;
pub mod observe;

pub use conversation_repository::{BoxFuture, ConversationStore, StoreChange};
pub use conversation_sqlite_repository::SqliteConversationStore;
pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryConversationStore;
pub use observe::{observe_chats, observe_messages};

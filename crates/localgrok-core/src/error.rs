use thiserror::Error;

use crate::models::ChatId;
use crate::repositories::RepositoryError;
use crate::services::{ClientError, SearchError};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("A response is already being generated for chat {chat_id}")]
    TurnInProgress { chat_id: ChatId },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Chat {id} not found")]
    ChatNotFound { id: ChatId },

    #[error("Connection error: {0}")]
    Connection(#[from] ClientError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}

pub type ChatResult<T> = Result<T, ChatError>;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use super::error::RepositoryResult;
use crate::models::{Chat, ChatId, Message, MessageId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capacity of the change-notification channel. Slow subscribers that fall
/// further behind simply re-read.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Emitted after every successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// The chat list changed (create, rename, delete, timestamp bump).
    ChatsChanged,
    /// Messages of one chat changed.
    MessagesChanged { chat_id: ChatId },
}

/// Durable store for chats and their messages.
///
/// Every message write also bumps the owning chat's `updated_at`. Deleting a
/// chat deletes its messages. Each method is atomic with respect to a single
/// chat or message row.
pub trait ConversationStore: Send + Sync + 'static {
    /// Insert a chat; the returned copy carries the assigned id.
    fn create_chat(&self, chat: Chat) -> BoxFuture<'static, RepositoryResult<Chat>>;

    fn get_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<Option<Chat>>>;

    /// All chats, most recently updated first.
    fn list_chats(&self) -> BoxFuture<'static, RepositoryResult<Vec<Chat>>>;

    fn rename_chat(&self, id: ChatId, title: String) -> BoxFuture<'static, RepositoryResult<()>>;

    fn delete_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<()>>;

    fn delete_all_chats(&self) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Insert a message; the returned copy carries the assigned id.
    fn insert_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<Message>>;

    /// Overwrite an existing message row.
    fn update_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<()>>;

    fn get_message(&self, id: MessageId) -> BoxFuture<'static, RepositoryResult<Option<Message>>>;

    /// Messages of a chat in creation order.
    fn messages_for_chat(&self, chat_id: ChatId)
    -> BoxFuture<'static, RepositoryResult<Vec<Message>>>;

    /// Change notifications for writes made after this call.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::conversation_repository::{ConversationStore, StoreChange};
use crate::models::{Chat, ChatId, Message};
use crate::observable::Subscription;

/// Push the chat list to `callback` now and after every change to it.
pub fn observe_chats<F>(store: Arc<dyn ConversationStore>, mut callback: F) -> Subscription
where
    F: FnMut(Vec<Chat>) + Send + 'static,
{
    let mut changes = store.subscribe();
    Subscription::spawn(async move {
        loop {
            match store.list_chats().await {
                Ok(chats) => callback(chats),
                Err(e) => warn!(error = ?e, "Failed to reload chat list"),
            }

            // Message writes bump `updated_at`, which reorders the list, so
            // every change triggers a reload.
            match changes.recv().await {
                Ok(_) => {}
                // Missed some events; a reload covers them all.
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }
        }
    })
}

/// Push the messages of `chat_id` to `callback` now and after every change to them.
pub fn observe_messages<F>(
    store: Arc<dyn ConversationStore>,
    chat_id: ChatId,
    mut callback: F,
) -> Subscription
where
    F: FnMut(Vec<Message>) + Send + 'static,
{
    let mut changes = store.subscribe();
    Subscription::spawn(async move {
        loop {
            match store.messages_for_chat(chat_id).await {
                Ok(messages) => callback(messages),
                Err(e) => warn!(chat_id, error = ?e, "Failed to reload messages"),
            }

            loop {
                match changes.recv().await {
                    Ok(StoreChange::MessagesChanged { chat_id: changed }) if changed == chat_id => {
                        break;
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return,
                }
            }
        }
    })
}

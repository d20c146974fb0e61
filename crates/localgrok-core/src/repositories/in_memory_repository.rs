use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::conversation_repository::{
    BoxFuture, CHANGE_CHANNEL_CAPACITY, ConversationStore, StoreChange,
};
use super::error::{RepositoryError, RepositoryResult};
use crate::models::{Chat, ChatId, Message, MessageId, now_millis};

#[derive(Default)]
struct Tables {
    chats: BTreeMap<ChatId, Chat>,
    messages: BTreeMap<MessageId, Message>,
    next_chat_id: ChatId,
    next_message_id: MessageId,
}

/// In-memory conversation store.
/// Useful for testing and for sessions that should not touch disk.
#[derive(Clone)]
pub struct InMemoryConversationStore {
    tables: Arc<Mutex<Tables>>,
    changes: broadcast::Sender<StoreChange>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            changes,
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(changes: &broadcast::Sender<StoreChange>, change: StoreChange) {
    // No receivers is fine.
    let _ = changes.send(change);
}

impl ConversationStore for InMemoryConversationStore {
    fn create_chat(&self, chat: Chat) -> BoxFuture<'static, RepositoryResult<Chat>> {
        let tables = self.tables.clone();
        let changes = self.changes.clone();

        Box::pin(async move {
            let chat = {
                let mut t = tables.lock();
                t.next_chat_id += 1;
                let chat = Chat {
                    id: t.next_chat_id,
                    ..chat
                };
                t.chats.insert(chat.id, chat.clone());
                chat
            };
            notify(&changes, StoreChange::ChatsChanged);
            Ok(chat)
        })
    }

    fn get_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<Option<Chat>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().chats.get(&id).cloned()) })
    }

    fn list_chats(&self) -> BoxFuture<'static, RepositoryResult<Vec<Chat>>> {
        let tables = self.tables.clone();

        Box::pin(async move {
            let mut result: Vec<Chat> = tables.lock().chats.values().cloned().collect();

            // Sort by updated_at descending, newest id first on ties
            result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

            Ok(result)
        })
    }

    fn rename_chat(&self, id: ChatId, title: String) -> BoxFuture<'static, RepositoryResult<()>> {
        let tables = self.tables.clone();
        let changes = self.changes.clone();

        Box::pin(async move {
            {
                let mut t = tables.lock();
                let chat = t.chats.get_mut(&id).ok_or(RepositoryError::NotFound {
                    entity: "chat",
                    id,
                })?;
                chat.title = title;
                chat.updated_at = now_millis();
            }
            notify(&changes, StoreChange::ChatsChanged);
            Ok(())
        })
    }

    fn delete_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<()>> {
        let tables = self.tables.clone();
        let changes = self.changes.clone();

        Box::pin(async move {
            {
                let mut t = tables.lock();
                t.chats.remove(&id);
                t.messages.retain(|_, m| m.chat_id != id);
            }
            notify(&changes, StoreChange::MessagesChanged { chat_id: id });
            notify(&changes, StoreChange::ChatsChanged);
            Ok(())
        })
    }

    fn delete_all_chats(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let tables = self.tables.clone();
        let changes = self.changes.clone();

        Box::pin(async move {
            let removed: Vec<ChatId> = {
                let mut t = tables.lock();
                t.messages.clear();
                std::mem::take(&mut t.chats).into_keys().collect()
            };
            for chat_id in removed {
                notify(&changes, StoreChange::MessagesChanged { chat_id });
            }
            notify(&changes, StoreChange::ChatsChanged);
            Ok(())
        })
    }

    fn insert_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<Message>> {
        let tables = self.tables.clone();
        let changes = self.changes.clone();

        Box::pin(async move {
            let message = {
                let mut t = tables.lock();
                let chat_id = message.chat_id;
                if !t.chats.contains_key(&chat_id) {
                    return Err(RepositoryError::NotFound {
                        entity: "chat",
                        id: chat_id,
                    });
                }
                t.next_message_id += 1;
                let message = Message {
                    id: t.next_message_id,
                    ..message
                };
                t.messages.insert(message.id, message.clone());
                if let Some(chat) = t.chats.get_mut(&chat_id) {
                    chat.updated_at = now_millis();
                }
                message
            };
            notify(
                &changes,
                StoreChange::MessagesChanged {
                    chat_id: message.chat_id,
                },
            );
            Ok(message)
        })
    }

    fn update_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<()>> {
        let tables = self.tables.clone();
        let changes = self.changes.clone();

        Box::pin(async move {
            let chat_id = message.chat_id;
            {
                let mut t = tables.lock();
                let slot = t.messages.get_mut(&message.id).ok_or(RepositoryError::NotFound {
                    entity: "message",
                    id: message.id,
                })?;
                *slot = message;
                if let Some(chat) = t.chats.get_mut(&chat_id) {
                    chat.updated_at = now_millis();
                }
            }
            notify(&changes, StoreChange::MessagesChanged { chat_id });
            Ok(())
        })
    }

    fn get_message(&self, id: MessageId) -> BoxFuture<'static, RepositoryResult<Option<Message>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().messages.get(&id).cloned()) })
    }

    fn messages_for_chat(
        &self,
        chat_id: ChatId,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        let tables = self.tables.clone();

        Box::pin(async move {
            // Ids are assigned in insertion order, so BTreeMap order is creation order.
            Ok(tables
                .lock()
                .messages
                .values()
                .filter(|m| m.chat_id == chat_id)
                .cloned()
                .collect())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn test_create_and_list() {
        let store = InMemoryConversationStore::new();

        let chat = store.create_chat(Chat::new("Test Chat", "model-1")).await.unwrap();
        assert_eq!(chat.id, 1);

        let loaded = store.list_chats().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Test Chat");
    }

    #[tokio::test]
    async fn test_delete_cascades_to_messages() {
        let store = InMemoryConversationStore::new();
        let chat = store.create_chat(Chat::new("Doomed", "model-1")).await.unwrap();
        let keep = store.create_chat(Chat::new("Kept", "model-1")).await.unwrap();
        store.insert_message(Message::user(chat.id, "hi")).await.unwrap();
        store.insert_message(Message::user(keep.id, "hello")).await.unwrap();

        store.delete_chat(chat.id).await.unwrap();

        assert!(store.get_chat(chat.id).await.unwrap().is_none());
        assert!(store.messages_for_chat(chat.id).await.unwrap().is_empty());
        assert_eq!(store.messages_for_chat(keep.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sorting_by_updated_at() {
        let store = InMemoryConversationStore::new();
        let older = store.create_chat(Chat::new("Older", "m")).await.unwrap();
        let newer = store.create_chat(Chat::new("Newer", "m")).await.unwrap();

        let loaded = store.list_chats().await.unwrap();
        assert_eq!(loaded[0].id, newer.id);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.insert_message(Message::user(older.id, "bump")).await.unwrap();

        let loaded = store.list_chats().await.unwrap();
        assert_eq!(loaded[0].title, "Older");
        assert_eq!(loaded[1].title, "Newer");
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order_and_update_in_place() {
        let store = InMemoryConversationStore::new();
        let chat = store.create_chat(Chat::new("c", "m")).await.unwrap();
        store.insert_message(Message::user(chat.id, "first")).await.unwrap();
        let mut placeholder = store
            .insert_message(Message::assistant_placeholder(chat.id))
            .await
            .unwrap();

        placeholder.content = "answer".into();
        placeholder.is_streaming = false;
        store.update_message(placeholder.clone()).await.unwrap();

        let messages = store.messages_for_chat(chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "answer");
        assert!(!messages[1].is_streaming);
    }

    #[tokio::test]
    async fn test_insert_into_missing_chat_fails() {
        let store = InMemoryConversationStore::new();
        let err = store.insert_message(Message::user(42, "lost")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { entity: "chat", id: 42 }));
    }

    #[tokio::test]
    async fn test_writes_publish_changes() {
        let store = InMemoryConversationStore::new();
        let mut rx = store.subscribe();

        let chat = store.create_chat(Chat::new("c", "m")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), StoreChange::ChatsChanged);

        store.insert_message(Message::user(chat.id, "x")).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreChange::MessagesChanged { chat_id: chat.id }
        );
    }

    #[tokio::test]
    async fn test_delete_all() {
        let store = InMemoryConversationStore::new();
        for i in 0..3 {
            let chat = store.create_chat(Chat::new(format!("c{i}"), "m")).await.unwrap();
            store.insert_message(Message::user(chat.id, "x")).await.unwrap();
        }
        store.delete_all_chats().await.unwrap();
        assert!(store.list_chats().await.unwrap().is_empty());
    }
}

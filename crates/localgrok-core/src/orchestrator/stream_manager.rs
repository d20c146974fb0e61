use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::models::{ChatId, Message, StreamingState};

/// Live state of one turn, shared by the turn task and `stop_generation`.
///
/// Whoever holds the lock owns the message row. Once `finalized` is set no
/// further writes may happen, so the last write is always the terminal one.
pub(crate) struct TurnCell {
    pub message: Message,
    pub state: StreamingState,
    pub finalized: bool,
    last_flush: Instant,
}

impl TurnCell {
    pub fn new(message: Message) -> Self {
        Self {
            state: StreamingState::new(message.id),
            message,
            finalized: false,
            last_flush: Instant::now(),
        }
    }

    /// Whether a coalesced write is due.
    pub fn flush_due(&self, interval: Duration) -> bool {
        self.last_flush.elapsed() >= interval
    }

    /// Copy the live state onto the row and return the row to persist.
    pub fn snapshot_for_write(&mut self) -> Message {
        self.state.apply_to(&mut self.message);
        self.last_flush = Instant::now();
        self.message.clone()
    }

    /// Flip to the terminal non-streaming state.
    pub fn mark_final(&mut self) {
        self.finalized = true;
        self.state.is_streaming = false;
        self.state.is_thinking = false;
        self.state.is_executing_tool = false;
    }
}

pub(crate) type SharedTurn = Arc<tokio::sync::Mutex<TurnCell>>;

/// Bookkeeping for a registered turn.
#[derive(Clone)]
pub(crate) struct ActiveTurn {
    pub cancel: CancellationToken,
    pub cell: SharedTurn,
}

/// Per-chat turn registry.
///
/// Holds at most one active turn per chat. Text is not accumulated here;
/// that lives in each turn's [`TurnCell`]. This only tracks lifecycle and
/// cancellation.
#[derive(Default)]
pub(crate) struct StreamManager {
    turns: Mutex<HashMap<ChatId, ActiveTurn>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the turn slot for `chat_id`. Fails if a turn is already active.
    pub fn register(&self, chat_id: ChatId, cell: SharedTurn) -> ChatResult<ActiveTurn> {
        let mut turns = self.turns.lock();
        if turns.contains_key(&chat_id) {
            debug!(chat_id, "Rejecting turn, one is already active");
            return Err(ChatError::TurnInProgress { chat_id });
        }

        let turn = ActiveTurn {
            cancel: CancellationToken::new(),
            cell,
        };
        turns.insert(chat_id, turn.clone());
        Ok(turn)
    }

    /// Remove and cancel the turn for `chat_id`, if any.
    pub fn stop(&self, chat_id: ChatId) -> Option<ActiveTurn> {
        let turn = self.turns.lock().remove(&chat_id)?;
        turn.cancel.cancel();
        debug!(chat_id, "Stream stopped");
        Some(turn)
    }

    /// Release the slot when a turn ends on its own. A slot that has since been
    /// taken by another turn is left alone.
    pub fn finish(&self, chat_id: ChatId, cell: &SharedTurn) {
        let mut turns = self.turns.lock();
        if turns
            .get(&chat_id)
            .is_some_and(|t| Arc::ptr_eq(&t.cell, cell))
        {
            turns.remove(&chat_id);
        }
    }

    pub fn is_streaming(&self, chat_id: ChatId) -> bool {
        self.turns.lock().contains_key(&chat_id)
    }

    /// Chats that currently have a turn, in no particular order.
    pub fn active_chats(&self) -> Vec<ChatId> {
        self.turns.lock().keys().copied().collect()
    }

    pub fn has_active_streams(&self) -> bool {
        !self.turns.lock().is_empty()
    }

    /// Stop every active turn (shutdown, delete-all).
    pub fn stop_all(&self) -> Vec<(ChatId, ActiveTurn)> {
        let drained: Vec<(ChatId, ActiveTurn)> = self.turns.lock().drain().collect();
        for (_, turn) in &drained {
            turn.cancel.cancel();
        }
        drained
    }
}

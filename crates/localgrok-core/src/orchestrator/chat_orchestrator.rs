use std::sync::Arc;

use chrono::Local;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::SessionContext;
use super::stream_manager::{SharedTurn, StreamManager, TurnCell};
use crate::config::OrchestratorConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::chat::DEFAULT_CHAT_TITLE;
use crate::models::{
    Chat, ChatId, ConnectionStatus, Message, MessageId, Role, StreamingState, TurnOutcome,
    TurnPhase, supports_reasoning,
};
use crate::observable::{Observable, Subscription};
use crate::repositories::{ConversationStore, observe_chats, observe_messages};
use crate::services::{
    ChatBackend, ChatRequest, ClientError, OllamaClient, SearchProvider, SearxngClient,
    ServerModel, WireMessage, build_system_prompt, format_for_model,
};
use crate::settings::{GenerationOptions, Preferences};
use crate::stream::{
    StreamEvent, TOOL_CALL_CLOSE, TOOL_CALL_OPEN, WEB_SEARCH_DISPLAY_NAME, WEB_SEARCH_TOOL,
    parse_stream,
};

/// What the chat screen renders besides the message list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatUiState {
    /// A turn is active in the current chat.
    pub is_generating: bool,
    /// One-line error from the last failed operation.
    pub error: Option<String>,
    pub connection_status: ConnectionStatus,
}

/// Handle to a spawned turn.
#[derive(Debug)]
pub struct TurnHandle {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Wait for the turn to reach a terminal state.
    pub async fn wait(self) -> TurnOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => TurnOutcome::Failed(format!("Turn task ended unexpectedly: {e}")),
        }
    }
}

struct Backends {
    chat: Arc<dyn ChatBackend>,
    search: Arc<dyn SearchProvider>,
}

struct TurnJob {
    chat_id: ChatId,
    cell: SharedTurn,
    cancel: CancellationToken,
    request: ChatRequest,
    tool_detection: bool,
}

/// Between text written before a tool call and the answer that follows it.
const ANSWER_SEPARATOR: &str = "\n\n";

/// How one streaming request ended.
enum LegEnd {
    Finished(TurnOutcome),
    ToolCall { query: String },
}

struct Inner {
    store: Arc<dyn ConversationStore>,
    backends: RwLock<Backends>,
    generation: RwLock<GenerationOptions>,
    streams: StreamManager,
    session: SessionContext,
    ui_state: Observable<ChatUiState>,
    streaming: Observable<Option<StreamingState>>,
    connection: Observable<ConnectionStatus>,
    models: Observable<Vec<ServerModel>>,
    config: OrchestratorConfig,
}

/// Owns the turn lifecycle and the session state the UI binds to.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatOrchestrator {
    inner: Arc<Inner>,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        chat_backend: Arc<dyn ChatBackend>,
        search: Arc<dyn SearchProvider>,
        default_model: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backends: RwLock::new(Backends {
                    chat: chat_backend,
                    search,
                }),
                generation: RwLock::new(GenerationOptions::default()),
                streams: StreamManager::new(),
                session: SessionContext::new(default_model),
                ui_state: Observable::default(),
                streaming: Observable::new(None),
                connection: Observable::default(),
                models: Observable::new(Vec::new()),
                config,
            }),
        }
    }

    /// Build HTTP clients for the server described by `preferences`.
    pub fn from_preferences(
        store: Arc<dyn ConversationStore>,
        preferences: &Preferences,
        config: OrchestratorConfig,
    ) -> ChatResult<Self> {
        let (chat, search) = build_clients(preferences, &config)?;
        let orchestrator = Self::new(
            store,
            chat,
            search,
            preferences.default_model.clone(),
            config,
        );
        *orchestrator.inner.generation.write() = preferences.generation.clone();
        Ok(orchestrator)
    }

    pub fn session(&self) -> &SessionContext {
        &self.inner.session
    }

    pub fn ui_state(&self) -> &Observable<ChatUiState> {
        &self.inner.ui_state
    }

    /// Token-level view of the turn being streamed, if any.
    pub fn streaming_state(&self) -> &Observable<Option<StreamingState>> {
        &self.inner.streaming
    }

    pub fn connection_status(&self) -> &Observable<ConnectionStatus> {
        &self.inner.connection
    }

    /// Models reported by the server at the last successful probe.
    pub fn available_models(&self) -> &Observable<Vec<ServerModel>> {
        &self.inner.models
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.inner.store
    }

    pub fn observe_chats<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(Vec<Chat>) + Send + 'static,
    {
        observe_chats(self.inner.store.clone(), callback)
    }

    pub fn observe_messages<F>(&self, chat_id: ChatId, callback: F) -> Subscription
    where
        F: FnMut(Vec<Message>) + Send + 'static,
    {
        observe_messages(self.inner.store.clone(), chat_id, callback)
    }

    pub fn is_generating(&self, chat_id: ChatId) -> bool {
        self.inner.streams.is_streaming(chat_id)
    }

    /// Send with the currently selected model.
    pub async fn send(&self, content: &str) -> ChatResult<TurnHandle> {
        let model = self.inner.session.selected_model.get();
        self.send_message(content, &model).await
    }

    /// Start a turn in the current chat, creating the chat if none is selected.
    ///
    /// Returns once the user message and the assistant placeholder are stored;
    /// the response streams in a background task.
    pub async fn send_message(&self, content: &str, model: &str) -> ChatResult<TurnHandle> {
        let inner = &self.inner;
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (chat, created) = inner.resolve_chat(content, model).await?;
        let chat_id = chat.id;

        // Hold the cell until the placeholder exists so a concurrent stop
        // always sees a real row.
        let cell: SharedTurn = Arc::new(tokio::sync::Mutex::new(TurnCell::new(
            Message::assistant_placeholder(chat_id),
        )));
        let mut guard = cell.clone().lock_owned().await;
        let turn = inner.streams.register(chat_id, cell.clone())?;

        let prepared = async {
            if !created && chat.has_default_title() {
                inner
                    .store
                    .rename_chat(chat_id, Chat::title_from_message(content))
                    .await?;
            }
            inner.store.insert_message(Message::user(chat_id, content)).await?;
            let history = inner.store.messages_for_chat(chat_id).await?;
            let placeholder = inner
                .store
                .insert_message(Message::assistant_placeholder(chat_id))
                .await?;
            Ok::<_, crate::repositories::RepositoryError>((history, placeholder))
        }
        .await;

        let (history, placeholder) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(chat_id, error = ?e, "Failed to store the new turn");
                guard.finalized = true;
                drop(guard);
                inner.streams.finish(chat_id, &cell);
                inner.refresh_generating();
                return Err(e.into());
            }
        };

        let tools_enabled = inner.session.tools_enabled.get();
        let request = build_chat_request(
            model,
            tools_enabled,
            &history,
            &inner.generation.read(),
            &build_system_prompt(tools_enabled, model, &Local::now()),
        );
        let tool_detection = tools_enabled && supports_reasoning(model);

        let message_id = placeholder.id;
        *guard = TurnCell::new(placeholder);
        inner.streaming.set(Some(guard.state.clone()));
        inner.ui_state.update(|s| {
            s.error = None;
            s.is_generating = true;
            true
        });
        drop(guard);

        debug!(chat_id, message_id, model, tools_enabled, "Starting turn");

        let job = TurnJob {
            chat_id,
            cell,
            cancel: turn.cancel,
            request,
            tool_detection,
        };
        let task = tokio::spawn(run_turn(self.inner.clone(), job));

        Ok(TurnHandle {
            chat_id,
            message_id,
            task,
        })
    }

    /// Cancel the active turn, including one left running in a chat the user
    /// has since navigated away from. The message is final and non-streaming
    /// when this returns. No-op without an active turn.
    pub async fn stop_generation(&self) -> ChatResult<()> {
        let mut result = Ok(());
        for chat_id in self.inner.streams.active_chats() {
            if let Err(e) = self.inner.stop_chat(chat_id).await {
                result = result.and(Err(e));
            }
        }
        result
    }

    /// Stop every active turn, e.g. before exit.
    pub async fn shutdown(&self) {
        if !self.inner.streams.has_active_streams() {
            return;
        }
        self.inner.stop_all().await;
    }

    /// Record a local hint about configuring the server. No network call.
    pub async fn send_setup_reminder(&self) -> ChatResult<Message> {
        let chat_id = match self.inner.current_chat().await? {
            Some(chat) => chat.id,
            None => self.create_new_chat().await?.id,
        };
        let url = self.inner.backends.read().chat.base_url().to_string();
        let message = self
            .inner
            .store
            .insert_message(Message::assistant(chat_id, setup_reminder_text(&url)))
            .await?;
        Ok(message)
    }

    pub async fn create_new_chat(&self) -> ChatResult<Chat> {
        let model = self.inner.session.selected_model.get();
        let chat = self
            .inner
            .store
            .create_chat(Chat::new(DEFAULT_CHAT_TITLE, model))
            .await?;
        debug!(chat_id = chat.id, "Created chat");
        self.inner.enter_chat(Some(chat.id));
        Ok(chat)
    }

    pub async fn select_chat(&self, chat_id: ChatId) -> ChatResult<Chat> {
        let chat = self
            .inner
            .store
            .get_chat(chat_id)
            .await?
            .ok_or(ChatError::ChatNotFound { id: chat_id })?;
        self.inner.enter_chat(Some(chat_id));
        Ok(chat)
    }

    pub async fn rename_chat(&self, chat_id: ChatId, title: &str) -> ChatResult<()> {
        let title = title.trim();
        let title = if title.is_empty() {
            DEFAULT_CHAT_TITLE
        } else {
            title
        };
        self.inner
            .store
            .rename_chat(chat_id, title.to_string())
            .await
            .map_err(|e| match e {
                crate::repositories::RepositoryError::NotFound { .. } => {
                    ChatError::ChatNotFound { id: chat_id }
                }
                other => other.into(),
            })
    }

    /// Delete a chat, cancelling its turn first.
    pub async fn delete_chat(&self, chat_id: ChatId) -> ChatResult<()> {
        self.inner.stop_chat(chat_id).await?;
        self.inner.store.delete_chat(chat_id).await?;
        if self.inner.session.current_chat.get() == Some(chat_id) {
            self.inner.enter_chat(None);
        }
        info!(chat_id, "Deleted chat");
        Ok(())
    }

    pub async fn delete_all_chats(&self) -> ChatResult<()> {
        self.inner.stop_all().await;
        self.inner.store.delete_all_chats().await?;
        self.inner.enter_chat(None);
        info!("Deleted all chats");
        Ok(())
    }

    /// Model for the next turn.
    pub fn set_model(&self, model_id: impl Into<String>) {
        let model_id = model_id.into();
        debug!(model = %model_id, "Selected model");
        self.inner.session.selected_model.set(model_id);
    }

    /// Flip the tools/reasoning toggle for the next turn; returns the new value.
    pub fn toggle_brain(&self) -> bool {
        let mut enabled = false;
        self.inner.session.tools_enabled.update(|v| {
            *v = !*v;
            enabled = *v;
            true
        });
        enabled
    }

    /// Probe the server and, when it answers, reload its model list.
    pub async fn refresh_server_connection(&self) -> ConnectionStatus {
        self.inner.set_connection(ConnectionStatus::Connecting);
        let backend = self.inner.backends.read().chat.clone();

        let status = match backend.health_check().await {
            Ok(()) => {
                match backend.list_models().await {
                    Ok(models) => {
                        debug!(count = models.len(), "Loaded server models");
                        self.inner.models.set(models);
                    }
                    Err(e) => warn!(error = %e, "Failed to list models"),
                }
                info!(url = %backend.base_url(), "Connected to model server");
                ConnectionStatus::Connected
            }
            Err(e) => {
                warn!(url = %backend.base_url(), error = %e, "Model server unreachable");
                ConnectionStatus::Error(e.to_string())
            }
        };

        self.inner.set_connection(status.clone());
        status
    }
}

impl Inner {
    async fn current_chat(&self) -> ChatResult<Option<Chat>> {
        match self.session.current_chat.get() {
            Some(id) => Ok(self.store.get_chat(id).await?),
            None => Ok(None),
        }
    }

    /// The chat a new message goes to, and whether it was just created.
    async fn resolve_chat(&self, content: &str, model: &str) -> ChatResult<(Chat, bool)> {
        if let Some(chat) = self.current_chat().await? {
            return Ok((chat, false));
        }

        let chat = self
            .store
            .create_chat(Chat::new(Chat::title_from_message(content), model))
            .await?;
        debug!(chat_id = chat.id, "Created chat for first message");
        self.session.current_chat.set(Some(chat.id));
        Ok((chat, true))
    }

    fn enter_chat(&self, chat_id: Option<ChatId>) {
        self.session.current_chat.set(chat_id);
        self.ui_state.update(|s| {
            s.error = None;
            true
        });
        self.refresh_generating();
    }

    fn refresh_generating(&self) {
        let generating = self
            .session
            .current_chat
            .get()
            .is_some_and(|id| self.streams.is_streaming(id));
        self.ui_state.update(|s| {
            let changed = s.is_generating != generating;
            s.is_generating = generating;
            changed
        });
    }

    fn set_connection(&self, status: ConnectionStatus) {
        self.connection.set(status.clone());
        self.ui_state.update(|s| {
            let changed = s.connection_status != status;
            s.connection_status = status;
            changed
        });
    }

    fn set_error(&self, message: String) {
        self.ui_state.update(|s| {
            s.error = Some(message);
            true
        });
    }

    fn publish(&self, state: &StreamingState) {
        self.streaming.set(Some(state.clone()));
    }

    fn clear_streaming(&self, message_id: MessageId) {
        self.streaming.update(|s| {
            if s.as_ref().is_some_and(|st| st.message_id == message_id) {
                *s = None;
                true
            } else {
                false
            }
        });
    }

    async fn flush(&self, cell: &mut TurnCell) {
        let row = cell.snapshot_for_write();
        if let Err(e) = self.store.update_message(row).await {
            error!(message_id = cell.message.id, error = ?e, "Failed to persist message");
            self.set_error(format!("Storage error: {e}"));
        }
    }

    async fn stop_chat(&self, chat_id: ChatId) -> ChatResult<()> {
        let Some(turn) = self.streams.stop(chat_id) else {
            return Ok(());
        };

        let mut cell = turn.cell.lock().await;
        let result = if cell.finalized {
            Ok(())
        } else {
            cell.mark_final();
            let row = cell.snapshot_for_write();
            self.store.update_message(row).await
        };
        self.clear_streaming(cell.message.id);
        drop(cell);

        self.refresh_generating();
        info!(chat_id, "Generation stopped");
        result.map_err(ChatError::from)
    }

    async fn stop_all(&self) {
        for (chat_id, turn) in self.streams.stop_all() {
            let mut cell = turn.cell.lock().await;
            if !cell.finalized {
                cell.mark_final();
                self.flush(&mut cell).await;
            }
            self.clear_streaming(cell.message.id);
            debug!(chat_id, "Stopped turn");
        }
        self.refresh_generating();
    }

    async fn finalize_turn(&self, job: &TurnJob, outcome: &TurnOutcome) {
        {
            let mut cell = job.cell.lock().await;
            if !cell.finalized {
                cell.mark_final();
                if let TurnOutcome::Failed(reason) = outcome
                    && cell.state.content.trim().is_empty()
                {
                    cell.state.content = format!("Error: {reason}");
                }
                self.flush(&mut cell).await;
            }
            self.clear_streaming(cell.message.id);
        }
        self.streams.finish(job.chat_id, &job.cell);

        match outcome {
            TurnOutcome::Complete => debug!(chat_id = job.chat_id, "Turn complete"),
            TurnOutcome::Cancelled => debug!(chat_id = job.chat_id, "Turn cancelled"),
            TurnOutcome::Failed(reason) => {
                warn!(chat_id = job.chat_id, reason = %reason, "Turn failed");
                self.set_error(reason.clone());
            }
        }
        self.refresh_generating();
    }
}

async fn run_turn(inner: Arc<Inner>, job: TurnJob) -> TurnOutcome {
    let outcome = drive_turn(&inner, &job).await;
    inner.finalize_turn(&job, &outcome).await;
    outcome
}

async fn drive_turn(inner: &Inner, job: &TurnJob) -> TurnOutcome {
    let (backend, search) = {
        let backends = inner.backends.read();
        (backends.chat.clone(), backends.search.clone())
    };

    let query = match run_leg(inner, job, backend.as_ref(), &job.request, job.tool_detection, false)
        .await
    {
        LegEnd::Finished(outcome) => return outcome,
        LegEnd::ToolCall { query } => query,
    };

    let preamble = {
        let mut cell = job.cell.lock().await;
        if cell.finalized {
            return TurnOutcome::Cancelled;
        }
        cell.state.phase = TurnPhase::ExecutingTool;
        cell.state.is_thinking = false;
        cell.state.is_executing_tool = true;
        cell.state.tool_used = true;
        cell.state.tool_display_name = WEB_SEARCH_DISPLAY_NAME.to_string();
        inner.publish(&cell.state);
        inner.flush(&mut cell).await;
        cell.state.content.trim_end().to_string()
    };

    debug!(chat_id = job.chat_id, query = %query, "Running web search");
    let tool_result = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => return TurnOutcome::Cancelled,
        result = search.search(&query) => match result {
            Ok(results) => format_for_model(
                &results.with_snippet_limit(inner.config.max_snippet_chars),
                inner.config.max_search_results,
            ),
            Err(e) => {
                warn!(chat_id = job.chat_id, error = %e, "Web search failed");
                format!("Search failed: {e}")
            }
        },
    };

    {
        let mut cell = job.cell.lock().await;
        if cell.finalized {
            return TurnOutcome::Cancelled;
        }
        cell.state.is_executing_tool = false;
        inner.publish(&cell.state);
    }

    // The model sees its own text from before the directive.
    let mut echoed = preamble;
    if !echoed.is_empty() {
        echoed.push_str(ANSWER_SEPARATOR);
    }
    echoed.push_str(&tool_call_directive(&query));

    let mut continuation = job.request.clone();
    continuation
        .messages
        .push(WireMessage::new(Role::Assistant, echoed));
    continuation.messages.push(WireMessage::new(
        Role::Tool,
        format!("<tool_result>\n{tool_result}\n</tool_result>"),
    ));

    match run_leg(inner, job, backend.as_ref(), &continuation, false, true).await {
        LegEnd::Finished(outcome) => outcome,
        // Detection is off for the continuation.
        LegEnd::ToolCall { .. } => TurnOutcome::Complete,
    }
}

/// Stream one request into the turn's cell until a terminal event, a tool
/// call, or cancellation. Dropping the event stream closes the connection.
async fn run_leg(
    inner: &Inner,
    job: &TurnJob,
    backend: &dyn ChatBackend,
    request: &ChatRequest,
    tool_detection: bool,
    resumed: bool,
) -> LegEnd {
    let body = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => return LegEnd::Finished(TurnOutcome::Cancelled),
        body = backend.stream_chat(request) => body,
    };
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!(chat_id = job.chat_id, error = %e, "Chat request failed");
            return LegEnd::Finished(TurnOutcome::Failed(connection_message(&e)));
        }
    };

    let mut events = parse_stream(body, tool_detection);

    loop {
        let event = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => return LegEnd::Finished(TurnOutcome::Cancelled),
            event = events.next() => event,
        };
        let Some(event) = event else {
            return LegEnd::Finished(TurnOutcome::Complete);
        };

        let mut cell = job.cell.lock().await;
        if cell.finalized {
            return LegEnd::Finished(TurnOutcome::Cancelled);
        }

        let phase_changed = match event {
            StreamEvent::ThinkingDelta(text) => {
                if cell.state.answer_started() {
                    false
                } else {
                    cell.state.reasoning.push_str(&text);
                    cell.state.is_thinking = true;
                    let entered = cell.state.phase != TurnPhase::Thinking;
                    cell.state.phase = TurnPhase::Thinking;
                    entered
                }
            }
            StreamEvent::ContentDelta(text) => {
                let phase = TurnPhase::Answering { resumed };
                let entered = cell.state.phase != phase;
                if entered && resumed && !cell.state.content.trim().is_empty() {
                    let kept = cell.state.content.trim_end().len();
                    cell.state.content.truncate(kept);
                    cell.state.content.push_str(ANSWER_SEPARATOR);
                }
                cell.state.content.push_str(&text);
                cell.state.is_thinking = false;
                cell.state.phase = phase;
                entered
            }
            StreamEvent::ToolCallDetected { name, query } => {
                debug!(chat_id = job.chat_id, tool = %name, "Tool call detected");
                return LegEnd::ToolCall { query };
            }
            StreamEvent::Done { .. } => return LegEnd::Finished(TurnOutcome::Complete),
            StreamEvent::Failed(reason) => return LegEnd::Finished(TurnOutcome::Failed(reason)),
        };

        inner.publish(&cell.state);
        if phase_changed || cell.flush_due(inner.config.flush_interval) {
            inner.flush(&mut cell).await;
        }
    }
}

fn connection_message(e: &ClientError) -> String {
    match e {
        ClientError::Status { body, .. } if !body.trim().is_empty() => body.clone(),
        other => other.to_string(),
    }
}

/// Assemble the request for a turn.
///
/// Stored system messages and streaming placeholders are left out; the fresh
/// system prompt goes first when there is one.
pub(crate) fn build_chat_request(
    model: &str,
    tools_enabled: bool,
    history: &[Message],
    generation: &GenerationOptions,
    system_prompt: &str,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(WireMessage::new(Role::System, system_prompt));
    }
    messages.extend(
        history
            .iter()
            .filter(|m| m.role != Role::System && !m.is_streaming && !m.content.trim().is_empty())
            .map(|m| WireMessage::new(m.role, m.content.clone())),
    );

    ChatRequest {
        model: model.to_string(),
        messages,
        stream: true,
        think: supports_reasoning(model).then_some(tools_enabled),
        options: (!generation.is_empty()).then(|| generation.clone()),
    }
}

fn tool_call_directive(query: &str) -> String {
    let body = serde_json::json!({ "name": WEB_SEARCH_TOOL, "query": query });
    format!("{TOOL_CALL_OPEN}{body}{TOOL_CALL_CLOSE}")
}

fn build_clients(
    preferences: &Preferences,
    config: &OrchestratorConfig,
) -> ChatResult<(Arc<dyn ChatBackend>, Arc<dyn SearchProvider>)> {
    let chat = OllamaClient::new(
        preferences.server_url(),
        config.server_connect_timeout,
        config.server_read_timeout,
    )?;
    let search = SearxngClient::new(
        preferences.search_url(),
        config.search_connect_timeout,
        config.search_read_timeout,
    )?;
    Ok((Arc::new(chat), Arc::new(search)))
}

fn setup_reminder_text(server_url: &str) -> String {
    format!(
        "I can't reach the model server at {server_url}.\n\n\
         To get started:\n\
         1. Make sure Ollama is running on your computer and listening on the network \
         (set OLLAMA_HOST=0.0.0.0).\n\
         2. Open settings and enter that computer's IP address and port.\n\
         3. Come back here and say hi!"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use parking_lot::Mutex;

    use super::*;
    use tokio::sync::broadcast;

    use crate::repositories::{
        BoxFuture, InMemoryConversationStore, RepositoryResult, StoreChange,
    };
    use crate::services::{ByteStream, SearchError, SearchHit, SearchResults};

    const FLASH: &str = "gemma3:1b-it-qat";
    const THINK: &str = "qwen3:1.7b";

    enum Scripted {
        Body(Vec<String>),
        /// Emit the lines, then never finish.
        Hang(Vec<String>),
        Error(ClientError),
    }

    #[derive(Default)]
    struct FakeBackend {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<ChatRequest>>,
        healthy: bool,
    }

    impl FakeBackend {
        fn with(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                healthy: true,
            })
        }
    }

    fn lines_to_stream(lines: Vec<String>) -> stream::Iter<std::vec::IntoIter<Result<Bytes, ClientError>>> {
        stream::iter(
            lines
                .into_iter()
                .map(|l| Ok(Bytes::from(l)))
                .collect::<Vec<_>>(),
        )
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
            self.requests.lock().push(request.clone());
            let next = self.script.lock().pop_front();
            match next {
                Some(Scripted::Body(lines)) => Ok(lines_to_stream(lines).boxed()),
                Some(Scripted::Hang(lines)) => {
                    Ok(lines_to_stream(lines).chain(stream::pending()).boxed())
                }
                Some(Scripted::Error(e)) => Err(e),
                None => Err(ClientError::Stream("no scripted response".into())),
            }
        }

        async fn list_models(&self) -> Result<Vec<ServerModel>, ClientError> {
            Ok(vec![ServerModel {
                name: THINK.into(),
                model: THINK.into(),
                size: None,
                family: Some("qwen3".into()),
                parameter_size: None,
                quantization_level: None,
            }])
        }

        async fn health_check(&self) -> Result<(), ClientError> {
            if self.healthy {
                Ok(())
            } else {
                Err(ClientError::Unreachable {
                    url: self.base_url().into(),
                    message: "connection refused".into(),
                })
            }
        }

        fn base_url(&self) -> &str {
            "http://10.0.0.2:11434"
        }
    }

    struct FakeSearch {
        result: Result<SearchResults, SearchError>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeSearch {
        fn ok(results: SearchResults) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(results),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: Err(SearchError::Unreachable("connection refused".into())),
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, query: &str) -> Result<SearchResults, SearchError> {
            self.queries.lock().push(query.to_string());
            self.result.clone()
        }
    }

    fn content(text: &str, done: bool) -> String {
        format!(
            "{}\n",
            serde_json::json!({"message": {"role": "assistant", "content": text}, "done": done})
        )
    }

    fn thinking(text: &str) -> String {
        format!(
            "{}\n",
            serde_json::json!({"message": {"role": "assistant", "content": "", "thinking": text}, "done": false})
        )
    }

    /// A search that never answers.
    struct StalledSearch;

    #[async_trait]
    impl SearchProvider for StalledSearch {
        async fn search(&self, _query: &str) -> Result<SearchResults, SearchError> {
            std::future::pending().await
        }
    }

    /// Counts `update_message` calls on top of the in-memory store.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryConversationStore,
        updates: AtomicUsize,
    }

    impl ConversationStore for CountingStore {
        fn create_chat(&self, chat: Chat) -> BoxFuture<'static, RepositoryResult<Chat>> {
            self.inner.create_chat(chat)
        }

        fn get_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<Option<Chat>>> {
            self.inner.get_chat(id)
        }

        fn list_chats(&self) -> BoxFuture<'static, RepositoryResult<Vec<Chat>>> {
            self.inner.list_chats()
        }

        fn rename_chat(&self, id: ChatId, title: String) -> BoxFuture<'static, RepositoryResult<()>> {
            self.inner.rename_chat(id, title)
        }

        fn delete_chat(&self, id: ChatId) -> BoxFuture<'static, RepositoryResult<()>> {
            self.inner.delete_chat(id)
        }

        fn delete_all_chats(&self) -> BoxFuture<'static, RepositoryResult<()>> {
            self.inner.delete_all_chats()
        }

        fn insert_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<Message>> {
            self.inner.insert_message(message)
        }

        fn update_message(&self, message: Message) -> BoxFuture<'static, RepositoryResult<()>> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update_message(message)
        }

        fn get_message(&self, id: MessageId) -> BoxFuture<'static, RepositoryResult<Option<Message>>> {
            self.inner.get_message(id)
        }

        fn messages_for_chat(
            &self,
            chat_id: ChatId,
        ) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
            self.inner.messages_for_chat(chat_id)
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
            self.inner.subscribe()
        }
    }

    fn orchestrator(
        backend: Arc<FakeBackend>,
        search: Arc<dyn SearchProvider>,
    ) -> (ChatOrchestrator, Arc<dyn ConversationStore>) {
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        let orch = ChatOrchestrator::new(
            store.clone(),
            backend,
            search,
            FLASH,
            OrchestratorConfig::default(),
        );
        (orch, store)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_simple_turn_completes_and_persists() {
        let backend = FakeBackend::with(vec![Scripted::Body(vec![
            content("Hello", false),
            content(" there!", false),
            content("", true),
        ])]);
        let (orch, store) = orchestrator(backend.clone(), FakeSearch::ok(SearchResults::default()));

        let handle = orch.send_message("Hi", FLASH).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Complete);

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, "Hello there!");
        assert!(!message.is_streaming);
        assert!(!message.is_thinking);
        assert!(!message.tool_used);

        let chat = store.get_chat(message.chat_id).await.unwrap().unwrap();
        assert_eq!(chat.title, "Hi");
        assert_eq!(orch.session().current_chat.get(), Some(chat.id));
        assert!(!orch.ui_state().get().is_generating);
        assert!(orch.streaming_state().get().is_none());

        // Non-reasoning models get no system prompt and no think flag.
        let requests = backend.requests.lock();
        assert_eq!(requests[0].think, None);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_tool_call_runs_search_and_continues() {
        let directive = r#"<tool_call>{"name":"web_search","query":"weather"}</tool_call>"#;
        let mut first: Vec<String> = vec![thinking("Need live data.")];
        first.extend(directive.chars().map(|c| content(&c.to_string(), false)));
        first.push(content("", true));

        let backend = FakeBackend::with(vec![
            Scripted::Body(first),
            Scripted::Body(vec![content("It is sunny.", false), content("", true)]),
        ]);
        let search = FakeSearch::ok(SearchResults {
            results: vec![SearchHit {
                title: Some("Forecast".into()),
                content: Some("Sunny, 24C".into()),
                url: None,
            }],
            total_count: 1,
            ..SearchResults::default()
        });
        let (orch, store) = orchestrator(backend.clone(), search.clone());
        orch.toggle_brain();

        let handle = orch.send_message("What's the weather?", THINK).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Complete);

        assert_eq!(*search.queries.lock(), vec!["weather".to_string()]);

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, "It is sunny.");
        assert_eq!(message.reasoning_content, "Need live data.");
        assert!(message.tool_used);
        assert_eq!(message.tool_display_name, "Searching the web");
        assert!(!message.is_streaming);

        let requests = backend.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].think, Some(true));
        assert_eq!(requests[0].messages[0].role, Role::System);

        let continuation = &requests[1].messages;
        let tool_msg = continuation.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert!(tool_msg.content.contains("1. Forecast"));
        assert!(tool_msg.content.contains("Sunny, 24C"));
        let echoed = &continuation[continuation.len() - 2];
        assert_eq!(echoed.role, Role::Assistant);
        assert!(echoed.content.starts_with("<tool_call>"));
    }

    #[tokio::test]
    async fn test_search_failure_is_injected_not_fatal() {
        let backend = FakeBackend::with(vec![
            Scripted::Body(vec![
                content(r#"<tool_call>{"name":"web_search","query":"news"}</tool_call>"#, false),
                content("", true),
            ]),
            Scripted::Body(vec![content("I couldn't search.", true)]),
        ]);
        let (orch, store) = orchestrator(backend.clone(), FakeSearch::failing());
        orch.toggle_brain();

        let handle = orch.send_message("Latest news?", THINK).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Complete);

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, "I couldn't search.");
        assert!(message.tool_used);

        let requests = backend.requests.lock();
        let tool_msg = requests[1].messages.last().unwrap();
        assert!(tool_msg.content.contains("Search failed"));
    }

    #[tokio::test]
    async fn test_tools_off_never_detects_tool_calls() {
        let text = r#"<tool_call>{"name":"other"}</tool_call>"#;
        let backend = FakeBackend::with(vec![Scripted::Body(vec![content(text, false), content("", true)])]);
        let search = FakeSearch::ok(SearchResults::default());
        let (orch, store) = orchestrator(backend.clone(), search.clone());

        let handle = orch.send_message("Hi", THINK).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Complete);

        assert!(search.queries.lock().is_empty());
        assert_eq!(backend.requests.lock().len(), 1);
        assert_eq!(backend.requests.lock()[0].think, Some(false));
        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, text);
    }

    #[tokio::test]
    async fn test_stop_mid_stream_finalizes_partial_content() {
        let backend = FakeBackend::with(vec![Scripted::Hang(vec![content("partial", false)])]);
        let (orch, store) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));

        let handle = orch.send_message("Tell me a story", FLASH).await.unwrap();
        let message_id = handle.message_id;

        let streaming = orch.streaming_state().watch();
        wait_until(|| {
            streaming
                .borrow()
                .as_ref()
                .is_some_and(|s| s.content == "partial")
        })
        .await;

        orch.stop_generation().await.unwrap();

        // Terminal state is visible as soon as stop returns.
        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert!(!message.is_streaming);
        assert_eq!(message.content, "partial");
        assert!(!orch.ui_state().get().is_generating);
        assert!(orch.streaming_state().get().is_none());

        assert_eq!(handle.wait().await, TurnOutcome::Cancelled);
        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert!(!message.is_streaming);

        // Idempotent.
        orch.stop_generation().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_send_rejected_while_active() {
        let backend = FakeBackend::with(vec![
            Scripted::Hang(vec![]),
            Scripted::Body(vec![content("ok", true)]),
        ]);
        let (orch, store) = orchestrator(backend.clone(), FakeSearch::ok(SearchResults::default()));

        let first = orch.send_message("one", FLASH).await.unwrap();
        wait_until(|| backend.requests.lock().len() == 1).await;
        let err = orch.send_message("two", FLASH).await.unwrap_err();
        assert!(matches!(err, ChatError::TurnInProgress { chat_id } if chat_id == first.chat_id));

        // Only the first turn's rows exist.
        assert_eq!(store.messages_for_chat(first.chat_id).await.unwrap().len(), 2);

        orch.stop_generation().await.unwrap();
        assert_eq!(first.wait().await, TurnOutcome::Cancelled);

        let second = orch.send_message("two", FLASH).await.unwrap();
        assert_eq!(second.wait().await, TurnOutcome::Complete);
    }

    #[tokio::test]
    async fn test_connection_failure_finalizes_with_error() {
        let backend = FakeBackend::with(vec![Scripted::Error(ClientError::Unreachable {
            url: "http://10.0.0.2:11434".into(),
            message: "connection refused".into(),
        })]);
        let (orch, store) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));

        let handle = orch.send_message("Hi", FLASH).await.unwrap();
        let message_id = handle.message_id;
        assert!(matches!(handle.wait().await, TurnOutcome::Failed(_)));

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert!(!message.is_streaming);
        assert!(message.content.starts_with("Error: "));
        assert!(orch.ui_state().get().error.is_some());
    }

    #[tokio::test]
    async fn test_server_error_keeps_partial_content() {
        let backend = FakeBackend::with(vec![Scripted::Body(vec![
            content("Half an ans", false),
            "{\"error\":\"out of memory\"}\n".into(),
        ])]);
        let (orch, store) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));

        let handle = orch.send_message("Hi", FLASH).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Failed("out of memory".into()));

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, "Half an ans");
        assert_eq!(orch.ui_state().get().error.as_deref(), Some("out of memory"));
    }

    #[tokio::test]
    async fn test_delete_chat_cancels_generation() {
        let backend = FakeBackend::with(vec![Scripted::Hang(vec![content("x", false)])]);
        let (orch, store) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));

        let handle = orch.send_message("Hi", FLASH).await.unwrap();
        let chat_id = handle.chat_id;
        orch.delete_chat(chat_id).await.unwrap();

        assert_eq!(handle.wait().await, TurnOutcome::Cancelled);
        assert!(store.get_chat(chat_id).await.unwrap().is_none());
        assert!(store.messages_for_chat(chat_id).await.unwrap().is_empty());
        assert_eq!(orch.session().current_chat.get(), None);
        assert!(!orch.is_generating(chat_id));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let backend = FakeBackend::with(vec![]);
        let (orch, store) = orchestrator(backend.clone(), FakeSearch::ok(SearchResults::default()));
        assert!(matches!(
            orch.send_message("   ", FLASH).await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(store.list_chats().await.unwrap().is_empty());
        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_new_chat_takes_title_from_first_message() {
        let backend = FakeBackend::with(vec![Scripted::Body(vec![content("ok", true)])]);
        let (orch, store) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));

        let chat = orch.create_new_chat().await.unwrap();
        assert_eq!(chat.title, "New Chat");

        let handle = orch.send("How do rainbows form?").await.unwrap();
        assert_eq!(handle.chat_id, chat.id);
        handle.wait().await;

        let chat = store.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(chat.title, "How do rainbows form?");

        orch.rename_chat(chat.id, "Rainbows").await.unwrap();
        assert_eq!(store.get_chat(chat.id).await.unwrap().unwrap().title, "Rainbows");
        assert!(matches!(
            orch.rename_chat(999, "x").await,
            Err(ChatError::ChatNotFound { id: 999 })
        ));
    }

    #[tokio::test]
    async fn test_history_excludes_system_and_replays_prior_turns() {
        let backend = FakeBackend::with(vec![
            Scripted::Body(vec![content("First answer", true)]),
            Scripted::Body(vec![content("Second answer", true)]),
        ]);
        let (orch, _store) = orchestrator(backend.clone(), FakeSearch::ok(SearchResults::default()));

        orch.send_message("one", FLASH).await.unwrap().wait().await;
        orch.send_message("two", FLASH).await.unwrap().wait().await;

        let requests = backend.requests.lock();
        let roles: Vec<Role> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(requests[1].messages[1].content, "First answer");
    }

    #[tokio::test]
    async fn test_refresh_server_connection() {
        let backend = FakeBackend::with(vec![]);
        let (orch, _) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));
        assert_eq!(orch.refresh_server_connection().await, ConnectionStatus::Connected);
        assert_eq!(orch.available_models().get().len(), 1);
        assert_eq!(orch.ui_state().get().connection_status, ConnectionStatus::Connected);

        let down = Arc::new(FakeBackend::default());
        let (orch, _) = orchestrator(down, FakeSearch::ok(SearchResults::default()));
        assert!(matches!(
            orch.refresh_server_connection().await,
            ConnectionStatus::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_setup_reminder_is_local() {
        let backend = FakeBackend::with(vec![]);
        let (orch, store) = orchestrator(backend.clone(), FakeSearch::ok(SearchResults::default()));

        let message = orch.send_setup_reminder().await.unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.contains("http://10.0.0.2:11434"));
        assert!(backend.requests.lock().is_empty());
        assert_eq!(store.messages_for_chat(message.chat_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_toggles_only_change_session() {
        let backend = FakeBackend::with(vec![]);
        let (orch, _) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));
        assert!(orch.toggle_brain());
        assert!(!orch.toggle_brain());
        orch.set_model(THINK);
        assert_eq!(orch.session().selected_model.get(), THINK);
    }

    #[tokio::test]
    async fn test_text_before_tool_call_is_kept_and_separated() {
        let backend = FakeBackend::with(vec![
            Scripted::Body(vec![
                content("Let me check. ", false),
                content(r#"<tool_call>{"name":"web_search","query":"weather"}</tool_call>"#, false),
                content("", true),
            ]),
            Scripted::Body(vec![content("It is sunny.", false), content("", true)]),
        ]);
        let (orch, store) = orchestrator(backend.clone(), FakeSearch::ok(SearchResults::default()));
        orch.toggle_brain();

        let handle = orch.send_message("Weather?", THINK).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Complete);

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, "Let me check.\n\nIt is sunny.");
        assert!(message.tool_used);

        // The continuation replays what the model said before the directive.
        let requests = backend.requests.lock();
        let continuation = &requests[1].messages;
        let echoed = &continuation[continuation.len() - 2];
        assert_eq!(echoed.role, Role::Assistant);
        assert!(echoed.content.starts_with("Let me check.\n\n<tool_call>"));
        assert!(echoed.content.ends_with("</tool_call>"));
    }

    #[tokio::test]
    async fn test_stop_reaches_turn_after_switching_chats() {
        let backend = FakeBackend::with(vec![Scripted::Hang(vec![content("partial", false)])]);
        let (orch, store) = orchestrator(backend, FakeSearch::ok(SearchResults::default()));

        let handle = orch.send_message("Tell me a story", FLASH).await.unwrap();
        let (chat_id, message_id) = (handle.chat_id, handle.message_id);

        let streaming = orch.streaming_state().watch();
        wait_until(|| {
            streaming
                .borrow()
                .as_ref()
                .is_some_and(|s| s.content == "partial")
        })
        .await;

        let other = orch.create_new_chat().await.unwrap();
        assert_ne!(other.id, chat_id);
        assert!(orch.is_generating(chat_id));

        orch.stop_generation().await.unwrap();

        assert!(!orch.is_generating(chat_id));
        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert!(!message.is_streaming);
        assert_eq!(message.content, "partial");
        assert_eq!(handle.wait().await, TurnOutcome::Cancelled);
        assert_eq!(orch.session().current_chat.get(), Some(other.id));
    }

    #[tokio::test]
    async fn test_store_writes_are_coalesced() {
        let mut lines: Vec<String> = (0..200).map(|i| content(&format!("t{i} "), false)).collect();
        lines.push(content("", true));
        let expected: String = (0..200).map(|i| format!("t{i} ")).collect();

        let backend = FakeBackend::with(vec![Scripted::Body(lines)]);
        let store = Arc::new(CountingStore::default());
        let config = OrchestratorConfig {
            flush_interval: Duration::from_secs(60),
            ..OrchestratorConfig::default()
        };
        let orch = ChatOrchestrator::new(
            store.clone(),
            backend,
            FakeSearch::ok(SearchResults::default()),
            FLASH,
            config,
        );

        let handle = orch.send_message("Count", FLASH).await.unwrap();
        let message_id = handle.message_id;
        assert_eq!(handle.wait().await, TurnOutcome::Complete);

        // One write entering the answer, one terminal write.
        assert_eq!(store.updates.load(Ordering::SeqCst), 2);
        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(message.content, expected);
        assert!(!message.is_streaming);
    }

    #[tokio::test]
    async fn test_stop_during_search_skips_continuation() {
        let backend = FakeBackend::with(vec![
            Scripted::Body(vec![
                content(r#"<tool_call>{"name":"web_search","query":"news"}</tool_call>"#, false),
                content("", true),
            ]),
            Scripted::Body(vec![content("never sent", true)]),
        ]);
        let (orch, store) = orchestrator(backend.clone(), Arc::new(StalledSearch));
        orch.toggle_brain();

        let handle = orch.send_message("Latest news?", THINK).await.unwrap();
        let message_id = handle.message_id;

        let streaming = orch.streaming_state().watch();
        wait_until(|| {
            streaming
                .borrow()
                .as_ref()
                .is_some_and(|s| s.is_executing_tool)
        })
        .await;

        orch.stop_generation().await.unwrap();

        let message = store.get_message(message_id).await.unwrap().unwrap();
        assert!(!message.is_streaming);
        assert!(message.tool_used);
        assert_eq!(message.tool_display_name, "Searching the web");

        assert_eq!(handle.wait().await, TurnOutcome::Cancelled);
        assert_eq!(backend.requests.lock().len(), 1);
    }

    #[test]
    fn test_build_request_shapes_fields() {
        let mut placeholder = Message::assistant_placeholder(1);
        placeholder.content = "streaming".into();
        let history = vec![
            Message::new(1, Role::System, "old prompt"),
            Message::user(1, "hi"),
            placeholder,
        ];
        let generation = GenerationOptions {
            temperature: Some(0.2),
            ..GenerationOptions::default()
        };

        let request = build_chat_request(THINK, true, &history, &generation, "SYSTEM");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, "SYSTEM");
        assert_eq!(request.messages[1].content, "hi");
        assert_eq!(request.think, Some(true));
        assert_eq!(request.options.unwrap().temperature, Some(0.2));

        let request =
            build_chat_request(FLASH, true, &history, &GenerationOptions::default(), "");
        assert_eq!(request.think, None);
        assert!(request.options.is_none());
    }
}

use crate::models::ChatId;
use crate::observable::Observable;

/// Per-session selections owned by the orchestrator.
///
/// None of this is persisted. Changes only affect the next turn; a turn in
/// flight keeps the model and tool mode it started with.
#[derive(Debug)]
pub struct SessionContext {
    pub current_chat: Observable<Option<ChatId>>,
    pub selected_model: Observable<String>,
    /// The tools/reasoning ("brain") toggle.
    pub tools_enabled: Observable<bool>,
}

impl SessionContext {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            current_chat: Observable::new(None),
            selected_model: Observable::new(default_model.into()),
            tools_enabled: Observable::new(false),
        }
    }
}

pub mod chat;
pub mod connection;
pub mod model_options;
pub mod streaming_state;

pub use chat::{Chat, ChatId, Message, MessageId, Role, now_millis};
pub use connection::ConnectionStatus;
pub use model_options::{DEFAULT_MODEL_OPTION, MODEL_OPTIONS, ModelOption, supports_reasoning};
pub use streaming_state::{StreamingState, TurnOutcome, TurnPhase};

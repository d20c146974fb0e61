pub mod preferences;
pub mod settings_json_repository;
pub mod settings_repository;

pub use preferences::{AppTheme, GenerationOptions, Preferences};
pub use settings_json_repository::SettingsJsonRepository;
pub use settings_repository::SettingsRepository;

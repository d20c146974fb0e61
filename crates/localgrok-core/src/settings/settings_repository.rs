use crate::repositories::{BoxFuture, RepositoryResult};

use super::preferences::Preferences;

/// Read-mostly store for user preferences.
pub trait SettingsRepository: Send + Sync + 'static {
    /// Load preferences, falling back to defaults when nothing is stored yet.
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Preferences>>;

    /// Persist preferences.
    fn save(&self, preferences: Preferences) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Drop everything stored and return to defaults.
    fn clear(&self) -> BoxFuture<'static, RepositoryResult<()>>;
}

use std::path::PathBuf;

use tracing::debug;

use super::preferences::Preferences;
use super::settings_repository::SettingsRepository;
use crate::repositories::{BoxFuture, RepositoryError, RepositoryResult};

/// Preferences stored as a single JSON file.
pub struct SettingsJsonRepository {
    file_path: PathBuf,
}

impl SettingsJsonRepository {
    /// Repository at `<config dir>/localgrok/settings.json`.
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepositoryError::InitializationError {
            message: "Cannot determine config directory".into(),
        })?;

        Ok(Self::at_path(config_dir.join("localgrok").join("settings.json")))
    }

    pub fn at_path(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl SettingsRepository for SettingsJsonRepository {
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Preferences>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            if !tokio::fs::try_exists(&path).await? {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Preferences::default());
            }

            let contents = tokio::fs::read_to_string(&path).await?;
            let preferences: Preferences = serde_json::from_str(&contents)?;
            Ok(preferences.normalized())
        })
    }

    fn save(&self, preferences: Preferences) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let json = serde_json::to_string_pretty(&preferences.normalized())?;

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Write atomically using temp file + rename
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AppTheme;

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::at_path(tmp.path().join("settings.json"));
        assert_eq!(repo.load().await.unwrap(), Preferences::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::at_path(tmp.path().join("nested").join("settings.json"));

        let prefs = Preferences {
            server_host: " 192.168.1.50 ".into(),
            server_port: 11500,
            search_port: 8888,
            theme: AppTheme::Light,
            ..Preferences::default()
        };
        repo.save(prefs).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.server_host, "192.168.1.50");
        assert_eq!(loaded.server_port, 11500);
        assert_eq!(loaded.search_port, 8888);
        assert_eq!(loaded.theme, AppTheme::Light);
    }

    #[tokio::test]
    async fn test_clear_resets_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::at_path(tmp.path().join("settings.json"));
        repo.save(Preferences {
            server_port: 1,
            ..Preferences::default()
        })
        .await
        .unwrap();

        repo.clear().await.unwrap();
        repo.clear().await.unwrap();
        assert_eq!(repo.load().await.unwrap(), Preferences::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let repo = SettingsJsonRepository::at_path(path);
        assert!(matches!(
            repo.load().await,
            Err(RepositoryError::SerializationError(_))
        ));
    }
}

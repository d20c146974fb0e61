use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_MODEL_OPTION;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 11434;
pub const DEFAULT_SEARCH_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppTheme {
    #[default]
    Dark,
    Light,
    System,
}

/// Optional sampling parameters forwarded to the model server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
}

impl GenerationOptions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.num_predict.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
    }
}

/// User preferences.
///
/// Unknown or missing fields fall back to their defaults so older files keep
/// loading after new settings are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub server_host: String,
    pub server_port: u16,
    /// The search service runs on the same host as the model server.
    pub search_port: u16,
    pub default_model: String,
    pub theme: AppTheme,
    pub generation: GenerationOptions,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            search_port: DEFAULT_SEARCH_PORT,
            default_model: DEFAULT_MODEL_OPTION.model_id.to_string(),
            theme: AppTheme::default(),
            generation: GenerationOptions::default(),
        }
    }
}

impl Preferences {
    /// Trim the host and replace a blank one with the loopback default.
    pub fn normalized(mut self) -> Self {
        let host = self.server_host.trim();
        self.server_host = if host.is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            host.to_string()
        };
        if self.default_model.trim().is_empty() {
            self.default_model = DEFAULT_MODEL_OPTION.model_id.to_string();
        }
        self
    }

    pub fn server_url(&self) -> String {
        base_url(&self.server_host, self.server_port)
    }

    pub fn search_url(&self) -> String {
        base_url(&self.server_host, self.search_port)
    }
}

/// `http://host:port`, unless `host` already carries a scheme.
pub fn base_url(host: &str, port: u16) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

//! Wire types for the Ollama chat and tags endpoints.

use serde::{Deserialize, Serialize};

use crate::models::Role;
use crate::settings::GenerationOptions;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,
}

/// One entry of the request history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
        }
    }
}

/// One NDJSON line of a streaming chat response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Set when the server aborts generation, e.g. unknown model.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

/// Response of `GET /api/tags`.
#[derive(Debug, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagsModel {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub details: Option<TagsModelDetails>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TagsModelDetails {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub quantization_level: Option<String>,
}

/// A model installed on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerModel {
    pub name: String,
    pub model: String,
    pub size: Option<u64>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

impl From<TagsModel> for ServerModel {
    fn from(m: TagsModel) -> Self {
        let details = m.details.unwrap_or_default();
        Self {
            model: m.model.unwrap_or_else(|| m.name.clone()),
            name: m.name,
            size: m.size,
            family: details.family,
            parameter_size: details.parameter_size,
            quantization_level: details.quantization_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_unset_fields() {
        let req = ChatRequest {
            model: "gemma3:1b-it-qat".into(),
            messages: vec![WireMessage::new(Role::User, "Hi")],
            stream: true,
            think: None,
            options: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("think").is_none());
        assert!(json.get("options").is_none());
        assert!(json["messages"][0].get("thinking").is_none());
    }

    #[test]
    fn test_chunk_tolerates_missing_fields() {
        let chunk: ChatChunk = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(chunk.done);
        assert!(chunk.message.is_none());

        let chunk: ChatChunk = serde_json::from_str(
            r#"{"model":"qwen3:1.7b","message":{"role":"assistant","content":"","thinking":"hm"},"done":false,"eval_count":3}"#,
        )
        .unwrap();
        let msg = chunk.message.unwrap();
        assert_eq!(msg.thinking.as_deref(), Some("hm"));
        assert_eq!(msg.content.as_deref(), Some(""));
    }

    #[test]
    fn test_tags_model_conversion() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"qwen3:1.7b","size":1400000000,"details":{"family":"qwen3","parameter_size":"2.0B","quantization_level":"Q4_K_M"}}]}"#,
        )
        .unwrap();
        let model: ServerModel = tags.models.into_iter().next().unwrap().into();
        assert_eq!(model.model, "qwen3:1.7b");
        assert_eq!(model.parameter_size.as_deref(), Some("2.0B"));
        assert_eq!(model.quantization_level.as_deref(), Some("Q4_K_M"));
    }
}

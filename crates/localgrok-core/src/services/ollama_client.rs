use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tracing::debug;

use super::ollama_types::{ChatRequest, ServerModel, TagsResponse};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Cannot reach {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Raw response body chunks, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// The model server as the orchestrator sees it.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streaming chat completion. Resolves once response headers
    /// arrive; dropping the returned stream closes the connection.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream, ClientError>;

    async fn list_models(&self) -> Result<Vec<ServerModel>, ClientError>;

    /// Liveness probe; any 2xx is healthy.
    async fn health_check(&self) -> Result<(), ClientError>;

    fn base_url(&self) -> &str;
}

/// HTTP client for an Ollama-compatible server.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| ClientError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, e: reqwest::Error) -> ClientError {
        ClientError::Unreachable {
            url: self.base_url.clone(),
            message: e.to_string(),
        }
    }
}

/// Turn a non-2xx response into `ClientError::Status`, preferring the
/// server's `{"error": "..."}` message over the raw body.
pub(crate) async fn status_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    ClientError::Status { status, body }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
        debug!(model = %request.model, messages = request.messages.len(), think = ?request.think, "Starting chat stream");

        let response = self
            .http
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::Stream(e.to_string())))
            .boxed())
    }

    async fn list_models(&self) -> Result<Vec<ServerModel>, ClientError> {
        let response = self
            .http
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(tags.models.into_iter().map(ServerModel::from).collect())
    }

    async fn health_check(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .get(self.url("/"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::WireMessage;

    fn client(url: &str) -> OllamaClient {
        OllamaClient::new(url, Duration::from_secs(2), Duration::from_secs(2)).unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "qwen3:1.7b".into(),
            messages: vec![WireMessage::new(Role::User, "Hi")],
            stream: true,
            think: Some(true),
            options: None,
        }
    }

    #[tokio::test]
    async fn test_stream_chat_yields_body_bytes() {
        let mut server = mockito::Server::new_async().await;
        let body = "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"content\":\"lo\"},\"done\":true}\n";
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"qwen3:1.7b","stream":true,"think":true}"#.into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(body)
            .create_async()
            .await;

        let mut stream = client(&server.url()).stream_chat(&request()).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(String::from_utf8(collected).unwrap(), body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_carries_server_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error":"model 'qwen3:1.7b' not found"}"#)
            .create_async()
            .await;

        let err = client(&server.url()).stream_chat(&request()).await.err().unwrap();
        assert_eq!(
            err,
            ClientError::Status {
                status: 404,
                body: "model 'qwen3:1.7b' not found".into()
            }
        );
    }

    #[tokio::test]
    async fn test_list_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(
                r#"{"models":[{"name":"gemma3:1b-it-qat","model":"gemma3:1b-it-qat","size":1000,"details":{"parameter_size":"1B","quantization_level":"Q4_0"}}]}"#,
            )
            .create_async()
            .await;

        let models = client(&server.url()).list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "gemma3:1b-it-qat");
        assert_eq!(models[0].parameter_size.as_deref(), Some("1B"));
    }

    #[tokio::test]
    async fn test_health_check() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("Ollama is running")
            .create_async()
            .await;

        assert!(client(&server.url()).health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Port 9 (discard) is essentially never served locally.
        let err = client("http://127.0.0.1:9").health_check().await.unwrap_err();
        assert!(matches!(err, ClientError::Unreachable { .. }));
    }
}

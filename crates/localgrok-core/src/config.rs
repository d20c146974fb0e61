use std::time::Duration;

/// Tunables for the chat orchestrator and the HTTP clients it builds.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum spacing between coalesced store writes while a turn streams.
    pub flush_interval: Duration,
    /// Search hits injected into the continuation request.
    pub max_search_results: usize,
    /// Per-snippet character cap for injected search hits.
    pub max_snippet_chars: usize,
    pub server_connect_timeout: Duration,
    pub server_read_timeout: Duration,
    pub search_connect_timeout: Duration,
    pub search_read_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(250),
            max_search_results: 5,
            max_snippet_chars: 500,
            server_connect_timeout: Duration::from_secs(30),
            server_read_timeout: Duration::from_secs(120),
            search_connect_timeout: Duration::from_secs(15),
            search_read_timeout: Duration::from_secs(30),
        }
    }
}

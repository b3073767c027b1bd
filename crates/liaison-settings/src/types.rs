//! Settings type definitions.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiaisonSettings {
    /// Language-capability provider settings.
    pub provider: ProviderSettings,
    /// Workflow engine settings.
    pub workflow: WorkflowSettings,
    /// Event stream distribution settings.
    pub stream: StreamSettings,
    /// Persistence settings.
    pub storage: StorageSettings,
}

/// Provider backend selection and HTTP behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Model hint used when the request says `auto` or nothing.
    pub default_model: String,
    /// Base URL for the `openai` hint (OpenAI-compatible chat completions).
    pub openai_base_url: String,
    /// Chat model sent to the `openai` backend.
    pub openai_model: String,
    /// Base URL for the `qwen-max` hint (DashScope compatible endpoint).
    pub qwen_base_url: String,
    /// Chat model sent to the `qwen-max` backend.
    pub qwen_model: String,
    /// Env var holding the API key (read at request time, never stored).
    pub api_key_env: String,
    /// Per-call timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            default_model: "qwen-max".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            openai_model: "gpt-4o-mini".into(),
            qwen_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            qwen_model: "qwen-max".into(),
            api_key_env: "LIAISON_API_KEY".into(),
            request_timeout_ms: 60_000,
        }
    }
}

/// Stage sequencer retry policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    /// Maximum attempts per stage (first try included).
    pub max_stage_attempts: u32,
    /// Base backoff delay between retries, in milliseconds (doubles per
    /// retry; a provider-supplied retry-after wins when larger).
    pub retry_base_delay_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_stage_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// Stream multiplexer bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Maximum events retained per session for late-subscriber replay.
    pub backlog_capacity: usize,
    /// Per-subscriber outbound buffer; a subscriber whose buffer fills is
    /// disconnected rather than throttling the producer.
    pub subscriber_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            backlog_capacity: 1024,
            subscriber_buffer: 256,
        }
    }
}

/// SQLite paths for the checkpoint and history stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Checkpoint database path.
    pub checkpoint_db_path: String,
    /// History database path.
    pub history_db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            checkpoint_db_path: "~/.liaison/checkpoints.db".into(),
            history_db_path: "~/.liaison/history.db".into(),
        }
    }
}

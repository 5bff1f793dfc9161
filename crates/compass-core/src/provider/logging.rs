//! Model request/response logging
//!
//! Set the `COMPASS_LLM_LOG_FILE` environment variable to append one JSON
//! line per model interaction to that file.
//!
//! Example: `COMPASS_LLM_LOG_FILE=/tmp/llm.log compass-server`

use serde_json::json;
use std::io::Write;
use tracing::{debug, warn};

use super::ModelReply;
use crate::message::Message;
use crate::registry::ToolSpec;

pub const LOG_FILE_ENV: &str = "COMPASS_LLM_LOG_FILE";

/// What to include in a log entry
#[derive(Default)]
pub struct LogConfig<'a> {
    pub model: &'a str,
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub reply: Option<&'a ModelReply>,
    pub error: Option<&'a str>,
}

fn reply_to_json(reply: &ModelReply) -> serde_json::Value {
    match reply {
        ModelReply::Text(text) => json!({"type": "message", "content": text}),
        ModelReply::ToolCalls { content, calls } => json!({
            "type": "tool_calls",
            "content": content,
            "tool_calls": calls,
        }),
    }
}

fn build_entry(config: &LogConfig<'_>) -> serde_json::Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "model": config.model,
        "request": {
            "system_prompt": config.system_prompt,
            "messages": config.messages,
            "message_count": config.messages.len(),
            "tools": config.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        },
        "response": config.reply.map(reply_to_json),
        "error": config.error,
    })
}

/// Log a model interaction if `COMPASS_LLM_LOG_FILE` is set
pub fn log_model_interaction(config: LogConfig<'_>) {
    let Ok(log_file) = std::env::var(LOG_FILE_ENV) else {
        return;
    };

    let entry = build_entry(&config);
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(mut file) => {
            let line = serde_json::to_string(&entry).unwrap_or_default();
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write to LLM log file: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to open LLM log file {}: {}", log_file, e);
        }
    }

    debug!("Logged model interaction to {}", log_file);
}

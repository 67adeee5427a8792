//! Command service envelope.
//!
//! Every incoming command is a tagged union: the `@type` URL of the
//! `command` field names the handler by its last path segment
//! (e.g. `type.googleapis.com/cormorant.CreateTableCommand` routes to
//! `CreateTableCommand`). Responses carry an optional typed payload plus
//! the log messages collected while handling the request.

use serde::{Deserialize, Serialize};

/// A command payload wrapped with its type URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAny {
    /// Type URL; only the last `/`- or `.`-separated segment is used for routing.
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Command fields, deserialized by the matched handler.
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl CommandAny {
    pub fn new(type_url: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            type_url: type_url.into(),
            payload,
        }
    }

    /// Handler name: the last path segment of the type URL.
    pub fn command_name(&self) -> &str {
        self.type_url
            .rsplit(['/', '.'])
            .next()
            .unwrap_or(self.type_url.as_str())
    }
}

/// Backend credentials: `host` carries the project id, `principal` the API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub principal: String,
}

impl Credentials {
    pub fn project_id(&self) -> &str {
        &self.host
    }

    pub fn api_key(&self) -> &str {
        &self.principal
    }
}

/// Caller-supplied runtime options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Request envelope accepted by the command service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRequest {
    pub command: CommandAny,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_options: Option<RuntimeOptions>,
}

/// Response envelope: optional typed payload plus collected log messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_response: Option<serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<LogMessage>,
}

/// Severity of a collected per-request log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Informational,
    Warning,
    Error,
    Debug,
}

/// Log message returned alongside a command response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

impl LogMessage {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_from_type_url() {
        let cmd = CommandAny::new(
            "type.googleapis.com/cormorant.CreateTableCommand",
            serde_json::json!({}),
        );
        assert_eq!(cmd.command_name(), "CreateTableCommand");

        let bare = CommandAny::new("DropProjectCommand", serde_json::json!({}));
        assert_eq!(bare.command_name(), "DropProjectCommand");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let req = DriverRequest {
            command: CommandAny::new(
                "cormorant.PreviewTableCommand",
                serde_json::json!({"project_id": "p1", "bucket": "b", "table": "t"}),
            ),
            credentials: Some(Credentials {
                host: "p1".into(),
                principal: "proj_p1_admin_deadbeef".into(),
            }),
            runtime_options: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("@type"));
        let parsed: DriverRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.command.command_name(), "PreviewTableCommand");
        assert_eq!(parsed.command.payload["bucket"], "b");
        assert_eq!(parsed.credentials.unwrap().project_id(), "p1");
    }
}

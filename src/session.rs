use crate::{PostforgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::info;

const MAX_SESSION_BYTES: u64 = 10 * 1024 * 1024;

/// State recorded by a previous co-founder session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub startup_idea: String,
    pub current_phase: String,
    #[serde(default)]
    pub market_phase_complete: bool,
    #[serde(default)]
    pub conversation_history: Vec<Value>,
    #[serde(default)]
    pub key_market_insights: Vec<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Accepts `[{"state": {...}}, ...]`, `{"state": {...}}`, or the bare state object.
pub fn parse_session(raw: &str) -> Result<SessionState> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|e| PostforgeError::InputMalformed(format!("invalid JSON: {e}")))?;

    let state = match document {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(PostforgeError::InputMalformed(
                    "session array is empty".to_string(),
                ));
            }
            match items.swap_remove(0) {
                Value::Object(mut first) => first.remove("state").unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
        Value::Object(mut map) => match map.remove("state") {
            Some(state) => state,
            None => Value::Object(map),
        },
        _ => Value::Null,
    };

    let Value::Object(state) = state else {
        return Err(PostforgeError::InputMalformed(
            "expected a `state` object".to_string(),
        ));
    };

    let missing: Vec<&str> = ["startup_idea", "current_phase"]
        .into_iter()
        .filter(|field| {
            !state
                .get(*field)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        })
        .collect();
    if !missing.is_empty() {
        return Err(PostforgeError::InputMalformed(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    serde_json::from_value(Value::Object(state))
        .map_err(|e| PostforgeError::InputMalformed(format!("invalid session state: {e}")))
}

pub async fn load_session(path: &Path) -> Result<SessionState> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PostforgeError::InputNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(PostforgeError::io(path, e)),
    };

    if metadata.len() == 0 {
        return Err(PostforgeError::InputMalformed(format!(
            "session file is empty: {}",
            path.display()
        )));
    }
    if metadata.len() > MAX_SESSION_BYTES {
        return Err(PostforgeError::InputMalformed(format!(
            "session file too large ({} bytes): {}",
            metadata.len(),
            path.display()
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PostforgeError::io(path, e))?;
    let raw = String::from_utf8(bytes)
        .map_err(|e| PostforgeError::InputMalformed(format!("session file is not UTF-8: {e}")))?;

    let session = parse_session(&raw)?;
    info!(
        path = %path.display(),
        bytes = metadata.len(),
        startup = %session.startup_idea,
        phase = %session.current_phase,
        "session loaded"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn parses_array_of_sessions() {
        let raw = json!([
            {"state": {
                "startup_idea": "AI bookkeeping for bakeries",
                "current_phase": "market",
                "market_phase_complete": true,
                "conversation_history": [{"role": "user"}, {"role": "assistant"}],
                "founder": "Sam"
            }},
            {"state": {"startup_idea": "ignored", "current_phase": "ignored"}}
        ])
        .to_string();

        let session = parse_session(&raw).unwrap();
        assert_eq!(session.startup_idea, "AI bookkeeping for bakeries");
        assert!(session.market_phase_complete);
        assert_eq!(session.conversation_history.len(), 2);
        assert!(session.key_market_insights.is_empty());
        assert_eq!(session.extra["founder"], "Sam");
    }

    #[test]
    fn parses_wrapped_and_bare_state() {
        let wrapped = json!({"state": {"startup_idea": "a", "current_phase": "b"}}).to_string();
        let bare = json!({"startup_idea": "a", "current_phase": "b"}).to_string();
        assert_eq!(parse_session(&wrapped).unwrap(), parse_session(&bare).unwrap());
    }

    #[test]
    fn rejects_missing_or_blank_fields() {
        let raw = json!({"state": {"startup_idea": "  ", "other": 1}}).to_string();
        match parse_session(&raw) {
            Err(PostforgeError::InputMalformed(msg)) => {
                assert!(msg.contains("startup_idea"));
                assert!(msg.contains("current_phase"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unexpected_shapes() {
        for raw in ["[]", "42", "[1, 2]", "{\"state\": []}", "not json"] {
            assert!(
                matches!(parse_session(raw), Err(PostforgeError::InputMalformed(_))),
                "{raw}"
            );
        }
    }

    #[tokio::test]
    async fn missing_file_is_input_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_session(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, PostforgeError::InputNotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_and_non_utf8_files_are_malformed() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, b"").unwrap();
        let binary = dir.path().join("binary.json");
        std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();

        assert!(matches!(
            load_session(&empty).await,
            Err(PostforgeError::InputMalformed(_))
        ));
        assert!(matches!(
            load_session(&binary).await,
            Err(PostforgeError::InputMalformed(_))
        ));
    }
}

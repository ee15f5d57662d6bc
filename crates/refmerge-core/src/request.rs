use refmerge_engine::{
    ApplyRequest, CancellationFlag, Language, MergeEngine, MergeError, VerifyReason,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// One proposed update, as read from a batch directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(default = "generate_request_id")]
    pub request_id: String,
    /// Path of the file being edited; selects the language when `language`
    /// is not set.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
    pub original: String,
    pub proposed: String,
    #[serde(default)]
    pub description: String,
    /// Overrides the configured edge-reference setting.
    #[serde(default)]
    pub synthesize_edge_refs: Option<bool>,
    #[serde(default = "now_millis")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub request_id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
    pub new_file: String,
    pub proposed: String,
    pub needs_verify_reasons: Vec<VerifyReason>,
    /// Set when the merge was aborted; the other fields are then empty.
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: u64,
}

impl MergeRequest {
    pub fn new(original: impl Into<String>, proposed: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            request_id: generate_request_id(),
            path: None,
            language: None,
            original: original.into(),
            proposed: proposed.into(),
            description: description.into(),
            synthesize_edge_refs: None,
            timestamp: now_millis(),
        }
    }

    pub fn resolved_language(&self) -> Option<Language> {
        self.language
            .or_else(|| self.path.as_deref().and_then(|p| Language::from_path(Path::new(p))))
    }
}

impl MergeResponse {
    pub fn needs_verification(&self) -> bool {
        !self.needs_verify_reasons.is_empty()
    }
}

/// Run one request through `engine`. A cancelled merge yields a response
/// carrying the error instead of a merged file.
pub fn process_request(
    engine: &MergeEngine,
    request: &MergeRequest,
    synthesize_edge_refs: bool,
    cancel: &CancellationFlag,
) -> MergeResponse {
    let started = Instant::now();
    let language = request.resolved_language();

    let mut apply = ApplyRequest::new(&request.original, &request.proposed, &request.description)
        .with_edge_refs(request.synthesize_edge_refs.unwrap_or(synthesize_edge_refs));
    if let Some(language) = language {
        apply = apply.with_language(language);
    }

    let mut response = MergeResponse {
        request_id: request.request_id.clone(),
        path: request.path.clone(),
        language,
        new_file: String::new(),
        proposed: String::new(),
        needs_verify_reasons: Vec::new(),
        error: None,
        duration_ms: 0,
        timestamp: 0,
    };

    match engine.apply_changes(&apply, cancel) {
        Ok(result) => {
            response.new_file = result.new_file;
            response.proposed = result.proposed;
            response.needs_verify_reasons = result.reasons;
        }
        Err(e @ MergeError::Cancelled) => {
            tracing::info!(request_id = %request.request_id, "merge cancelled");
            response.error = Some(e.to_string());
        }
    }

    response.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    response.timestamp = now_millis();
    response
}

/// Generate a unique request ID: `timestamp_random`.
pub fn generate_request_id() -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let rand: String = uuid::Uuid::new_v4().to_string()[..7].to_string();
    format!("{}_{}", ts, rand)
}

/// Current time in milliseconds since epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_minimal_json() {
        let request: MergeRequest = serde_json::from_str(
            r#"{"original": "a\n", "proposed": "a\nb\n", "path": "src/lib.rs"}"#,
        )
        .unwrap();
        assert!(!request.request_id.is_empty());
        assert_eq!(request.description, "");
        assert_eq!(request.resolved_language(), Some(Language::Rust));
        assert!(request.timestamp > 0);
    }

    #[test]
    fn test_explicit_language_wins_over_path() {
        let mut request = MergeRequest::new("", "", "");
        request.path = Some("main.go".into());
        request.language = Some(Language::Python);
        assert_eq!(request.resolved_language(), Some(Language::Python));
    }

    #[test]
    fn test_process_request_merges() {
        let request = MergeRequest::new(
            "func F() {\n  a()\n  return\n}\n",
            "func F() {\n  // ... existing code ...\n  log()\n  return\n}\n",
            "type: add",
        );
        let response = process_request(&MergeEngine::default(), &request, true, &CancellationFlag::new());
        assert_eq!(response.request_id, request.request_id);
        assert_eq!(response.new_file, "func F() {\n  a()\n  log()\n  return\n}\n");
        assert!(!response.needs_verification());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let request = MergeRequest::new("x\n", "x\nx2\n", "type: add");
        let response = process_request(&MergeEngine::default(), &request, true, &CancellationFlag::new());
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("newFile").is_some());
        assert!(json.get("needsVerifyReasons").is_some());
        assert!(json.get("requestId").is_some());
    }

    #[test]
    fn test_cancelled_request_reports_error() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let request = MergeRequest::new("a\n", "a\n", "");
        let response = process_request(&MergeEngine::default(), &request, true, &cancel);
        assert_eq!(response.error.as_deref(), Some("merge cancelled"));
        assert!(response.new_file.is_empty());
    }

    #[test]
    fn test_generate_request_id_format() {
        let id = generate_request_id();
        let (ts, rand) = id.split_once('_').unwrap();
        assert!(ts.parse::<i64>().is_ok());
        assert_eq!(rand.len(), 7);
    }
}

// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Event mapper.
//
// Parses each frame's payload as JSON and classifies it into one of a
// fixed set of wire event kinds. Every field-name variant the backend
// is known to emit (`reasoning` vs `reasoning_text`, `code` vs
// `error_type`, `request_id` vs `requestId`) is normalized HERE, once,
// so downstream consumers see a single canonical shape.
//
// The mapper never panics and never errors out of a stream: a payload
// that fails to parse becomes a synthetic `error` event with code
// "parse", and unknown event names map to `None` so new backend event
// kinds cannot crash older clients.

use serde::Deserialize;
use serde_json::Value;

use super::decoder::Frame;

// ---------------------------------------------------------------------------
// Wire events
// ---------------------------------------------------------------------------

/// One typed event decoded off the wire. Immutable after decode.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Token(TokenEvent),
    Reasoning(ReasoningEvent),
    Commentary(CommentaryEvent),
    Usage(UsageSnapshot),
    Warning(Warning),
    Error(ErrorEvent),
    End(EndEvent),
    Final(FinalEvent),
}

impl WireEvent {
    /// The request id carried by this event, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            WireEvent::Token(e) => Some(&e.request_id),
            WireEvent::Reasoning(e) => Some(&e.request_id),
            WireEvent::Commentary(e) => Some(&e.request_id),
            WireEvent::Usage(e) => Some(&e.request_id),
            WireEvent::Final(e) => Some(&e.request_id),
            WireEvent::Warning(_) | WireEvent::Error(_) | WireEvent::End(_) => None,
        }
    }

    /// Whether this event terminates the request it belongs to.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WireEvent::End(_))
    }
}

/// An incremental fragment of generated text. The only event kind that
/// carries running content.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenEvent {
    pub seq: u64,
    pub text: String,
    pub tokens_out: u64,
    pub request_id: String,
    pub model_id: String,
}

/// Side-channel "thinking" text, distinct from the user-facing answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningEvent {
    pub request_id: String,
    pub model_id: String,
    pub reasoning: String,
}

/// Side-channel record of an internal tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentaryEvent {
    pub request_id: String,
    pub model_id: String,
    pub text: String,
    /// Pre-decoded trace object, when the backend sent one.
    pub parsed: Option<Value>,
}

impl CommentaryEvent {
    /// Decode this commentary into a tool trace entry, if its payload
    /// carries one. The backend double-encodes: `text` is itself a
    /// JSON object with a `tool` field.
    pub fn tool_trace(&self) -> Option<ToolTraceEntry> {
        let parsed = match &self.parsed {
            Some(v) => v.clone(),
            None => serde_json::from_str(&self.text).ok()?,
        };
        let obj = parsed.as_object()?;
        let tool = obj.get("tool")?.as_str()?.to_string();
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let ok = obj
            .get("ok")
            .and_then(Value::as_bool)
            .unwrap_or(status == "ok");
        let text_field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        Some(ToolTraceEntry {
            message: text_field("message").or_else(|| text_field("error_type")),
            preview_hash: text_field("preview_hash"),
            args_redacted: text_field("args_redacted"),
            raw_args: text_field("raw_args"),
            error_type: text_field("error_type"),
            tool,
            status,
            ok,
        })
    }
}

/// One entry in the ordered tool trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolTraceEntry {
    pub tool: String,
    pub status: String,
    pub ok: bool,
    pub message: Option<String>,
    pub preview_hash: Option<String>,
    pub args_redacted: Option<String>,
    pub raw_args: Option<String>,
    pub error_type: Option<String>,
}

/// A GPU layer value as reported by the backend: an integer count or a
/// textual marker like "auto".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GpuValue {
    Count(i64),
    Text(String),
}

/// Metrics snapshot for the request so far. Absent optional fields are
/// left unset, never defaulted to zero, so consumers can distinguish
/// "unknown" from "zero".
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsageSnapshot {
    pub request_id: String,
    pub model_id: String,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: f64,
    pub decode_tps: f64,
    #[serde(default)]
    pub context_used_tokens: Option<u64>,
    #[serde(default)]
    pub context_total_tokens: Option<u64>,
    #[serde(default)]
    pub reasoning_tokens: Option<u64>,
    #[serde(default)]
    pub final_tokens: Option<u64>,
    #[serde(default)]
    pub reasoning_ratio: Option<f64>,
    #[serde(default)]
    pub first_token_latency_ms: Option<f64>,
    #[serde(default)]
    pub effective_max_tokens: Option<u64>,
    #[serde(default)]
    pub cap_applied: Option<bool>,
    #[serde(default)]
    pub n_gpu_layers: Option<GpuValue>,
    #[serde(default)]
    pub requested_n_gpu_layers: Option<GpuValue>,
    #[serde(default)]
    pub gpu_fallback: Option<bool>,
    #[serde(default)]
    pub gpu_offload: Option<bool>,
}

/// A backend advisory not tied to request failure.
///
/// The two known sub-kinds are parsed; anything else passes through
/// opaquely so new warning kinds survive older clients.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// The model passport disagrees with the loaded configuration.
    PassportMismatch {
        field: String,
        passport_value: Value,
        config_value: Value,
    },
    /// The backend fell back from the requested GPU layout.
    GpuFallback {
        requested: Option<Value>,
        effective: Option<Value>,
    },
    /// Unrecognized warning, kept verbatim.
    Other(Value),
}

impl Warning {
    fn from_value(value: Value) -> Self {
        match value.get("event").and_then(Value::as_str) {
            Some("ModelPassportMismatch") => Warning::PassportMismatch {
                field: value
                    .get("field")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                passport_value: value.get("passport_value").cloned().unwrap_or(Value::Null),
                config_value: value.get("config_value").cloned().unwrap_or(Value::Null),
            },
            Some("GpuFallback") => Warning::GpuFallback {
                requested: value.get("requested").cloned(),
                effective: value.get("effective").cloned(),
            },
            _ => Warning::Other(value),
        }
    }
}

/// A failure reported on the stream. `code` follows the error
/// taxonomy: "parse", "http", "transport", or a backend error type.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the session can continue past this error. Only one
    /// malformed frame is recoverable; everything else is terminal.
    pub fn is_recoverable(&self) -> bool {
        self.code == "parse"
    }
}

/// Stream terminator. `status` is "ok", "error", or "cancelled".
#[derive(Debug, Clone, PartialEq)]
pub struct EndEvent {
    pub status: String,
}

/// The backend's authoritative full text, superseding accumulated
/// tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalEvent {
    pub request_id: String,
    pub model_id: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Extract a request id from a payload under either known spelling.
pub(crate) fn extract_request_id(value: &Value) -> Option<&str> {
    value
        .get("request_id")
        .or_else(|| value.get("requestId"))
        .and_then(Value::as_str)
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Map one decoded frame to a typed wire event.
///
/// Returns `None` for unknown or absent event names. A payload that
/// fails to parse yields a synthetic `error` event with code "parse".
pub fn map_frame(frame: &Frame) -> Option<WireEvent> {
    let name = frame.event.as_deref()?;
    let value: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(err) => {
            return Some(WireEvent::Error(ErrorEvent::new("parse", err.to_string())));
        }
    };

    match name {
        "token" => match serde_json::from_value::<TokenEvent>(value) {
            Ok(ev) => Some(WireEvent::Token(ev)),
            Err(err) => Some(WireEvent::Error(ErrorEvent::new("parse", err.to_string()))),
        },
        "reasoning" => {
            let reasoning = value
                .get("reasoning")
                .or_else(|| value.get("reasoning_text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(WireEvent::Reasoning(ReasoningEvent {
                request_id: extract_request_id(&value).unwrap_or_default().to_string(),
                model_id: str_field(&value, "model_id"),
                reasoning,
            }))
        }
        "commentary" => Some(WireEvent::Commentary(CommentaryEvent {
            request_id: extract_request_id(&value).unwrap_or_default().to_string(),
            model_id: str_field(&value, "model_id"),
            text: str_field(&value, "text"),
            parsed: value.get("parsed").cloned(),
        })),
        "usage" => match serde_json::from_value::<UsageSnapshot>(value) {
            Ok(ev) => Some(WireEvent::Usage(ev)),
            Err(err) => Some(WireEvent::Error(ErrorEvent::new("parse", err.to_string()))),
        },
        "warning" => Some(WireEvent::Warning(Warning::from_value(value))),
        "error" => {
            let code = value
                .get("code")
                .or_else(|| value.get("error_type"))
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            Some(WireEvent::Error(ErrorEvent {
                code,
                message: str_field(&value, "message"),
            }))
        }
        "end" => Some(WireEvent::End(EndEvent {
            status: str_field(&value, "status"),
        })),
        "final" => Some(WireEvent::Final(FinalEvent {
            request_id: extract_request_id(&value).unwrap_or_default().to_string(),
            model_id: str_field(&value, "model_id"),
            text: str_field(&value, "text"),
        })),
        // Forward-compatible: unknown event kinds are ignored.
        _ => None,
    }
}

/// Pull a request id out of a raw frame without fully mapping it.
///
/// Used by the session to latch the id from the first id-carrying
/// frame of any kind, including kinds the mapper ignores.
pub(crate) fn frame_request_id(frame: &Frame) -> Option<String> {
    let value: Value = serde_json::from_str(&frame.data).ok()?;
    extract_request_id(&value).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> Frame {
        Frame {
            event: Some(event.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn token_passes_fields_through() {
        let ev = map_frame(&frame(
            "token",
            r#"{"seq":3,"text":"Hi","tokens_out":4,"request_id":"r1","model_id":"m1"}"#,
        ));
        match ev {
            Some(WireEvent::Token(t)) => {
                assert_eq!(t.seq, 3);
                assert_eq!(t.text, "Hi");
                assert_eq!(t.tokens_out, 4);
                assert_eq!(t.request_id, "r1");
                assert_eq!(t.model_id, "m1");
            }
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[test]
    fn reasoning_field_name_normalized() {
        let preferred = map_frame(&frame(
            "reasoning",
            r#"{"request_id":"r1","model_id":"m1","reasoning":"think"}"#,
        ));
        let fallback = map_frame(&frame(
            "reasoning",
            r#"{"request_id":"r1","model_id":"m1","reasoning_text":"think"}"#,
        ));
        for ev in [preferred, fallback] {
            match ev {
                Some(WireEvent::Reasoning(r)) => assert_eq!(r.reasoning, "think"),
                other => panic!("expected reasoning, got {other:?}"),
            }
        }
    }

    #[test]
    fn reasoning_prefers_canonical_field() {
        let ev = map_frame(&frame(
            "reasoning",
            r#"{"request_id":"r1","model_id":"m1","reasoning":"a","reasoning_text":"b"}"#,
        ));
        match ev {
            Some(WireEvent::Reasoning(r)) => assert_eq!(r.reasoning, "a"),
            other => panic!("expected reasoning, got {other:?}"),
        }
    }

    #[test]
    fn parse_failure_becomes_parse_error_event() {
        let ev = map_frame(&frame("token", "not json {{{"));
        match ev {
            Some(WireEvent::Error(e)) => {
                assert_eq!(e.code, "parse");
                assert!(e.is_recoverable());
                assert!(!e.message.is_empty());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_names_ignored() {
        assert!(map_frame(&frame("analysis", r#"{"text":"x"}"#)).is_none());
        assert!(map_frame(&frame("ping", "{}")).is_none());
        assert!(map_frame(&Frame {
            event: None,
            data: "{}".to_string()
        })
        .is_none());
    }

    #[test]
    fn error_code_fallback_chain() {
        let explicit = map_frame(&frame("error", r#"{"code":"oom","message":"m"}"#));
        let typed = map_frame(&frame("error", r#"{"error_type":"timeout","message":"m"}"#));
        let bare = map_frame(&frame("error", r#"{"message":"m"}"#));
        let codes: Vec<String> = [explicit, typed, bare]
            .into_iter()
            .map(|ev| match ev {
                Some(WireEvent::Error(e)) => e.code,
                other => panic!("expected error, got {other:?}"),
            })
            .collect();
        assert_eq!(codes, vec!["oom", "timeout", "error"]);
    }

    #[test]
    fn backend_errors_are_not_recoverable() {
        let ev = map_frame(&frame("error", r#"{"error_type":"oom","message":"m"}"#));
        match ev {
            Some(WireEvent::Error(e)) => assert!(!e.is_recoverable()),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn usage_optional_fields_stay_unset() {
        let ev = map_frame(&frame(
            "usage",
            r#"{"request_id":"r1","model_id":"m1","prompt_tokens":10,
               "output_tokens":20,"latency_ms":150,"decode_tps":42.5}"#,
        ));
        match ev {
            Some(WireEvent::Usage(u)) => {
                assert_eq!(u.prompt_tokens, 10);
                assert_eq!(u.output_tokens, 20);
                assert_eq!(u.decode_tps, 42.5);
                // "unknown" is distinguishable from "zero".
                assert!(u.context_used_tokens.is_none());
                assert!(u.reasoning_ratio.is_none());
                assert!(u.effective_max_tokens.is_none());
                assert!(u.cap_applied.is_none());
                assert!(u.first_token_latency_ms.is_none());
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn usage_gpu_values_accept_number_or_text() {
        let ev = map_frame(&frame(
            "usage",
            r#"{"request_id":"r1","model_id":"m1","prompt_tokens":1,
               "output_tokens":1,"latency_ms":1,"decode_tps":1.0,
               "n_gpu_layers":32,"requested_n_gpu_layers":"auto"}"#,
        ));
        match ev {
            Some(WireEvent::Usage(u)) => {
                assert_eq!(u.n_gpu_layers, Some(GpuValue::Count(32)));
                assert_eq!(
                    u.requested_n_gpu_layers,
                    Some(GpuValue::Text("auto".to_string()))
                );
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn warning_known_kinds_parsed() {
        let ev = map_frame(&frame(
            "warning",
            r#"{"event":"ModelPassportMismatch","field":"context_length",
               "passport_value":8192,"config_value":4096}"#,
        ));
        match ev {
            Some(WireEvent::Warning(Warning::PassportMismatch {
                field,
                passport_value,
                config_value,
            })) => {
                assert_eq!(field, "context_length");
                assert_eq!(passport_value, serde_json::json!(8192));
                assert_eq!(config_value, serde_json::json!(4096));
            }
            other => panic!("expected passport mismatch, got {other:?}"),
        }

        let ev = map_frame(&frame(
            "warning",
            r#"{"event":"GpuFallback","requested":"auto","effective":0}"#,
        ));
        match ev {
            Some(WireEvent::Warning(Warning::GpuFallback {
                requested,
                effective,
            })) => {
                assert_eq!(requested, Some(serde_json::json!("auto")));
                assert_eq!(effective, Some(serde_json::json!(0)));
            }
            other => panic!("expected gpu fallback, got {other:?}"),
        }
    }

    #[test]
    fn warning_unknown_kind_passes_through() {
        let ev = map_frame(&frame("warning", r#"{"event":"FutureWarning","x":1}"#));
        match ev {
            Some(WireEvent::Warning(Warning::Other(v))) => {
                assert_eq!(v["event"], "FutureWarning");
            }
            other => panic!("expected opaque warning, got {other:?}"),
        }
    }

    #[test]
    fn end_carries_status() {
        let ev = map_frame(&frame("end", r#"{"request_id":"r1","status":"ok"}"#));
        match ev {
            Some(WireEvent::End(e)) => {
                assert_eq!(e.status, "ok");
            }
            other => panic!("expected end, got {other:?}"),
        }
    }

    #[test]
    fn final_carries_authoritative_text() {
        let ev = map_frame(&frame(
            "final",
            r#"{"request_id":"r1","model_id":"m1","text":"done"}"#,
        ));
        match ev {
            Some(WireEvent::Final(f)) => {
                assert_eq!(f.text, "done");
                assert_eq!(f.request_id, "r1");
            }
            other => panic!("expected final, got {other:?}"),
        }
    }

    #[test]
    fn request_id_extracted_under_both_spellings() {
        let snake: Value = serde_json::from_str(r#"{"request_id":"a"}"#).unwrap();
        let camel: Value = serde_json::from_str(r#"{"requestId":"b"}"#).unwrap();
        assert_eq!(extract_request_id(&snake), Some("a"));
        assert_eq!(extract_request_id(&camel), Some("b"));
    }

    // -----------------------------------------------------------------
    // Tool trace decoding
    // -----------------------------------------------------------------

    #[test]
    fn commentary_double_encoded_tool_trace_decodes() {
        let inner = r#"{"tool":"web_search","status":"ok","ok":true,"preview_hash":"abc123"}"#;
        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: inner.to_string(),
            parsed: None,
        };
        let entry = ev.tool_trace().expect("trace entry");
        assert_eq!(entry.tool, "web_search");
        assert_eq!(entry.status, "ok");
        assert!(entry.ok);
        assert_eq!(entry.preview_hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn tool_trace_ok_defaults_from_status() {
        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: r#"{"tool":"calc","status":"ok"}"#.to_string(),
            parsed: None,
        };
        assert!(ev.tool_trace().unwrap().ok);

        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: r#"{"tool":"calc","status":"error","error_type":"bad_args"}"#.to_string(),
            parsed: None,
        };
        let entry = ev.tool_trace().unwrap();
        assert!(!entry.ok);
        assert_eq!(entry.error_type.as_deref(), Some("bad_args"));
        // message falls back to error_type when absent
        assert_eq!(entry.message.as_deref(), Some("bad_args"));
    }

    #[test]
    fn tool_trace_status_defaults_to_unknown() {
        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: r#"{"tool":"calc"}"#.to_string(),
            parsed: None,
        };
        let entry = ev.tool_trace().unwrap();
        assert_eq!(entry.status, "unknown");
        assert!(!entry.ok);
    }

    #[test]
    fn commentary_prefers_pre_decoded_payload() {
        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: "plain text, not json".to_string(),
            parsed: Some(serde_json::json!({"tool":"grep","status":"ok"})),
        };
        assert_eq!(ev.tool_trace().unwrap().tool, "grep");
    }

    #[test]
    fn non_tool_commentary_yields_no_trace() {
        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: "free-form commentary".to_string(),
            parsed: None,
        };
        assert!(ev.tool_trace().is_none());

        let ev = CommentaryEvent {
            request_id: "r1".into(),
            model_id: "m1".into(),
            text: r#"{"no_tool_field":true}"#.to_string(),
            parsed: None,
        };
        assert!(ev.tool_trace().is_none());
    }
}

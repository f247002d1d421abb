// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Request-side types shared by every component.
//
// A `RequestContext` is built by the caller once per send, handed to a
// stream session, and never mutated afterwards. `GenerationOverrides`
// are plain data: the backend is authoritative on applying and
// clamping them, so no invariants are enforced here.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One generation request, immutable once issued.
///
/// Owned exclusively by the stream session driving it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub model_id: String,
    pub prompt: String,
    pub overrides: GenerationOverrides,
}

impl RequestContext {
    /// The JSON body sent to open the generation stream.
    ///
    /// Field names follow the wire contract: the model id is sent as
    /// `model`, overrides are omitted entirely when empty.
    pub fn wire_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "session_id": self.session_id,
            "model": self.model_id,
            "prompt": self.prompt,
        });
        if !self.overrides.is_empty() {
            body["overrides"] = serde_json::to_value(&self.overrides)
                .unwrap_or(serde_json::Value::Null);
        }
        body
    }
}

/// Optional generation knobs forwarded verbatim to the backend.
///
/// `None` fields are left off the wire so the backend can distinguish
/// "not set" from an explicit value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_gpu_layers: Option<GpuLayers>,
    /// Synthetic delay before the first frame, for test harnesses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_pre_stream_delay_ms: Option<u64>,
    /// Synthetic delay between tokens, for test harnesses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_per_token_delay_ms: Option<u64>,
}

impl GenerationOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// GPU layer request: an explicit layer count or "let the backend pick".
///
/// Wire form is either the string `"auto"` or a non-negative integer.
/// Anything unrecognized normalizes to `Auto` rather than failing the
/// whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuLayers {
    Auto,
    Layers(u32),
}

impl Serialize for GpuLayers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GpuLayers::Auto => serializer.serialize_str("auto"),
            GpuLayers::Layers(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for GpuLayers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(normalize_gpu_layers(&value))
    }
}

impl std::str::FromStr for GpuLayers {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(normalize_gpu_layers(&serde_json::Value::String(s.to_string())))
    }
}

/// Normalize a loosely-typed GPU layer value.
///
/// Numbers are truncated and floored at zero; strings accept "auto"
/// (any case) or a parseable integer; everything else is `Auto`.
pub fn normalize_gpu_layers(value: &serde_json::Value) -> GpuLayers {
    match value {
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => GpuLayers::Layers(f.trunc().max(0.0) as u32),
            _ => GpuLayers::Auto,
        },
        serde_json::Value::String(s) => {
            let trimmed = s.trim().to_ascii_lowercase();
            if trimmed.is_empty() || trimmed == "auto" {
                return GpuLayers::Auto;
            }
            match trimmed.parse::<i64>() {
                Ok(n) => GpuLayers::Layers(n.max(0) as u32),
                Err(_) => GpuLayers::Auto,
            }
        }
        _ => GpuLayers::Auto,
    }
}

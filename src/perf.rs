// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Derivations over the last usage snapshot.
//
// Pure arithmetic only: cap ratio, context ratio, the reasoning-ratio
// alert, and GPU layer labelling. Consumers render these however they
// like; nothing here touches the wire.

use crate::stream::{GpuValue, UsageSnapshot};

/// Output-cap ratio in percent, when the backend reported a cap.
///
/// `None` means no usable cap info (absent or zero effective max), as
/// distinct from a 0% ratio.
pub fn cap_ratio_pct(usage: &UsageSnapshot) -> Option<u32> {
    let effective = usage.effective_max_tokens.filter(|&max| max > 0)?;
    let pct = (usage.output_tokens as f64 / effective as f64 * 100.0).round() as u32;
    Some(pct.min(100))
}

/// Whether generation was truncated by the output cap.
pub fn cap_applied(usage: &UsageSnapshot) -> bool {
    usage.cap_applied.unwrap_or(false)
}

/// Context-window usage in percent.
///
/// Falls back to `prompt + output` tokens when the backend did not
/// report used context, and to `fallback_total` (e.g. the model's
/// advertised context length) when it did not report the total.
pub fn context_ratio_pct(usage: &UsageSnapshot, fallback_total: Option<u64>) -> Option<u32> {
    let used = usage
        .context_used_tokens
        .unwrap_or(usage.prompt_tokens + usage.output_tokens);
    let total = usage.context_total_tokens.or(fallback_total)?;
    let pct = (used as f64 / total.max(1) as f64 * 100.0).round() as u32;
    Some(pct.min(100))
}

/// Whether the reasoning share of the output crosses the alert
/// threshold. The boundary is inclusive: a ratio exactly at the
/// threshold alerts.
pub fn reasoning_alert(usage: &UsageSnapshot, threshold: f64) -> bool {
    match usage.reasoning_ratio {
        Some(ratio) => ratio >= threshold,
        None => false,
    }
}

/// Render one GPU layer value the way operators read it: `-1` and
/// unparseable text mean "auto", `0` means CPU, anything else is the
/// layer count.
pub fn format_gpu(value: Option<&GpuValue>) -> String {
    match value {
        None => "auto".to_string(),
        Some(GpuValue::Count(-1)) => "auto".to_string(),
        Some(GpuValue::Count(0)) => "cpu".to_string(),
        Some(GpuValue::Count(n)) => n.to_string(),
        Some(GpuValue::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
                return "auto".to_string();
            }
            match trimmed.parse::<i64>() {
                Ok(0) => "cpu".to_string(),
                Ok(n) => n.to_string(),
                Err(_) => trimmed.to_string(),
            }
        }
    }
}

/// One-line GPU summary, or `None` when the snapshot carries no GPU
/// info at all.
///
/// Shows `requested -> effective` when they differ, and tags fallback,
/// CPU-only, and explicit-GPU modes.
pub fn gpu_label(usage: &UsageSnapshot) -> Option<String> {
    let has_info = usage.n_gpu_layers.is_some()
        || usage.requested_n_gpu_layers.is_some()
        || usage.gpu_offload.is_some()
        || usage.gpu_fallback.is_some();
    if !has_info {
        return None;
    }

    let effective = format_gpu(usage.n_gpu_layers.as_ref());
    let requested = usage
        .requested_n_gpu_layers
        .as_ref()
        .map(|v| format_gpu(Some(v)));

    let base = match requested {
        Some(req) if req != effective => format!("{req} -> {effective}"),
        _ => effective.clone(),
    };

    let fallback = usage.gpu_fallback.unwrap_or(false);
    let offload = usage.gpu_offload.unwrap_or(match &usage.n_gpu_layers {
        Some(GpuValue::Count(n)) => *n > 0,
        _ => true,
    });

    let suffix = if fallback {
        " (fallback)"
    } else if !offload || effective == "cpu" {
        " (CPU)"
    } else if effective != "auto" {
        " (GPU)"
    } else {
        ""
    };

    Some(format!("gpu: {base}{suffix}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

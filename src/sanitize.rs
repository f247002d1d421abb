// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Final-text sanitization.
//
// Some backends occasionally leak a fused role/channel marker
// ("assistantfinal", "assistant final") at the head of the
// authoritative final text. This module strips up to three leading
// repetitions of that marker, and only from the head: interior and
// trailing text is never touched.

use regex::Regex;
use std::sync::OnceLock;

/// Leading run (1-3 repetitions) of the fused service marker, with
/// optional surrounding whitespace and separator punctuation.
const FUSED_PREFIX_PATTERN: &str =
    r"(?i)^(?:\s*(?:assistant\s*final|assistantfinal)[\s:,\-]*){1,3}";

fn fused_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FUSED_PREFIX_PATTERN).expect("fused prefix pattern compiles"))
}

/// Result of a sanitization pass.
///
/// When `scrubbed` is set, `original` holds the pre-scrub input for
/// diagnostic display; otherwise it is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scrub {
    pub text: String,
    pub scrubbed: bool,
    pub original: Option<String>,
}

/// Strip a leading fused service marker from authoritative final text.
///
/// Pure and idempotent: applying it twice yields the same result as
/// once. Leading whitespace is trimmed after the strip; no other part
/// of the string is modified.
pub fn sanitize_final_text(input: &str) -> Scrub {
    if input.is_empty() {
        return Scrub {
            text: String::new(),
            scrubbed: false,
            original: None,
        };
    }

    let stripped = match fused_prefix().find(input) {
        Some(m) if m.start() == 0 => &input[m.end()..],
        _ => {
            return Scrub {
                text: input.trim_start().to_string(),
                scrubbed: false,
                original: None,
            };
        }
    };

    Scrub {
        text: stripped.trim_start().to_string(),
        scrubbed: true,
        original: Some(input.to_string()),
    }
}

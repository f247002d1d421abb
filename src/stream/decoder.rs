// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Frame decoder.
//
// Turns a raw incremental byte stream into discrete
// (event-name, payload-text) frames. A frame is the text between two
// successive blank-line separators ("\n\n"). The decoder knows nothing
// about event semantics: classification happens downstream.
//
// Chunks arrive at arbitrary boundaries, including mid-frame and
// mid-character. Undecoded trailing bytes are buffered across chunks;
// a multi-byte UTF-8 character split across two chunks decodes once
// its tail arrives. On end of stream, a non-empty remainder is
// discarded: no partial frame is ever delivered.

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One decoded frame: an optional event name and the joined payload.
///
/// Within a frame, `event:` lines set the name (last one wins) and
/// `data:` lines are stripped of the label plus a single leading space
/// and joined with newlines, so line-wrapped payloads re-assemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

// ---------------------------------------------------------------------------
// FrameDecoder
// ---------------------------------------------------------------------------

/// Incremental frame decoder. One per stream; owns its buffers.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Raw bytes not yet decoded (tail may be a partial UTF-8 sequence).
    bytes: Vec<u8>,
    /// Decoded text not yet split into complete frames.
    text: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.bytes.extend_from_slice(chunk);
        self.decode_available();
        self.drain_frames()
    }

    /// Signal end of stream. Any buffered remainder is discarded; the
    /// number of undelivered text bytes is returned for logging.
    pub fn finish(self) -> usize {
        self.bytes.len() + self.text.len()
    }

    /// Move every complete UTF-8 prefix of `bytes` into `text`.
    ///
    /// An incomplete trailing sequence stays buffered; an invalid
    /// sequence is replaced with U+FFFD so one bad byte cannot wedge
    /// the stream.
    fn decode_available(&mut self) {
        loop {
            match std::str::from_utf8(&self.bytes) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.bytes.clear();
                    return;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    // Safe: from_utf8 just validated this prefix.
                    self.text
                        .push_str(std::str::from_utf8(&self.bytes[..valid_len]).unwrap_or(""));
                    match err.error_len() {
                        Some(bad) => {
                            self.text.push('\u{FFFD}');
                            self.bytes.drain(..valid_len + bad);
                        }
                        None => {
                            // Incomplete trailing sequence: wait for more bytes.
                            self.bytes.drain(..valid_len);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Split complete frames out of the decoded text buffer.
    fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(idx) = self.text.find("\n\n") {
            let raw = self.text[..idx].to_string();
            self.text = self.text[idx + 2..].to_string();
            if raw.trim().is_empty() {
                continue;
            }
            frames.push(parse_frame(&raw));
        }
        frames
    }
}

/// Parse one raw frame body into its event name and payload.
fn parse_frame(raw: &str) -> Frame {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for line in raw.split('\n') {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    Frame {
        event,
        data: data_lines.join("\n"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

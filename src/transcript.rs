// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Transcript reducer.
//
// The caller-side state machine that folds delivered wire events into
// an ordered conversation log. Message content accumulates from token
// fragments, then is replaced wholesale by the authoritative final
// text. Reasoning, tool traces and usage live in side channels and are
// never mixed into message content.
//
// The transcript is owned and mutated only by its single reducer on
// the task delivering events, so no locking is needed.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::sanitize::{sanitize_final_text, Scrub};
use crate::stream::{ErrorEvent, ToolTraceEntry, UsageSnapshot, Warning, WireEvent};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A single message in the conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// When this message was first recorded.
    pub at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Ordered conversation log plus the side channels a stream produces.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Accumulated reasoning text for the current exchange.
    reasoning: String,
    /// Ordered tool invocation trace for the current exchange.
    tool_trace: Vec<ToolTraceEntry>,
    trace_complete: bool,
    /// Last usage snapshot; each new one fully replaces the prior.
    usage: Option<UsageSnapshot>,
    warnings: Vec<Warning>,
    last_error: Option<ErrorEvent>,
    /// Set once a final event replaced the assistant content; token
    /// events for the same request must not re-append afterwards.
    final_applied: bool,
    /// Scrub record when the final text needed sanitization.
    final_scrub: Option<Scrub>,
    streaming: bool,
    was_cancelled: bool,
    started: Option<Instant>,
    elapsed_ms: Option<u64>,
}

/// Outcome of a send attempt before anything touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// User and placeholder assistant messages were appended; issue
    /// the request now.
    Issue,
    /// Input was empty after trimming; nothing happened.
    EmptyInput,
    /// No model is selected; a local error was recorded instead.
    NoModel,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn reasoning(&self) -> Option<&str> {
        if self.reasoning.is_empty() {
            None
        } else {
            Some(&self.reasoning)
        }
    }

    pub fn tool_trace(&self) -> &[ToolTraceEntry] {
        &self.tool_trace
    }

    pub fn trace_complete(&self) -> bool {
        self.trace_complete
    }

    pub fn usage(&self) -> Option<&UsageSnapshot> {
        self.usage.as_ref()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn last_error(&self) -> Option<&ErrorEvent> {
        self.last_error.as_ref()
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn was_cancelled(&self) -> bool {
        self.was_cancelled
    }

    /// Wall time from send to end/cancel, once closed out.
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms
    }

    /// Scrub record for the last final text, when sanitization fired.
    pub fn final_scrub(&self) -> Option<&Scrub> {
        self.final_scrub.as_ref()
    }

    // -----------------------------------------------------------------
    // Send
    // -----------------------------------------------------------------

    /// Begin a new exchange: guard the input, then atomically append
    /// the user message and an empty assistant placeholder.
    ///
    /// Empty input is a silent no-op. A missing model surfaces a local
    /// `no-model` error instead of issuing anything.
    pub fn begin_send(&mut self, text: &str, model: Option<&str>) -> SendDisposition {
        if text.trim().is_empty() {
            return SendDisposition::EmptyInput;
        }
        if model.is_none() {
            self.last_error = Some(ErrorEvent::new("no-model", "no-model-selected"));
            return SendDisposition::NoModel;
        }

        self.last_error = None;
        self.usage = None;
        self.reasoning.clear();
        self.tool_trace.clear();
        self.warnings.clear();
        self.trace_complete = false;
        self.final_applied = false;
        self.final_scrub = None;
        self.was_cancelled = false;
        self.elapsed_ms = None;

        self.messages.push(Message::new(Role::User, text));
        self.messages.push(Message::new(Role::Assistant, ""));
        self.streaming = true;
        self.started = Some(Instant::now());
        SendDisposition::Issue
    }

    // -----------------------------------------------------------------
    // Reduction
    // -----------------------------------------------------------------

    /// Fold one delivered event into the transcript.
    pub fn apply(&mut self, event: &WireEvent) {
        match event {
            WireEvent::Token(token) => {
                // The authoritative final text already landed: late
                // tokens for the same request must not re-append.
                if self.final_applied {
                    return;
                }
                // No placeholder means nothing to append to; this must
                // not crash and must not grow the transcript.
                if let Some(last) = self.messages.last_mut() {
                    if last.role == Role::Assistant {
                        last.content.push_str(&token.text);
                    }
                }
            }
            WireEvent::Final(fin) => {
                let scrub = sanitize_final_text(&fin.text);
                if let Some(msg) = self
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                {
                    msg.content = scrub.text.clone();
                }
                if scrub.scrubbed {
                    self.final_scrub = Some(scrub);
                }
                self.final_applied = true;
            }
            WireEvent::Reasoning(r) => {
                self.reasoning.push_str(&r.reasoning);
            }
            WireEvent::Commentary(c) => {
                if let Some(entry) = c.tool_trace() {
                    self.tool_trace.push(entry);
                }
            }
            WireEvent::Usage(u) => {
                self.usage = Some(u.clone());
            }
            WireEvent::Warning(w) => {
                self.warnings.push(w.clone());
            }
            WireEvent::Error(err) => {
                self.last_error = Some(err.clone());
                let marker = format!("[error: {}]", err.message);
                match self.messages.last_mut() {
                    Some(last) if last.role == Role::Assistant => {
                        last.content = marker;
                    }
                    _ => {
                        self.messages.push(Message::new(Role::Assistant, marker));
                    }
                }
                self.streaming = false;
                self.trace_complete = true;
            }
            WireEvent::End(_) => {
                self.close_out();
            }
        }
    }

    /// Record a client-initiated cancellation.
    pub fn cancel(&mut self) {
        self.was_cancelled = true;
        self.close_out();
    }

    fn close_out(&mut self) {
        self.streaming = false;
        self.trace_complete = true;
        if self.elapsed_ms.is_none() {
            if let Some(started) = self.started.take() {
                self.elapsed_ms = Some(started.elapsed().as_millis() as u64);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Streaming generation client.
//
// Responsibilities:
// - Decode an incremental byte stream into blank-line-delimited frames,
//   tolerating chunk splits anywhere (including mid-UTF-8 character)
// - Map frame payloads into typed wire events, normalizing backend
//   field-name variants in one place
// - Drive one in-flight request per session: issue, read, dispatch
//   events in order, cancel cooperatively
// - Guarantee exactly one terminal `end` signal per issued request

mod decoder;
mod event;
mod session;

pub use decoder::{Frame, FrameDecoder};
pub use event::{
    map_frame, CommentaryEvent, EndEvent, ErrorEvent, FinalEvent, GpuValue, ReasoningEvent,
    TokenEvent, ToolTraceEntry, UsageSnapshot, Warning, WireEvent,
};
pub use session::{
    ByteStream, HttpTransport, IssueError, SessionState, StreamHandle, StreamSession, Transport,
    TransportError, TransportResponse,
};

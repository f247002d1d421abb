// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod perf;
pub mod request;
pub mod sanitize;
pub mod stream;
pub mod transcript;

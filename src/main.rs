// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use skein::config::{self, ClientConfig};
use skein::perf;
use skein::request::{GenerationOverrides, GpuLayers, RequestContext};
use skein::stream::{HttpTransport, StreamSession, WireEvent};
use skein::transcript::{SendDisposition, Transcript};

use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "skein", about = "Streaming generation client")]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "SKEIN_API_URL")]
    api_url: Option<String>,

    /// Path to a skein.yaml config file
    #[arg(long, env = "SKEIN_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Model id to generate with
    #[arg(long)]
    model: String,

    /// Session id (generated when omitted)
    #[arg(long)]
    session: Option<String>,

    /// Sampling temperature override
    #[arg(long)]
    temperature: Option<f64>,

    /// Nucleus sampling override
    #[arg(long)]
    top_p: Option<f64>,

    /// Output token budget override
    #[arg(long)]
    max_output_tokens: Option<u32>,

    /// Persona text prepended by the backend
    #[arg(long)]
    persona: Option<String>,

    /// Reasoning preset name (e.g. "low", "medium", "high")
    #[arg(long)]
    reasoning_preset: Option<String>,

    /// GPU layers: "auto" or a layer count
    #[arg(long)]
    n_gpu_layers: Option<GpuLayers>,

    /// Prompt text
    prompt: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut client_config = match &cli.config {
        Some(path) => {
            let source = config::FileSource { path: path.clone() };
            match ClientConfig::load(&source) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("failed to load config: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => ClientConfig::new(config::resolve_base_url(None, None, None), None),
    };
    if let Some(url) = cli.api_url.as_deref() {
        client_config.base_url = config::resolve_base_url(Some(url), None, None);
    }
    if let Some(session) = cli.session.clone() {
        client_config.session_id = session;
    }

    tracing::info!(
        base_url = %client_config.base_url,
        session_id = %client_config.session_id,
        model = %cli.model,
        "skein starting"
    );

    let defaults = client_config.defaults.clone();
    let overrides = GenerationOverrides {
        temperature: cli.temperature.or(defaults.temperature),
        top_p: cli.top_p.or(defaults.top_p),
        max_output_tokens: cli.max_output_tokens.or(defaults.max_output_tokens),
        persona: cli.persona.clone().or(defaults.persona),
        reasoning_preset: cli.reasoning_preset.clone().or(defaults.reasoning_preset),
        n_gpu_layers: cli.n_gpu_layers.or(defaults.n_gpu_layers),
        dev_pre_stream_delay_ms: defaults.dev_pre_stream_delay_ms,
        dev_per_token_delay_ms: defaults.dev_per_token_delay_ms,
    };

    let mut transcript = Transcript::new();
    if transcript.begin_send(&cli.prompt, Some(&cli.model)) != SendDisposition::Issue {
        tracing::error!("nothing to send: empty prompt");
        std::process::exit(2);
    }

    let request = RequestContext {
        session_id: client_config.session_id.clone(),
        model_id: cli.model.clone(),
        prompt: cli.prompt.clone(),
        overrides,
    };

    let transport = Arc::new(HttpTransport::new(&client_config));
    let session = StreamSession::new(transport);
    let (handle, mut events) = match session.issue(request) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("failed to issue request: {e}");
            std::process::exit(1);
        }
    };
    let handle = Arc::new(handle);

    // Ctrl-C cancels the in-flight request; the stream still settles
    // through its terminal end event.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("cancel requested");
                handle.cancel();
            }
        });
    }

    let mut stdout = std::io::stdout();
    let mut end_status: Option<String> = None;
    while let Some(event) = events.recv().await {
        match &event {
            WireEvent::Token(t) => {
                print!("{}", t.text);
                let _ = stdout.flush();
            }
            WireEvent::Warning(w) => tracing::warn!(warning = ?w, "backend warning"),
            WireEvent::Error(e) => {
                tracing::error!(code = %e.code, message = %e.message, "stream error");
            }
            WireEvent::End(e) => end_status = Some(e.status.clone()),
            _ => {}
        }
        transcript.apply(&event);
    }
    println!();

    if let Some(scrub) = transcript.final_scrub() {
        tracing::warn!(original = ?scrub.original, "final text was scrubbed");
    }

    if let Some(usage) = transcript.usage() {
        tracing::info!(
            latency_ms = usage.latency_ms,
            prompt_tokens = usage.prompt_tokens,
            output_tokens = usage.output_tokens,
            decode_tps = usage.decode_tps,
            cap_pct = ?perf::cap_ratio_pct(usage),
            cap_applied = perf::cap_applied(usage),
            gpu = ?perf::gpu_label(usage),
            reasoning_alert = perf::reasoning_alert(usage, client_config.ratio_threshold),
            "usage"
        );
    }

    let status = end_status.as_deref().unwrap_or("none");
    tracing::info!(
        status,
        request_id = ?handle.request_id(),
        elapsed_ms = ?transcript.elapsed_ms(),
        "stream finished"
    );

    if status != "ok" {
        std::process::exit(1);
    }
}

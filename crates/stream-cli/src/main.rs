//! stream-cli: play an MP3 stream URL on the local audio output.
//!
//! Wires the streaming engine to CPAL and the terminal:
//! - engine events (captions) arrive over a channel and print as they fire
//! - Ctrl-C stops the session cleanly
//! - the process exits non-zero when the session ends in an error

mod cli;
mod device;
mod sink;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use stream_engine::config::EngineConfig;
use stream_engine::controller::StreamController;
use stream_engine::events::EngineEvents;
use stream_engine::transport::HttpTransport;
use stream_types::SessionState;
use tracing_subscriber::EnvFilter;

/// Forwards engine callbacks into a channel the main thread drains.
struct ChannelEvents {
    tx: Sender<String>,
}

impl EngineEvents for ChannelEvents {
    fn on_caption_changed(&self, text: &str) {
        // Dropping a caption on a full channel beats blocking the engine.
        let _ = self.tx.try_send(text.to_string());
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stream_cli=info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }
    let url = args.url.clone().context("missing stream URL")?;

    let cfg = EngineConfig {
        max_buffer_bytes: args.max_buffer_kb * 1024,
        min_start_bytes: args.min_start_kb * 1024,
        ..EngineConfig::default()
    };
    let transport = Arc::new(HttpTransport {
        timeout: Duration::from_secs(args.timeout_secs),
    });
    let sink_factory = Arc::new(sink::CpalSinkFactory {
        device_needle: args.device.clone(),
    });

    let (caption_tx, caption_rx) = bounded(64);
    let controller = Arc::new(
        StreamController::new(cfg, transport, sink_factory)
            .with_events(Arc::new(ChannelEvents { tx: caption_tx })),
    );
    controller.set_display_mode(args.display_mode.into());
    controller.set_caption_source(args.caption_url.as_deref());

    let controller_for_signal = controller.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupted, stopping");
        controller_for_signal.stop_streaming();
    })
    .context("install signal handler")?;

    controller.start_streaming(&url)?;
    run_until_done(&controller, &caption_rx);

    let status = controller.status();
    if args.json_status {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    if status.state == SessionState::Error || status.last_error.is_some() {
        if let Some(err) = &status.last_error {
            tracing::error!("session failed: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Print captions as they arrive until the session leaves the active state.
fn run_until_done(controller: &StreamController, captions: &Receiver<String>) {
    loop {
        match captions.recv_timeout(Duration::from_millis(200)) {
            Ok(text) => println!("{text}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if controller.state() != SessionState::Active {
            break;
        }
    }
}

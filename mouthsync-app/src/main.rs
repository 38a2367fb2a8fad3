//! Mouthsync terminal host.
//!
//! Speaks one utterance through the configured backend and draws the mouth
//! opening as a meter, one line per animation chunk. Ctrl-C stops the
//! utterance early. `--save-settings` writes the merged settings back to the
//! settings file before speaking.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use mouthsync_core::{
    BackendHandle, BroadcastRenderer, LipSyncEngine, MouthEvent, MouthPayload, SessionState,
    StubFormantBackend, StubStreamingBackend, WavBackend,
};
use settings::{default_settings_path, load_or_default, save_settings, AppSettings, BackendKind};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

const MOUTH_EVENT_CAP: usize = 1024;
const PRINTER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Args {
    text: Option<String>,
    settings: Option<PathBuf>,
    backend: Option<BackendKind>,
    wav: Option<PathBuf>,
    voice: Option<String>,
    pitch: Option<u32>,
    rate: Option<u32>,
    save_settings: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut words: Vec<String> = Vec::new();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().ok_or_else(|| format!("missing value for {flag}"));
        match arg.as_str() {
            "--text" => args.text = Some(value("--text")?),
            "--settings" => args.settings = Some(PathBuf::from(value("--settings")?)),
            "--backend" => {
                let raw = value("--backend")?;
                args.backend = Some(
                    BackendKind::parse(&raw).ok_or_else(|| format!("unknown backend: {raw}"))?,
                );
            }
            "--wav" => {
                args.wav = Some(PathBuf::from(value("--wav")?));
                args.backend.get_or_insert(BackendKind::Wav);
            }
            "--voice" => args.voice = Some(value("--voice")?),
            "--pitch" => {
                args.pitch = Some(
                    value("--pitch")?
                        .parse()
                        .map_err(|_| "invalid value for --pitch".to_string())?,
                );
            }
            "--rate" => {
                args.rate = Some(
                    value("--rate")?
                        .parse()
                        .map_err(|_| "invalid value for --rate".to_string())?,
                );
            }
            "--save-settings" => args.save_settings = true,
            "--help" | "-h" => {
                println!(
                    "Usage: mouthsync [--backend formant|streaming|wav] [--wav <file.wav>] \\
  [--voice <name>] [--pitch 0-200] [--rate 0-200] [--settings <file.json>] \\
  [--save-settings] [--text] <text...>"
                );
                std::process::exit(0);
            }
            other if other.starts_with("--") => return Err(format!("unknown argument: {other}")),
            other => words.push(other.to_string()),
        }
    }

    if args.text.is_none() && !words.is_empty() {
        args.text = Some(words.join(" "));
    }
    Ok(args)
}

fn apply_args(settings: &mut AppSettings, args: &Args) {
    if let Some(kind) = args.backend {
        settings.backend = kind;
    }
    if let Some(path) = &args.wav {
        settings.wav_path = Some(path.clone());
    }
    if let Some(voice) = &args.voice {
        settings.voice = voice.clone();
    }
    if let Some(pitch) = args.pitch {
        settings.pitch = pitch;
    }
    if let Some(rate) = args.rate {
        settings.rate = rate;
    }
    settings.normalize();
}

fn build_backend(settings: &AppSettings) -> anyhow::Result<BackendHandle> {
    Ok(match settings.backend {
        BackendKind::Formant => BackendHandle::new(StubFormantBackend::new(settings.sample_rate)),
        BackendKind::Streaming => BackendHandle::new(StubStreamingBackend::new(
            settings.sample_rate,
            Duration::from_millis(settings.stream_latency_ms),
        )),
        BackendKind::Wav => {
            let Some(path) = settings.wav_path.clone() else {
                bail!("the wav backend needs --wav <file> or \"wavPath\" in settings");
            };
            let backend = WavBackend::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            BackendHandle::new(backend)
        }
    })
}

fn meter_line(amplitude: u16, width: usize) -> String {
    let filled = (usize::from(amplitude) * width).div_ceil(usize::from(i16::MAX.unsigned_abs()));
    let filled = filled.min(width);
    format!("|{}{}| {amplitude:>5}", "#".repeat(filled), " ".repeat(width - filled))
}

/// Print mouth events until the face is told to rest.
async fn print_mouth(mut rx: broadcast::Receiver<MouthEvent>, width: usize) {
    loop {
        match rx.recv().await {
            Ok(MouthEvent {
                payload: MouthPayload::Peak { amplitude },
                seq,
            }) => println!("{seq:>6} {}", meter_line(amplitude, width)),
            Ok(MouthEvent {
                payload: MouthPayload::Waveform { .. },
                ..
            }) => {}
            Ok(MouthEvent {
                payload: MouthPayload::Idle,
                ..
            }) => {
                println!("{:>6} |{}| rest", "", " ".repeat(width));
                return;
            }
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "terminal fell behind"),
            Err(RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mouthsync=info")),
        )
        .init();

    let args = parse_args().map_err(anyhow::Error::msg)?;
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_or_default(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    apply_args(&mut settings, &args);
    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("saving settings to {}", settings_path.display()))?;
        info!(settings = %settings_path.display(), "settings saved");
    }

    let text = args.text.clone().unwrap_or_default();
    if text.trim().is_empty() && settings.backend != BackendKind::Wav {
        bail!("nothing to say; pass the text as arguments or with --text");
    }

    info!(
        backend = ?settings.backend,
        settings = %settings_path.display(),
        "mouthsync starting"
    );

    let renderer = BroadcastRenderer::new(MOUTH_EVENT_CAP);
    let printer = tokio::spawn(print_mouth(renderer.subscribe(), settings.meter_width));

    let engine = LipSyncEngine::new(
        settings.engine_config(),
        build_backend(&settings)?,
        Arc::new(renderer),
    );
    let config = engine.config();
    info!(
        chunk_ms = config.chunk_period.as_millis() as u64,
        poll_ms = config.poll_period.as_millis() as u64,
        stall_grace_ms = config.stall_grace.as_millis() as u64,
        "engine ready"
    );
    let mut status = engine.subscribe_status();

    let session = engine.speak(&text, &settings.voice_parameters())?;
    info!(%session, "speaking");

    loop {
        tokio::select! {
            event = status.recv() => match event {
                Ok(event) if event.status == SessionState::Idle => {
                    if let Some(detail) = event.detail {
                        warn!(%detail, "utterance ended early");
                    }
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = engine.stop() {
                    warn!(error = %e, "stop after ctrl-c");
                }
                break;
            }
        }
    }

    if tokio::time::timeout(PRINTER_GRACE, printer).await.is_err() {
        warn!("mouth printer did not see the idle event");
    }

    let diag = engine.diagnostics_snapshot();
    info!(
        buffers = diag.buffers_in,
        chunks = diag.chunks_emitted,
        discarded = diag.chunks_discarded,
        "done"
    );
    Ok(())
}

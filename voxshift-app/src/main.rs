//! Voxshift headless host.
//!
//! Drives the engine control API from the command line in place of a
//! graphical surface:
//!
//! - `profiles`: list the preset registry (and remote voices)
//! - `live`: real-time transformation from microphone to speakers
//! - `record`: capture, convert, save and optionally play back
//! - `convert`: offline conversion of a WAV file through the local chain
//! - `settings`: show or update the persisted settings

mod settings;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use settings::{
    default_settings_path, load_settings, normalize_converter, normalize_preset, save_settings,
    AppSettings,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use voxshift_core::convert::remote::{voice_id_for, REMOTE_VOICES};
use voxshift_core::{
    preset, wav, ConversionGateway, LocalGateway, PlaybackEnd, RemoteGateway, RemoteGatewayConfig,
    TaskOutcome, VoiceSelector, VoxEngine, PRESET_NAMES,
};

#[derive(Parser)]
#[command(name = "voxshift")]
#[command(about = "Real-time and record-then-convert voice transformation")]
#[command(version)]
struct Cli {
    /// Settings file (default: platform data directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List voice presets and remote voices
    Profiles,

    /// Transform the microphone live until Ctrl-C or the time limit
    Live {
        /// Preset name (default: from settings)
        #[arg(short, long)]
        profile: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<f32>,
    },

    /// Record, convert, save, and play back the result
    Record {
        #[arg(short, long)]
        profile: Option<String>,

        /// Remote voice name or id; switches to the remote converter
        #[arg(long)]
        voice: Option<String>,

        #[arg(short, long)]
        seconds: Option<f32>,

        /// Output directory for the converted WAV
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Do not play the converted audio
        #[arg(long)]
        no_play: bool,
    },

    /// Convert a WAV file offline with the local effect chain
    Convert {
        input: PathBuf,

        #[arg(short, long)]
        profile: Option<String>,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show settings, optionally updating them first
    Settings {
        #[arg(long)]
        profile: Option<String>,

        /// `local` or `remote`
        #[arg(long)]
        converter: Option<String>,

        #[arg(long)]
        remote_voice: Option<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxshift=info,voxshift_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        profile = %app_settings.profile,
        converter = %app_settings.converter,
        sample_rate = app_settings.sample_rate,
        chunk_size = app_settings.chunk_size,
        "settings loaded"
    );

    match cli.command {
        Commands::Profiles => list_profiles(),
        Commands::Live { profile, seconds } => run_live(&app_settings, profile, seconds).await,
        Commands::Record {
            profile,
            voice,
            seconds,
            out,
            no_play,
        } => {
            let mut settings = app_settings;
            if let Some(p) = profile {
                settings.profile = normalize_preset(&p);
            }
            if let Some(v) = voice {
                settings.converter = "remote".into();
                settings.remote_voice = v;
            }
            if out.is_some() {
                settings.output_dir = out;
            }
            if no_play {
                settings.play_converted = false;
            }
            run_record(&settings, seconds).await
        }
        Commands::Convert {
            input,
            profile,
            out,
        } => {
            let profile = profile
                .map(|p| normalize_preset(&p))
                .unwrap_or_else(|| app_settings.profile.clone());
            let dir = out.unwrap_or_else(|| storage::output_dir(&app_settings));
            run_convert(&input, &profile, &dir)
        }
        Commands::Settings {
            profile,
            converter,
            remote_voice,
            output_dir,
        } => {
            let mut settings = app_settings;
            let changed = profile.is_some()
                || converter.is_some()
                || remote_voice.is_some()
                || output_dir.is_some();
            if let Some(p) = profile {
                settings.profile = normalize_preset(&p);
            }
            if let Some(c) = converter {
                settings.converter = normalize_converter(&c);
            }
            if let Some(v) = remote_voice {
                settings.remote_voice = v;
            }
            if output_dir.is_some() {
                settings.output_dir = output_dir;
            }
            settings.normalize();
            if changed {
                save_settings(&settings_path, &settings)
                    .with_context(|| format!("writing {}", settings_path.display()))?;
                info!(path = %settings_path.display(), "settings saved");
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn list_profiles() -> Result<()> {
    for name in PRESET_NAMES {
        let profile = preset(name)?;
        println!("{}", serde_json::to_string(&profile)?);
    }
    for (name, id) in REMOTE_VOICES {
        println!("remote voice: {name} ({id})");
    }
    Ok(())
}

async fn run_live(settings: &AppSettings, profile: Option<String>, seconds: Option<f32>) -> Result<()> {
    let engine = Arc::new(VoxEngine::with_default_backend(
        settings.engine_config(),
        Arc::new(LocalGateway::new()),
    )?);
    let profile = profile
        .map(|p| normalize_preset(&p))
        .unwrap_or_else(|| settings.profile.clone());
    engine.set_profile_by_name(&profile)?;
    forward_status(&engine);

    engine.start_streaming().context("starting live stream")?;
    println!("live: profile '{profile}', Ctrl-C to stop");
    wait_for_stop(seconds).await;
    if let Err(e) = engine.stop_streaming() {
        // A device fault already closed the stream.
        warn!(error = %e, "stream was not running at stop");
    }
    info!(diagnostics = ?engine.diagnostics_snapshot(), "live session ended");
    Ok(())
}

async fn run_record(settings: &AppSettings, seconds: Option<f32>) -> Result<()> {
    let gateway = gateway_for(settings);
    let engine = Arc::new(VoxEngine::with_default_backend(settings.engine_config(), gateway)?);
    forward_status(&engine);

    engine.start_recording().context("starting recording")?;
    println!("recording, Ctrl-C to stop");
    wait_for_stop(seconds).await;
    let Some(recording) = engine.stop_recording()? else {
        bail!("nothing was captured");
    };
    println!(
        "captured {:.2}s at {} Hz",
        recording.duration_secs(),
        recording.sample_rate()
    );

    let selector = selector_for(settings);
    let report = match engine
        .request_conversion(recording, selector.clone())?
        .outcome()
        .await
    {
        TaskOutcome::Completed(report) => report,
        TaskOutcome::Stale => bail!("conversion was superseded"),
        TaskOutcome::Lost => bail!("conversion worker stopped unexpectedly"),
    };
    let converted = match report.result {
        Ok(buffer) => buffer,
        Err(e) => {
            let dir = storage::output_dir(settings);
            let kept = storage::save_converted(&dir, "original", &report.source)?;
            bail!("{e} (original kept at {})", kept.display());
        }
    };

    let dir = storage::output_dir(settings);
    let path = storage::save_converted(&dir, &selector.label(), &converted)?;
    println!("saved {}", path.display());

    if settings.play_converted {
        match engine.playback(converted)?.outcome().await {
            TaskOutcome::Completed(result) => {
                if let PlaybackEnd::TimedOut { played, total } = result? {
                    warn!(played, total, "output device stalled during playback");
                }
            }
            TaskOutcome::Stale | TaskOutcome::Lost => warn!("playback interrupted"),
        }
    }
    engine.shutdown();
    Ok(())
}

fn run_convert(input: &std::path::Path, profile: &str, dir: &std::path::Path) -> Result<()> {
    let source = wav::read_wav(input).with_context(|| format!("reading {}", input.display()))?;
    let selector = VoiceSelector::Preset {
        name: profile.to_string(),
    };
    let converted = LocalGateway::new().convert(&source, &selector)?;
    let path = storage::save_converted(dir, profile, &converted)?;
    println!(
        "converted {} ({:.2}s) with '{profile}' → {}",
        input.display(),
        converted.duration_secs(),
        path.display()
    );
    Ok(())
}

fn gateway_for(settings: &AppSettings) -> Arc<dyn ConversionGateway> {
    if settings.converter == "remote" {
        Arc::new(RemoteGateway::new(RemoteGatewayConfig::from_env()))
    } else {
        Arc::new(LocalGateway::new())
    }
}

fn selector_for(settings: &AppSettings) -> VoiceSelector {
    if settings.converter == "remote" {
        let voice_id = voice_id_for(&settings.remote_voice)
            .map(str::to_string)
            .unwrap_or_else(|| settings.remote_voice.clone());
        VoiceSelector::Voice {
            voice_id,
            model_id: settings.remote_model.clone(),
        }
    } else {
        VoiceSelector::Preset {
            name: settings.profile.clone(),
        }
    }
}

/// Log status changes, most importantly forced `Idle` after a device fault.
fn forward_status(engine: &Arc<VoxEngine>) {
    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => match event.detail {
                    Some(detail) => warn!(status = ?event.status, %detail, "engine status"),
                    None => info!(status = ?event.status, "engine status"),
                },
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "status events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn wait_for_stop(seconds: Option<f32>) {
    let limit = seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f32);
    match limit {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
            }
        }
    }
}

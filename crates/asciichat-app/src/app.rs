use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use asciichat_app::{CallOrchestrator, CallOutcome, SessionStore, StdinPrompt};
#[cfg(feature = "device-capture")]
use asciichat_capture::DeviceCapture;
#[cfg(not(feature = "device-capture"))]
use asciichat_capture::SyntheticCapture;
use asciichat_capture::{FileCapture, SessionCapture};
use asciichat_core::{CallConfig, Identity};
use asciichat_directory::{Directory, GithubConfig, GithubDirectory, JsonFileDirectory};
use asciichat_playback::{default_audio_output, NullRenderer, PlaybackClock, Renderer, TerminalRenderer};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

/// Exit code of a call attempt that ended without media (rejected or failed).
const CALL_FAILED: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "asciichat", version, about = "Point-to-point ASCII webcam calls")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides on top of defaults and `ASCIICHAT_*` variables.
#[derive(Args, Debug)]
pub struct Settings {
    /// TCP port for signaling and transfer
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Target playback duration in seconds
    #[arg(long, global = true)]
    pub playback_secs: Option<f64>,

    /// Capture duration in seconds
    #[arg(long, global = true)]
    pub capture_secs: Option<f64>,

    /// Columns of the glyph grid
    #[arg(long, global = true)]
    pub grid_width: Option<u16>,

    /// Local JSON directory file [env: ASCIICHAT_DIRECTORY]
    #[arg(long, global = true)]
    pub directory: Option<PathBuf>,

    /// GitHub repository (owner/name) holding directory.json; needs GITHUB_TOKEN
    /// [env: ASCIICHAT_GITHUB_REPO]
    #[arg(long, global = true)]
    pub github_repo: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for an incoming call and play what the caller sends
    ///
    /// Audio is only audible in builds with the `device-audio` feature;
    /// otherwise playback keeps its timing but stays silent.
    Wait {
        /// Answer calls until interrupted instead of stopping after one
        #[arg(long)]
        keep_listening: bool,
        /// Discard frames instead of drawing them
        #[arg(long)]
        headless: bool,
    },
    /// Call a peer by handle
    Call {
        handle: String,
        /// Send a stored session instead of capturing one
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Capture a session, store it, and play it locally
    Record {
        #[arg(long)]
        headless: bool,
    },
    /// Play the last recorded session
    Replay {
        #[arg(long)]
        headless: bool,
    },
    /// Register this machine's handle at ADDRESS
    Register { address: String },
    /// Add or update any handle
    Add { handle: String, address: String },
    /// Show the address registered for a handle
    Lookup { handle: String },
    /// Show this machine's handle
    Whoami,
}

impl Settings {
    fn call_config(&self) -> Result<CallConfig> {
        let mut config = CallConfig::from_env().context("reading ASCIICHAT_* environment")?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.playback_secs {
            config.playback_duration_secs = secs;
        }
        if let Some(secs) = self.capture_secs {
            config.capture_duration_secs = secs;
        }
        if let Some(width) = self.grid_width {
            config.grid_width = width;
        }
        config.validate().context("invalid settings")?;
        Ok(config)
    }

    fn directory(&self) -> Result<Arc<dyn Directory>> {
        let repo = self.github_repo.clone().or_else(|| std::env::var("ASCIICHAT_GITHUB_REPO").ok());
        if let Some(repo) = repo {
            let config = GithubConfig::from_env(&repo).context("GitHub directory")?;
            info!("Using GitHub directory {}", repo);
            return Ok(Arc::new(GithubDirectory::new(config)?));
        }

        let path = match self.directory.clone().or_else(|| std::env::var_os("ASCIICHAT_DIRECTORY").map(PathBuf::from)) {
            Some(path) => path,
            None => SessionStore::default_dir()?.join("directory.json"),
        };
        info!("Using directory file {}", path.display());
        Ok(Arc::new(JsonFileDirectory::new(path)))
    }
}

pub async fn run(cli: Cli) -> Result<i32> {
    let config = cli.settings.call_config()?;

    match cli.command {
        Command::Wait { keep_listening, headless } => wait(config, &cli.settings, keep_listening, headless).await,
        Command::Call { handle, from_file } => call(config, &cli.settings, &handle, from_file).await,
        Command::Record { headless } => record(config, headless).await,
        Command::Replay { headless } => replay(config, headless).await,
        Command::Register { address } => {
            let identity = identity()?;
            cli.settings.directory()?.register(&identity.handle, &address).await?;
            println!("Registered {} -> {}", identity.handle, address);
            Ok(0)
        }
        Command::Add { handle, address } => {
            cli.settings.directory()?.register(&handle, &address).await?;
            println!("Registered {} -> {}", handle, address);
            Ok(0)
        }
        Command::Lookup { handle } => match cli.settings.directory()?.lookup(&handle).await? {
            Some(address) => {
                println!("{handle}: {address}");
                Ok(0)
            }
            None => {
                warn!("Peer {} not found in directory", handle);
                Ok(CALL_FAILED)
            }
        },
        Command::Whoami => {
            let path = Identity::default_path()?;
            let identity = identity()?;
            println!("{} ({})", identity.handle, path.display());
            Ok(0)
        }
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

fn orchestrator(config: CallConfig, directory: Arc<dyn Directory>, capture: Arc<dyn SessionCapture>) -> CallOrchestrator {
    CallOrchestrator::new(config, directory, capture, Arc::new(StdinPrompt), default_audio_output())
}

#[cfg(feature = "device-capture")]
fn capture_source(_config: &CallConfig) -> Arc<dyn SessionCapture> {
    Arc::new(DeviceCapture::default())
}

#[cfg(not(feature = "device-capture"))]
fn capture_source(config: &CallConfig) -> Arc<dyn SessionCapture> {
    warn!("Built without `device-capture`: sending a synthetic test pattern and tone");
    Arc::new(SyntheticCapture::default().with_sample_rate(config.audio_sample_rate))
}

fn renderer(headless: bool) -> Box<dyn Renderer> {
    if headless || !std::io::stdout().is_terminal() {
        Box::new(NullRenderer::default())
    } else {
        Box::new(TerminalRenderer::new())
    }
}

async fn wait(config: CallConfig, settings: &Settings, keep_listening: bool, headless: bool) -> Result<i32> {
    let identity = identity()?;
    info!("Waiting for calls to {} on port {}", identity.handle, config.port);
    let capture = capture_source(&config);
    let mut orchestrator = orchestrator(config, settings.directory()?, capture);

    loop {
        let mut renderer = renderer(headless);
        let code = match orchestrator.answer_call(renderer.as_mut()).await {
            Ok(outcome) => report(&outcome),
            Err(e) if e.is_fatal() => bail!("cannot receive calls: {}", e),
            Err(e) => {
                error!("Call failed: {}", e);
                CALL_FAILED
            }
        };
        if !keep_listening {
            return Ok(code);
        }
    }
}

async fn call(config: CallConfig, settings: &Settings, handle: &str, from_file: Option<PathBuf>) -> Result<i32> {
    let identity = identity()?;
    info!("Calling {} as {}", handle, identity.handle);
    let capture: Arc<dyn SessionCapture> = match from_file {
        Some(path) => Arc::new(FileCapture::new(path)),
        None => capture_source(&config),
    };
    let mut orchestrator = orchestrator(config, settings.directory()?, capture);
    match orchestrator.place_call(handle).await {
        Ok(outcome) => Ok(report(&outcome)),
        Err(e) => {
            error!("Call failed: {}", e);
            Ok(CALL_FAILED)
        }
    }
}

fn report(outcome: &CallOutcome) -> i32 {
    match outcome {
        CallOutcome::Delivered { peer, frames, payload_bytes } => {
            println!("Sent {frames} frames ({payload_bytes} bytes) to {peer}");
            0
        }
        CallOutcome::Played { peer, report } => {
            println!(
                "Played {}/{} frames from {} in {:.2}s",
                report.frames_presented,
                report.frames_total,
                peer,
                report.total_elapsed.as_secs_f64()
            );
            0
        }
        CallOutcome::Rejected => {
            println!("Call rejected");
            CALL_FAILED
        }
    }
}

// ── Local record / replay ─────────────────────────────────────────────────────

async fn record(config: CallConfig, headless: bool) -> Result<i32> {
    let capture = capture_source(&config);
    capture.probe().await.context("capture device")?;
    let session = capture
        .capture(config.capture_duration(), config.grid_width)
        .await
        .context("capturing")?;

    let store = SessionStore::new(SessionStore::default_dir()?);
    let to_store = session.clone();
    tokio::task::spawn_blocking(move || store.save(&to_store)).await??;
    play_locally(&config, session, headless).await
}

async fn replay(config: CallConfig, headless: bool) -> Result<i32> {
    let store = SessionStore::new(SessionStore::default_dir()?);
    let session = tokio::task::spawn_blocking(move || store.load()).await??;
    play_locally(&config, session, headless).await
}

async fn play_locally(config: &CallConfig, session: asciichat_core::Session, headless: bool) -> Result<i32> {
    let clock = PlaybackClock::new(config.playback_duration())?;
    let mut renderer = renderer(headless);
    let report = clock.play(session, renderer.as_mut(), default_audio_output()).await?;
    println!(
        "Played {}/{} frames in {:.2}s",
        report.frames_presented,
        report.frames_total,
        report.total_elapsed.as_secs_f64()
    );
    Ok(0)
}

// ── Identity ──────────────────────────────────────────────────────────────────

fn identity() -> Result<Identity> {
    let path = Identity::default_path()?;
    let identity = Identity::load_or_create(&path, || {
        print!("Enter your unique handle (e.g., jd421_5211): ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .with_context(|| format!("identity at {}", path.display()))?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn wait_help_mentions_silent_builds() {
        let cli = Cli::command();
        let wait = cli.find_subcommand("wait").unwrap();
        let help = wait.get_long_about().unwrap().to_string();
        assert!(help.contains("device-audio"), "{help}");
    }

    #[test]
    fn settings_override_config() {
        let cli = Cli::parse_from(["asciichat", "--port", "6000", "--grid-width", "80", "wait", "--headless"]);
        let config = cli.settings.call_config().unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.grid_width, 80);
        assert!(matches!(cli.command, Command::Wait { headless: true, keep_listening: false }));
    }
}

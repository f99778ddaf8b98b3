//! x11nest - headless X11 compositor and window capture
//!
//! Starts a private Xvfb, optionally launches a client on it, and keeps
//! RGBA copies of every top-level window.
//!
//! ```text
//! x11nest run --exec xterm              → logs windows as they come and go
//! x11nest snapshot --exec xclock -o out → out/window-1-164x164.rgba.zst
//! x11nest view --exec xterm             → interactive view of the window
//! ```

mod view;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use x11nest::{Compositor, SessionConfig, WindowId};

#[derive(Parser)]
#[command(name = "x11nest")]
#[command(about = "Headless X11 compositor with window capture and input injection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session and log windows as they appear and close
    Run {
        #[command(flatten)]
        session: SessionConfig,

        /// Client command to start on the nested display
        #[arg(short, long)]
        exec: Option<String>,

        /// Pump rate (ticks per second)
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },

    /// Capture every window after a number of ticks
    /// Writes zstd-compressed RGBA, one file per window
    Snapshot {
        #[command(flatten)]
        session: SessionConfig,

        /// Client command to start on the nested display
        #[arg(short, long)]
        exec: Option<String>,

        /// Ticks to pump before writing
        #[arg(long, default_value_t = 60)]
        ticks: u32,

        /// Pump rate (ticks per second)
        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Show one window and forward mouse and keyboard into it
    View {
        #[command(flatten)]
        session: SessionConfig,

        /// Client command to start on the nested display
        #[arg(short, long)]
        exec: Option<String>,

        /// Window id to show (defaults to the first mapped window)
        #[arg(short, long)]
        window: Option<WindowId>,

        /// Pump and redraw rate
        #[arg(long, default_value_t = 60)]
        fps: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("x11nest=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { session, exec, fps } => run(session, exec.as_deref(), fps).await,
        Commands::Snapshot {
            session,
            exec,
            ticks,
            fps,
            out,
        } => run_snapshot(session, exec.as_deref(), ticks, fps, &out).await,
        Commands::View {
            session,
            exec,
            window,
            fps,
        } => {
            let mut compositor = start(session)?;
            let client = spawn_optional(exec.as_deref(), &compositor)?;
            // minifb and the pump loop block; keep them off the async workers
            let result =
                tokio::task::block_in_place(|| view::run_view(&mut compositor, window, fps));
            stop_client(client);
            compositor.cleanup();
            result
        }
    }
}

async fn run(session: SessionConfig, exec: Option<&str>, fps: u32) -> Result<()> {
    let mut compositor = start(session)?;
    let client = spawn_optional(exec, &compositor)?;
    println!("DISPLAY={}", compositor.display_name());

    let mut interval = tokio::time::interval(tick_period(fps)?);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut known: BTreeSet<WindowId> = BTreeSet::new();
    let mut last_tick = Instant::now();
    let result = loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("interrupted");
                break Ok(());
            }
        }

        let now = Instant::now();
        compositor.pump((now - last_tick).as_secs_f64());
        last_tick = now;
        if !compositor.is_initialized() {
            break Err(anyhow::anyhow!("display session was lost"));
        }

        let ids = compositor.window_ids();
        for &id in ids.difference(&known) {
            info!("window {} appeared: {}", id, describe(&compositor, id));
        }
        for id in known.difference(&ids) {
            info!("window {} closed", id);
        }
        known = ids;
    };

    stop_client(client);
    compositor.cleanup();
    result
}

async fn run_snapshot(
    session: SessionConfig,
    exec: Option<&str>,
    ticks: u32,
    fps: u32,
    out: &Path,
) -> Result<()> {
    let mut compositor = start(session)?;
    let client = spawn_optional(exec, &compositor)?;

    let period = tick_period(fps)?;
    let mut interval = tokio::time::interval(period);
    for _ in 0..ticks {
        interval.tick().await;
        compositor.pump(period.as_secs_f64());
    }

    let result = write_snapshots(&compositor, out);
    stop_client(client);
    compositor.cleanup();
    let written = result?;
    info!("wrote {} window images to {}", written, out.display());
    Ok(())
}

fn write_snapshots(compositor: &Compositor, out: &Path) -> Result<usize> {
    if !compositor.is_initialized() {
        bail!("display session was lost");
    }
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;

    let mut written = 0;
    for id in compositor.window_ids() {
        let Some(frame) = compositor.window_buffer(id) else {
            warn!("window {} has no image yet", id);
            continue;
        };
        let compressed = zstd::encode_all(&frame.data[..], 1)?;
        let path = out.join(format!(
            "window-{}-{}x{}.rgba.zst",
            id, frame.width, frame.height
        ));
        fs::write(&path, &compressed)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(
            "window {} {}: {} -> {} bytes",
            id,
            describe(compositor, id),
            frame.data.len(),
            compressed.len()
        );
        written += 1;
    }
    Ok(written)
}

fn start(session: SessionConfig) -> Result<Compositor> {
    let mut compositor = Compositor::new(session);
    if !compositor.initialize() {
        bail!("failed to start display session");
    }
    Ok(compositor)
}

fn tick_period(fps: u32) -> Result<Duration> {
    if fps == 0 {
        bail!("fps must be positive");
    }
    Ok(Duration::from_secs(1) / fps)
}

fn describe(compositor: &Compositor, id: WindowId) -> String {
    let (w, h) = compositor.window_size(id).unwrap_or_default();
    let mut text = format!(
        "{:?} class={:?} {}x{}",
        compositor.window_title(id).unwrap_or_default(),
        compositor.window_class(id).unwrap_or_default(),
        w,
        h
    );
    if let Some(pid) = compositor.window_pid(id) {
        text.push_str(&format!(" pid={}", pid));
    }
    if let Some(parent) = compositor.parent_window_id(id) {
        text.push_str(&format!(" transient-for={}", parent));
    }
    text
}

fn spawn_optional(exec: Option<&str>, compositor: &Compositor) -> Result<Option<Child>> {
    exec.map(|cmd| spawn_client(cmd, &compositor.display_name()))
        .transpose()
}

/// Start a client through the shell with DISPLAY pointing at the session
fn spawn_client(cmd: &str, display_name: &str) -> Result<Child> {
    info!("starting client on {}: {}", display_name, cmd);
    Command::new("sh")
        .arg("-c")
        .arg(format!("exec {}", cmd))
        .env("DISPLAY", display_name)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start {:?}", cmd))
}

fn stop_client(client: Option<Child>) {
    let Some(mut child) = client else {
        return;
    };
    if let Ok(None) = child.try_wait() {
        let _ = child.kill();
    }
    let _ = child.wait();
}

//! Command-line adapter: one shaping session, running until interrupted.
//!
//! ```text
//! shaper --port 3389 --latency-ms 50 --jitter-ms 5 --loss-percent 2
//! shaper --config rdp-degraded.toml
//! ```
//!
//! Requires administrator privileges and the WinDivert driver.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use shaper::{Direction, Protocol, ShapingSession};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shaper", version, about = "Shape live traffic: latency, jitter, loss, rate caps")]
struct Args {
    /// Fixed added latency in milliseconds.
    #[arg(long, default_value_t = 0.0)]
    latency_ms: f64,

    /// Upper bound of the uniform per-packet jitter in milliseconds.
    #[arg(long, default_value_t = 0.0)]
    jitter_ms: f64,

    /// Packet loss rate in percent (0 never drops, 100 always drops).
    #[arg(long, default_value_t = 0.0)]
    loss_percent: f64,

    /// Throughput cap in bytes per second (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    max_bytes_per_second: u64,

    /// Traffic direction to intercept: inbound, outbound or both.
    #[arg(long, default_value = "both")]
    direction: Direction,

    /// Transport protocol to intercept: tcp, udp or any.
    #[arg(long, default_value = "any")]
    protocol: Protocol,

    /// Restrict interception to one port (source or destination).
    #[arg(long)]
    port: Option<u16>,

    /// Load the session from a TOML key-value document instead of flags.
    #[arg(long, conflicts_with_all = ["latency_ms", "jitter_ms", "loss_percent", "max_bytes_per_second", "direction", "protocol", "port"])]
    config: Option<PathBuf>,
}

impl Args {
    fn session(&self) -> Result<ShapingSession, String> {
        let session = match &self.config {
            Some(path) => {
                let doc = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
                toml::from_str(&doc).map_err(|e| format!("invalid session document: {e}"))?
            }
            None => {
                let mut session = ShapingSession::new()
                    .latency_ms(self.latency_ms)
                    .jitter_ms(self.jitter_ms)
                    .loss_percent(self.loss_percent)
                    .max_bytes_per_second(self.max_bytes_per_second)
                    .direction(self.direction)
                    .protocol(self.protocol);
                if let Some(port) = self.port {
                    session = session.port(port);
                }
                session
            }
        };
        session.validate().map_err(|e| e.to_string())?;
        Ok(session)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let session = match args.session() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    run(session).await
}

#[cfg(windows)]
async fn run(session: ShapingSession) -> ExitCode {
    use shaper::{DivertSourceProvider, SessionEvent, Shaper};

    let mut shaper = Shaper::new(DivertSourceProvider::new());
    let mut events = shaper.events().expect("events taken once");

    if let Err(e) = shaper.start(session).await {
        eprintln!("error: failed to start session: {e}");
        return ExitCode::FAILURE;
    }

    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Started { filter } => tracing::info!(filter, "session started"),
                SessionEvent::Stopped => tracing::info!("session stopped"),
                SessionEvent::QueueOverflow { shed_total } => {
                    tracing::warn!(shed_total, "delay queue overflow")
                }
                SessionEvent::SendFailure { error } => tracing::warn!(error, "send failure"),
                SessionEvent::CaptureError { error } => {
                    tracing::error!(error, "fatal capture error");
                    return false;
                }
            }
        }
        true
    });

    tracing::info!("shaping, press Ctrl+C to stop");
    let clean = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        clean = event_log => clean.unwrap_or(false),
    };

    if let Err(e) = shaper.stop().await {
        eprintln!("error: teardown failed: {e}");
        return ExitCode::FAILURE;
    }

    let stats = shaper.stats();
    tracing::info!(
        captured = stats.captured(),
        passed = stats.passed(),
        released = stats.released(),
        drained = stats.drained(),
        dropped_by_loss = stats.dropped_by_loss(),
        overflow_dropped = stats.overflow_dropped(),
        "final counters"
    );

    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(not(windows))]
async fn run(_session: ShapingSession) -> ExitCode {
    eprintln!("error: packet interception requires Windows and the WinDivert driver");
    ExitCode::from(2)
}

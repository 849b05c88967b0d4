//! NextGCore SGSN (Serving GPRS Support Node)
//!
//! Packet switched core node for 2G/3G access:
//! - Gb interface: LLC/SNDCP towards the GERAN
//! - Iu interface: RANAP towards the UTRAN
//! - Gn/Gp interface: GTP towards the GGSN
//!
//! This binary hosts the mobility and session registries, their state
//! machines and the timers driving them.

use anyhow::{Context as _, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod apn;
pub mod attach_req_sm;
pub mod config;
pub mod context;
pub mod error;
pub mod gmm_handler;
pub mod gmm_sm;
pub mod gtp_path;
pub mod llc_path;
pub mod llme;
pub mod metrics;
pub mod mm_state_sm;
pub mod nas_path;
pub mod ptmsi;
pub mod session;
pub mod signal;
pub mod sm;
pub mod subscriber;
pub mod timer;

#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod test_support;

use config::SgsnConfig;
use context::{SgsnContext, SgsnPaths};

/// NextGCore SGSN - Serving GPRS Support Node
#[derive(Parser, Debug)]
#[command(name = "nextgcore-sgsnd")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "GPRS/UMTS Serving GPRS Support Node")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nextgcore/sgsn.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(long)]
    no_color: bool,

    /// Run in daemon mode
    #[arg(short, long)]
    daemon: bool,
}

/// SGSN application state
pub struct SgsnApp {
    /// Running flag
    running: Arc<AtomicBool>,
    /// Core context, present once initialized
    ctx: Option<SgsnContext>,
    /// Reference point of the monotonic clock handed to the core
    started: Instant,
}

impl SgsnApp {
    /// Create a new SGSN application
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            ctx: None,
            started: Instant::now(),
        }
    }

    /// Initialize the SGSN application
    pub fn init(&mut self, config_path: &str) -> Result<()> {
        log::info!("Initializing SGSN...");

        let config = if std::path::Path::new(config_path).exists() {
            SgsnConfig::from_file(config_path)
                .with_context(|| format!("loading configuration from {config_path}"))?
        } else {
            log::warn!("Configuration file {config_path} not found, using defaults");
            SgsnConfig::default()
        };
        self.init_with_config(config);
        Ok(())
    }

    /// Initialize from an already loaded configuration
    pub fn init_with_config(&mut self, config: SgsnConfig) {
        let mut ctx = SgsnContext::new(config, SgsnPaths::default());
        ctx.start();
        self.ctx = Some(ctx);
        self.started = Instant::now();
        log::info!("SGSN initialized successfully");
    }

    /// Run the SGSN main loop
    pub fn run(&mut self) -> Result<()> {
        log::info!("SGSN running...");

        while self.running.load(Ordering::SeqCst) {
            self.process_timers();
            std::thread::sleep(Duration::from_millis(100));
        }

        log::info!("SGSN main loop exited");
        Ok(())
    }

    /// Monotonic seconds handed to the core, starting at 1 since 0 marks an
    /// untouched LLME
    fn now_secs(&self) -> i64 {
        self.started.elapsed().as_secs() as i64 + 1
    }

    /// Fire expired timers into the core
    fn process_timers(&mut self) {
        let now_secs = self.now_secs();
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        for timer_id in ctx.timers.check_expired() {
            log::debug!("Timer expired: {timer_id}");
            ctx.timer_expired(timer_id, now_secs);
        }
    }

    /// Core context
    pub fn context(&mut self) -> Option<&mut SgsnContext> {
        self.ctx.as_mut()
    }

    /// Shutdown the SGSN application
    pub fn shutdown(&mut self) {
        log::info!("Shutting down SGSN...");
        if let Some(mut ctx) = self.ctx.take() {
            ctx.fini();
        }
        log::info!("SGSN shutdown complete");
    }

    /// Signal the application to stop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get the running flag for signal handlers
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

impl Default for SgsnApp {
    fn default() -> Self {
        Self::new()
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let write_style = if args.no_color {
        env_logger::WriteStyle::Never
    } else {
        env_logger::WriteStyle::Auto
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .write_style(write_style)
        .format_timestamp_millis()
        .init();

    log::info!("NextGCore SGSN v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration: {}", args.config);
    if args.daemon {
        log::warn!("Daemon mode is not supported, running in foreground");
    }

    let mut app = SgsnApp::new();

    let running = app.running_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    app.init(&args.config)?;
    app.run()?;
    app.shutdown();

    log::info!("NextGCore SGSN terminated");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::SgsnTimerId;

    #[test]
    fn test_sgsn_app_creation() {
        let app = SgsnApp::new();
        assert!(app.running.load(Ordering::SeqCst));
        assert!(app.ctx.is_none());
    }

    #[test]
    fn test_sgsn_app_running_flag() {
        let app = SgsnApp::new();
        let flag = app.running_flag();
        assert!(flag.load(Ordering::SeqCst));
        app.stop();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sgsn_app_init_missing_config() {
        let mut app = SgsnApp::new();
        app.init("/nonexistent/sgsn.yaml").unwrap();
        let ctx = app.context().unwrap();
        assert!(ctx.timers.is_pending(SgsnTimerId::LlmeCheck));
        app.shutdown();
        assert!(app.context().is_none());
    }

    #[test]
    fn test_sgsn_app_timers() {
        let mut app = SgsnApp::new();
        let mut config = SgsnConfig::default();
        config.timers.llme_check_tick = 3600;
        app.init_with_config(config);

        let ctx = app.context().unwrap();
        let tlli = 0xc000_0001;
        let llme = ctx.llme_alloc(tlli);
        ctx.timers.start(SgsnTimerId::LlmeCheck, Duration::ZERO);
        app.process_timers();

        // First sweep only stamps the entry and re-arms
        let ctx = app.context().unwrap();
        assert!(ctx.llme(llme).is_some());
        assert!(ctx.timers.is_pending(SgsnTimerId::LlmeCheck));
    }

    #[test]
    fn test_sgsn_app_llme_touched_at_startup() {
        let mut app = SgsnApp::new();
        app.init_with_config(SgsnConfig::default());
        let now = app.now_secs();
        assert_ne!(now, crate::context::GPRS_LLME_RESET_AGE);

        let ctx = app.context().unwrap();
        let llme = ctx.llme_alloc(0xc000_0001);
        ctx.llme_touch(llme, now);
        ctx.timers.start(SgsnTimerId::LlmeCheck, Duration::ZERO);
        app.process_timers();

        let ctx = app.context().unwrap();
        assert_eq!(ctx.llme(llme).unwrap().age_timestamp, now);
    }
}

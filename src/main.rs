//! Binary entrypoint for the relaybot send-control daemon.
//!
//! Commands:
//! - `run [--daemon] [--pid-file <path>]` - start the scheduler/orchestrator
//!   pipeline in the foreground, or detached as a background daemon
//! - `status [--pid-file <path>]` - report whether a daemonized instance is
//!   currently running
//! - `validate-config` - load and validate the config file, then exit
//!
//! ## Daemon Mode (Linux/macOS)
//!
//! Run with `--daemon` to background the process. Features:
//! - Custom fork-based implementation (no external dependencies)
//! - PID file management
//! - TTY-aware logging (file-only in daemon, console+file in foreground)
//! - Graceful shutdown on SIGINT/SIGTERM via a broadcast channel
//!
//! See the library crate docs for module-level details: `relaybot::`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use relaybot::adapters::Sender;
use relaybot::config::Config;
use relaybot::core::clock::{Clock, SystemClock};
use relaybot::core::coalesce::{CoalesceConfig, CoalesceQueue};
use relaybot::core::cooldown::CooldownGate;
use relaybot::core::dedupe::DedupeDetector;
use relaybot::core::orchestrator::Orchestrator;
use relaybot::core::permit::PermitGate;
use relaybot::core::retry::{RetryConfig, RetryPolicy};
use relaybot::core::scheduler::Scheduler;
use relaybot::logutil::StructuredLogSink;
use relaybot::metrics::Aggregator;
use relaybot::producers::registry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "A platform-agnostic autonomous posting bot's send-control core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the send-control pipeline
    Run {
        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode and `status`)
        #[arg(long, default_value = "/tmp/relaybot.pid")]
        pid_file: String,
    },
    /// Report whether a daemonized instance is currently running
    Status {
        #[arg(long, default_value = "/tmp/relaybot.pid")]
        pid_file: String,
    },
    /// Load and validate the config file without starting anything
    ValidateConfig,
}

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    match &cli.command {
        Commands::ValidateConfig => {
            init_logging(None, cli.verbose);
            match Config::load(&cli.config).await {
                Ok(_) => {
                    println!("{} is valid", cli.config);
                    0
                }
                Err(e) => {
                    eprintln!("invalid config: {e:?}");
                    2
                }
            }
        }
        Commands::Status { pid_file } => {
            init_logging(None, cli.verbose);
            report_status(pid_file)
        }
        Commands::Run { daemon, pid_file } => {
            let config = match Config::load(&cli.config).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("invalid config: {e:?}");
                    return 2;
                }
            };

            #[cfg(all(unix, feature = "daemon"))]
            if *daemon {
                if let Err(e) = daemonize_process(&config, pid_file) {
                    eprintln!("failed to daemonize: {e:?}");
                    return 1;
                }
            }
            #[cfg(not(all(unix, feature = "daemon")))]
            if *daemon {
                eprintln!("Error: daemon mode requires Unix platform and the 'daemon' feature.");
                eprintln!("Compile with: cargo build --features daemon");
                return 1;
            }

            init_logging(Some(&config), cli.verbose);
            info!("starting relaybot v{}", env!("CARGO_PKG_VERSION"));

            match start_pipeline(config).await {
                Ok(()) => 0,
                Err(e) => {
                    error!("startup failed: {e:?}");
                    1
                }
            }
        }
    }
}

/// Wires up every component and runs until a shutdown signal arrives.
async fn start_pipeline(config: Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Aggregator::new());
    let audit_log = Arc::new(
        StructuredLogSink::open(config.logging.structured_file.as_deref())
            .unwrap_or_else(|e| {
                warn!("failed to open structured log sink, disabling it: {e}");
                StructuredLogSink::disabled()
            }),
    );

    let cooldown_configs = config
        .cooldown
        .jobs
        .iter()
        .map(|(job, section)| {
            (
                job.clone(),
                relaybot::core::cooldown::CooldownConfig {
                    base_window_seconds: section.base_window_seconds,
                    max_factor: section.max_factor,
                    growth: section.growth,
                },
            )
        })
        .collect();
    let cooldown = CooldownGate::new(config.cooldown.enabled, cooldown_configs);

    let dedupe = DedupeDetector::new(config.dedupe.enabled, config.dedupe.capacity, config.dedupe.ttl_seconds);

    let quota_configs = config
        .quotas
        .iter()
        .map(|(channel, section)| {
            (
                channel.clone(),
                relaybot::core::permit::QuotaConfig {
                    window_seconds: section.window_seconds,
                    max_events: section.max_events,
                },
            )
        })
        .collect();
    let permit = PermitGate::new(quota_configs);

    let retry = RetryPolicy::new(RetryConfig {
        max_attempts: config.retry.max_attempts,
        base_backoff_ms: config.retry.base_backoff_ms,
    });

    let senders = build_senders(&config)?;

    let orchestrator = Arc::new(Orchestrator::new(
        cooldown,
        dedupe,
        permit,
        retry,
        metrics.clone(),
        clock.clone(),
        senders,
        audit_log.clone(),
    ));

    let queue = Arc::new(CoalesceQueue::new(CoalesceConfig::default()));
    let scheduler_config = config.scheduler.to_core_config()?;
    let mut scheduler = Scheduler::new(
        scheduler_config,
        queue,
        orchestrator,
        metrics.clone(),
        clock.clone(),
        audit_log,
    );

    let dm_source = registry::default_dm_source();
    let factories = registry::build(&config, metrics, clock, dm_source)?;

    for job in config.scheduled_jobs()? {
        let factory = factories
            .get(&job.name)
            .ok_or_else(|| anyhow::anyhow!("jobs.{} has no providers.{} entry", job.name, job.name))?
            .clone();
        scheduler.register(job, factory);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    Arc::new(scheduler).spawn(shutdown_rx);

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");
    let _ = shutdown_tx.send(());
    Ok(())
}

fn build_senders(config: &Config) -> Result<HashMap<String, Arc<dyn Sender>>> {
    let mut senders: HashMap<String, Arc<dyn Sender>> = HashMap::new();

    #[cfg(feature = "discord")]
    if !config.discord.webhook_base_url.is_empty() {
        senders.insert(
            "discord".to_string(),
            Arc::new(relaybot::adapters::discord::DiscordSender::new(
                relaybot::adapters::discord::DiscordConfig {
                    webhook_base_url: config.discord.webhook_base_url.clone(),
                    timeout_seconds: config.discord.timeout_seconds,
                },
            )),
        );
    }

    #[cfg(feature = "misskey")]
    if !config.misskey.instance_base_url.is_empty() {
        senders.insert(
            "misskey".to_string(),
            Arc::new(relaybot::adapters::misskey::MisskeySender::new(
                relaybot::adapters::misskey::MisskeyConfig {
                    instance_base_url: config.misskey.instance_base_url.clone(),
                    api_token: config.misskey.api_token.clone(),
                    timeout_seconds: config.misskey.timeout_seconds,
                },
            )),
        );
    }

    if senders.is_empty() {
        warn!("no platform senders configured; scheduled sends will be dropped with a configuration_missing error");
    }

    Ok(senders)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn report_status(pid_file: &str) -> i32 {
    match std::fs::read_to_string(pid_file) {
        Ok(contents) => match contents.trim().parse::<i32>() {
            Ok(pid) if process_is_alive(pid) => {
                println!("relaybot is running (pid {pid})");
                0
            }
            Ok(pid) => {
                println!("pid file {pid_file} names pid {pid}, but it is not running");
                1
            }
            Err(_) => {
                eprintln!("pid file {pid_file} does not contain a valid pid");
                1
            }
        },
        Err(_) => {
            println!("relaybot is not running (no pid file at {pid_file})");
            1
        }
    }
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    false
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    if let Some(cfg) = config {
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(file) {
                let mutex = Arc::new(std::sync::Mutex::new(f));
                let is_tty = atty::is(atty::Stream::Stdout);

                builder.format(move |fmt, record| {
                    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                    let line = format!("{} [{}] {}", ts, record.level(), record.args());

                    if let Ok(mut guard) = mutex.lock() {
                        let _ = writeln!(guard, "{line}");
                    }

                    if is_tty {
                        writeln!(fmt, "{line}")
                    } else {
                        Ok(())
                    }
                });
                let _ = builder.try_init();
                return;
            }
        }
    }

    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}

/// Daemonize the process (Unix only): fork, write a PID file, redirect
/// stdout/stderr to the configured log file, and let the parent exit while
/// the child continues as the real daemon.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, pid_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::Command;

    let log_path = config.logging.file.as_deref().unwrap_or("relaybot.log");

    let current_exe = std::env::current_exe()?;
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--daemon" || arg == "-d") {
        args.remove(pos);
    }
    let child_args = &args[1..];

    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;

    let child = Command::new(&current_exe)
        .args(child_args)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}", child.id()))?;
    std::process::exit(0);
}

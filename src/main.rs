//! `sentinel` CLI: wires the library's pipeline together behind a handful of
//! subcommands. Subsystem wiring (sinks, source, store, detector engine)
//! lives here rather than in the library, since the concrete choice of
//! transport and file layout is a deployment concern, not core logic.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::error;

use sentinel::app::Runner;
use sentinel::config::{self, Config, OutputConfig};
use sentinel::enrollment::AlreadyJoined;
use sentinel::event::{self, SubjectType};
use sentinel::metrics::Metrics;
use sentinel::notify::{self, DiscordSink, Notifier, Sink, StdoutSink, WebhookSink};
use sentinel::output;
use sentinel::snapshot::Snapshot;
use sentinel::source::{
    AnySource, LocalApiFetcher, LocalApiWatcherFactory, PollSource, RealtimeConfig, RealtimeSource,
};
use sentinel::state::FileStore;
use sentinel::{diff, policy, version};

#[derive(Parser)]
#[command(name = "sentinel", version, about = "Overlay-network change detector and notifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the observe → diff → notify loop.
    Run {
        #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
        /// Run a single cycle and exit instead of looping.
        #[arg(long)]
        once: bool,
        /// Evaluate routing and record idempotency keys, but don't call sinks.
        #[arg(long)]
        dry_run: bool,
    },
    /// Diff two previously captured snapshot JSON files and print events.
    Diff {
        #[arg(long)]
        before: String,
        #[arg(long)]
        after: String,
    },
    /// Poll the configured source once and print the canonical snapshot.
    DumpNetmap {
        #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Print the last persisted snapshot summary from the state file.
    Status {
        #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Synthesize one event of the given type and route it through the
    /// configured notifier, to verify sink wiring without waiting for a
    /// real change.
    TestNotify {
        #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
        #[arg(long)]
        event_type: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate a config file.
    ValidateConfig {
        #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Print build/version metadata.
    Version,
}

fn init_logging(cfg: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(!cfg.no_color);
    if cfg.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &str) -> Result<Config, ExitCode> {
    config::load_config_from_path(std::path::Path::new(path)).map_err(|e| {
        eprintln!("FATAL: failed to load config '{path}': {e}");
        ExitCode::FAILURE
    })
}

fn build_sinks(cfg: &Config) -> Vec<Sink> {
    cfg.notifier
        .sinks
        .iter()
        .map(|s| match s.sink_type.to_lowercase().as_str() {
            "webhook" => Sink::Webhook(WebhookSink::new(&s.name, s.url.clone().unwrap_or_default())),
            "discord" => Sink::Discord(DiscordSink::new(&s.name, s.url.clone().unwrap_or_default())),
            _ => Sink::Stdout(StdoutSink::new(&s.name)),
        })
        .collect()
}

fn build_source(cfg: &Config) -> AnySource {
    if cfg.source.mode.eq_ignore_ascii_case("poll") {
        AnySource::Poll(PollSource::new(LocalApiFetcher::new(cfg.source.base_url.clone())))
    } else {
        let realtime_cfg = RealtimeConfig { reconnect_min: cfg.source.reconnect_min, reconnect_max: cfg.source.reconnect_max };
        AnySource::Realtime(RealtimeSource::new(LocalApiWatcherFactory::new(cfg.source.base_url.clone()), realtime_cfg))
    }
}

fn build_notifier(cfg: &Config, store: Arc<FileStore>) -> Notifier {
    Notifier::new(
        notify::Config { routes: cfg.notifier.routes.clone(), idempotency_key_ttl: cfg.notifier.idempotency_key_ttl },
        store,
        build_sinks(cfg),
    )
}

async fn run_cmd(config_path: &str, once: bool, dry_run: bool) -> ExitCode {
    let cfg = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&cfg.output);

    let store = Arc::new(FileStore::new(cfg.state.path.clone()));
    let metrics = match Metrics::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            eprintln!("FATAL: failed to register metrics: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut runner = Runner::new(
        cfg.clone(),
        build_source(&cfg),
        diff::Engine::standard(),
        policy::Engine::new(cfg.policy.clone()),
        build_notifier(&cfg, store.clone()),
        store,
        AlreadyJoined::new("local", hostname()),
        metrics,
    );

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_for_signal.cancel();
    });

    match runner.run(&cancel, once, dry_run).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sentinel exited with error");
            ExitCode::FAILURE
        }
    }
}

fn diff_cmd(before_path: &str, after_path: &str) -> ExitCode {
    let read_snapshot = |path: &str| -> Result<Snapshot, String> {
        let text = std::fs::read_to_string(path).map_err(|e| format!("reading '{path}': {e}"))?;
        serde_json::from_str(&text).map_err(|e| format!("parsing '{path}': {e}"))
    };
    let before = match read_snapshot(before_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("FATAL: {e}");
            return ExitCode::FAILURE;
        }
    };
    let after = match read_snapshot(after_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("FATAL: {e}");
            return ExitCode::FAILURE;
        }
    };

    let order: Vec<String> = config::DEFAULT_DETECTOR_ORDER.iter().map(|s| s.to_string()).collect();
    let enabled = order.iter().map(|n| (n.clone(), true)).collect();
    match diff::Engine::standard().diff(&before, &after, &order, &enabled, Utc::now()) {
        Ok(events) => {
            println!("{}", output::render_diff(&events, false));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("FATAL: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dump_netmap_cmd(config_path: &str) -> ExitCode {
    let cfg = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&cfg.output);

    let mut source = build_source(&cfg);
    let cancel = CancellationToken::new();
    match source.poll(&cancel).await {
        Ok(nm) => {
            let snap = sentinel::snapshot::normalize(&nm, Utc::now());
            match serde_json::to_string_pretty(&snap) {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("FATAL: serializing snapshot: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("FATAL: polling source: {e}");
            ExitCode::FAILURE
        }
    }
}

fn status_cmd(config_path: &str) -> ExitCode {
    let cfg = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = FileStore::new(cfg.state.path.clone());
    match store.load_snapshot() {
        Ok(s) => {
            println!("peers={} captured_at={} hash={}", s.peers.len(), s.captured_at.to_rfc3339(), s.hash);
            ExitCode::SUCCESS
        }
        Err(sentinel::state::StateError::NoSnapshot) => {
            println!("no snapshot persisted yet");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("FATAL: reading state file: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn test_notify_cmd(config_path: &str, event_type: &str, dry_run: bool) -> ExitCode {
    if !event::types::is_known(event_type) {
        eprintln!("FATAL: unknown event type {event_type:?}");
        return ExitCode::FAILURE;
    }
    let cfg = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&cfg.output);

    let store = Arc::new(FileStore::new(cfg.state.path.clone()));
    let notifier = build_notifier(&cfg, store);
    let now = Utc::now();
    let evt = event::new_event(
        event_type,
        "test-subject",
        SubjectType::Peer,
        "before-hash",
        "after-hash",
        Some(json!({"synthetic": true})),
        now,
    );

    let cancel = CancellationToken::new();
    match notifier.notify(&cancel, std::slice::from_ref(&evt), dry_run, now).await {
        Ok(result) => {
            println!("sent={} suppressed={} dry_run={}", result.sent, result.suppressed, result.dry_run);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("FATAL: notify failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_config_cmd(config_path: &str) -> ExitCode {
    match load_config(config_path) {
        Ok(_) => {
            println!("ok");
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

fn version_cmd() -> ExitCode {
    let m = version::metadata();
    println!("sentinel {} (build {}, commit {})", m.version, m.build_timestamp, m.commit_hash);
    ExitCode::SUCCESS
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, once, dry_run } => run_cmd(&config, once, dry_run).await,
        Commands::Diff { before, after } => diff_cmd(&before, &after),
        Commands::DumpNetmap { config } => dump_netmap_cmd(&config).await,
        Commands::Status { config } => status_cmd(&config),
        Commands::TestNotify { config, event_type, dry_run } => test_notify_cmd(&config, &event_type, dry_run).await,
        Commands::ValidateConfig { config } => validate_config_cmd(&config),
        Commands::Version => version_cmd(),
    }
}

use crate::{
    config::Config,
    library::MediaLibrary,
    model::{ImageId, RiskLevel, UserDecision},
    provider::{SearchProvider, TinEyeClient},
    recording::check_single_image,
    review,
    risk::default_policy,
    scheduler::{BulkChecker, CheckerSettings, RunLedger, Worker},
    store::{JsonFileStore, ResultStore},
    util::ensure_dir,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "image-guardian")]
#[command(about = "Quota-aware bulk copyright risk checks for media libraries")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./image-guardian.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show effective settings and the provider's remaining quota.
    Doctor {},
    /// Register the manifest's images so they become part of the backlog.
    Import {},
    Quota {},
    /// Check a single image right now.
    Check {
        #[arg(long)]
        image: u64,
    },
    Bulk {
        #[command(subcommand)]
        action: BulkAction,
    },
    /// Record a human review decision.
    Mark {
        #[arg(long)]
        image: u64,
        #[arg(long, value_enum)]
        decision: UserDecision,
    },
    /// Pin an image's risk tier. Omit --level to clear the override.
    Risk {
        #[arg(long)]
        image: u64,
        #[arg(long, value_enum)]
        level: Option<RiskLevel>,
    },
    Stats {},
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum BulkAction {
    /// Start a run and process it in the foreground.
    Start {
        /// Only enqueue; process later with `bulk resume`.
        #[arg(long)]
        detach: bool,
    },
    /// Continue a run left running by an earlier process.
    Resume {},
    Cancel {},
    Progress {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
    info!("config={}", cfg_path.display());

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg, &cfg_path),
        Command::Import {} => import(&cfg),
        Command::Quota {} => quota(&cfg),
        Command::Check { image } => check(&cfg, ImageId(*image)),
        Command::Bulk { action } => bulk(&cfg, action),
        Command::Mark { image, decision } => {
            let store = open_store(&cfg)?;
            review::mark(store.as_ref(), ImageId(*image), *decision)?;
            print_json(&serde_json::json!({"image": image, "decision": decision}))
        }
        Command::Risk { image, level } => {
            let store = open_store(&cfg)?;
            let library = MediaLibrary::load(&cfg)?;
            review::set_manual_risk(store.as_ref(), &library, ImageId(*image), *level)?;
            print_json(&serde_json::json!({"image": image, "manual_risk_level": level}))
        }
        Command::Stats {} => {
            let store = open_store(&cfg)?;
            print_json(&serde_json::json!({
                "risk": review::risk_stats(store.as_ref())?,
                "media": review::media_counts(store.as_ref())?,
            }))
        }
        Command::Recent { limit } => {
            let store = open_store(&cfg)?;
            print_json(&review::recent_checks(store.as_ref(), *limit)?)
        }
        Command::Cleanup { days } => {
            let store = open_store(&cfg)?;
            let days = days.unwrap_or(cfg.retention.cleanup_days);
            let removed = review::cleanup_old_checks(store.as_ref(), days)?;
            print_json(&serde_json::json!({"removed": removed, "days": days}))
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("image-guardian.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("image-guardian.example.toml"))
    }
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.log_dir).join("image-guardian.log"))
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output, so logs go to stderr.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(cfg: &Config) -> Result<Arc<JsonFileStore>> {
    let store = JsonFileStore::open(Path::new(&cfg.paths.store_path))?;
    debug!("store={}", store.path().display());
    Ok(Arc::new(store))
}

fn build_checker(cfg: &Config, store: Arc<JsonFileStore>) -> Result<Arc<BulkChecker>> {
    let provider = TinEyeClient::new(cfg)?;
    let library = MediaLibrary::load(cfg)?;
    Ok(Arc::new(BulkChecker::new(
        CheckerSettings::from_config(cfg),
        store,
        Arc::new(provider),
        Arc::new(library),
    )))
}

fn doctor(cfg: &Config, cfg_path: &Path) -> Result<()> {
    let provider = TinEyeClient::new(cfg)?;
    let quota = match provider.get_remaining_quota() {
        Ok(n) => serde_json::json!(n),
        Err(e) => serde_json::json!({"error": e.to_string()}),
    };
    let library = MediaLibrary::load(cfg).map(|l| l.len());
    print_json(&serde_json::json!({
        "config": cfg_path,
        "store": cfg.paths.store_path,
        "manifest": cfg.library.manifest_path,
        "manifest_images": library.as_ref().ok(),
        "manifest_error": library.as_ref().err().map(|e| format!("{e:#}")),
        "api_key": provider.masked_api_key(),
        "remaining_searches": quota,
        "rate_limit_ms": cfg.scheduler.rate_limit_ms,
        "request_timeout_seconds": cfg.scheduler.request_timeout_seconds,
    }))
}

fn import(cfg: &Config) -> Result<()> {
    let library = MediaLibrary::load(cfg)?;
    let store = open_store(cfg)?;
    let added = store.register_images(&library.image_refs())?;
    info!("imported {} new images of {}", added, library.len());
    print_json(&serde_json::json!({"added": added, "known": library.len()}))
}

fn quota(cfg: &Config) -> Result<()> {
    let provider = TinEyeClient::new(cfg)?;
    let remaining = provider.get_remaining_quota()?;
    print_json(&serde_json::json!({"remaining_searches": remaining}))
}

fn check(cfg: &Config, image: ImageId) -> Result<()> {
    let store = open_store(cfg)?;
    let provider = TinEyeClient::new(cfg)?;
    let library = MediaLibrary::load(cfg)?;
    let policy = default_policy();
    let record = check_single_image(
        store.as_ref(),
        &provider,
        &library,
        policy.as_ref(),
        CheckerSettings::from_config(cfg).record,
        image,
    )?;
    print_json(&record)
}

fn bulk(cfg: &Config, action: &BulkAction) -> Result<()> {
    let store = open_store(cfg)?;
    match action {
        BulkAction::Start { detach } => {
            let checker = build_checker(cfg, store)?;
            let total = checker.start()?;
            print_json(&serde_json::json!({"status": "started", "total": total}))?;
            if *detach {
                return Ok(());
            }
            run_foreground(checker)
        }
        BulkAction::Resume {} => {
            let checker = build_checker(cfg, store)?;
            if !checker.resume()? {
                return Err(anyhow!("no bulk check is running"));
            }
            run_foreground(checker)
        }
        BulkAction::Cancel {} => {
            let ledger = RunLedger::new(store);
            let cancelled = ledger.cancel()?;
            print_json(&serde_json::json!({"cancelled": cancelled, "progress": ledger.progress()?}))
        }
        BulkAction::Progress {} => print_json(&RunLedger::new(store).progress()?),
    }
}

fn run_foreground(checker: Arc<BulkChecker>) -> Result<()> {
    let worker = Worker::spawn(Arc::clone(&checker))?;
    worker.kick()?;
    let progress = checker.wait_until_stopped(None)?;
    worker.shutdown()?;
    print_json(&progress)
}

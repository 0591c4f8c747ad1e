use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use proctor_core::model::{EndReason, ParticipantId, QuizConfig, QuizId};
use serde::Deserialize;
use services::{
    BrowserSignal, Clock, FullscreenSupport, HeadlessEnvironment, ProctoringService,
};
use storage::remote::{RemoteRecordStore, RemoteStoreConfig};
use storage::repository::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingCommand,
    MissingScript,
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidLimit { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingCommand => write!(f, "expected a subcommand: replay or records"),
            ArgsError::MissingScript => write!(f, "replay requires --script <file>"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidLimit { raw } => write!(f, "invalid --limit value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  proctor replay  --script <file> [--db <sqlite_url>] [--quiz-id <id>] [--participant-id <id>]");
    eprintln!("  proctor records [--db <sqlite_url>] [--quiz-id <id>] [--limit <n>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:proctor.sqlite3");
    eprintln!("  --quiz-id 1 --participant-id 1 --limit 20");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROCTOR_DB_URL, PROCTOR_REMOTE_URL, PROCTOR_REMOTE_KEY, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Replay,
    Records,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "replay" => Some(Self::Replay),
            "records" => Some(Self::Records),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Args {
    db_url: String,
    quiz_id: QuizId,
    participant_id: ParticipantId,
    script: Option<PathBuf>,
    limit: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("PROCTOR_DB_URL")
                .ok()
                .map_or_else(|| normalize_sqlite_url("sqlite:proctor.sqlite3".into()), normalize_sqlite_url),
            quiz_id: QuizId::new(1),
            participant_id: ParticipantId::new(1),
            script: None,
            limit: 20,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--quiz-id" => {
                    let value = require_value(args, "--quiz-id")?;
                    parsed.quiz_id = value.parse().map_err(|_| ArgsError::InvalidId {
                        flag: "--quiz-id",
                        raw: value.clone(),
                    })?;
                }
                "--participant-id" => {
                    let value = require_value(args, "--participant-id")?;
                    parsed.participant_id = value.parse().map_err(|_| ArgsError::InvalidId {
                        flag: "--participant-id",
                        raw: value.clone(),
                    })?;
                }
                "--script" => {
                    parsed.script = Some(PathBuf::from(require_value(args, "--script")?));
                }
                "--limit" => {
                    let value = require_value(args, "--limit")?;
                    parsed.limit = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidLimit { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

/// A recorded sequence of browser events to run through a session.
#[derive(Debug, Deserialize)]
struct ReplayScript {
    #[serde(default)]
    config: QuizConfig,
    #[serde(default)]
    fullscreen: ScriptFullscreen,
    signals: Vec<BrowserSignal>,
    /// Ends the replay as a disconnect instead of a submission.
    #[serde(default)]
    disconnect: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptFullscreen {
    #[default]
    Granted,
    Denied,
    Unsupported,
}

impl From<ScriptFullscreen> for FullscreenSupport {
    fn from(value: ScriptFullscreen) -> Self {
        match value {
            ScriptFullscreen::Granted => Self::Granted,
            ScriptFullscreen::Denied => Self::Denied,
            ScriptFullscreen::Unsupported => Self::Unsupported,
        }
    }
}

async fn replay(
    storage: &Storage,
    args: &Args,
    script: ReplayScript,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = ProctoringService::new(Clock::system(), Arc::clone(&storage.records));
    let env = Arc::new(HeadlessEnvironment::with_support(script.fullscreen.into()));

    let mut attempt = match service
        .begin_attempt(args.quiz_id, args.participant_id, script.config, env)
        .await
    {
        Ok(attempt) => attempt,
        Err(services::AttemptError::Proctoring(err)) => {
            // The participant-facing message is what the quiz UI would show.
            println!("blocked: {}", err.user_message());
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    for signal in &script.signals {
        let outcome = attempt.session.handle_signal(signal).await;
        let reasons: Vec<_> = outcome.recorded.iter().map(|k| k.reason()).collect();
        println!(
            "{}",
            serde_json::json!({
                "signal": signal,
                "recorded": reasons,
                "prevent_default": outcome.prevent_default,
                "warnings": outcome.warning_count,
            })
        );
        if outcome.force_submitted {
            break;
        }
    }

    let end_reason = match attempt.force_submit.try_recv() {
        Ok(signal) => {
            println!(
                "force-submitted: {} ({} warnings)",
                signal.reason, signal.warnings
            );
            EndReason::ForceSubmitted
        }
        Err(_) => script
            .disconnect
            .map_or(EndReason::Submitted, EndReason::Disconnected),
    };

    match attempt.session.end_session(end_reason).await {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("violation record was not stored, see log"),
    }
    if let Some(deadline) = attempt.deadline.take() {
        deadline.abort();
    }
    Ok(())
}

async fn list_records(storage: &Storage, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let rows = storage.records.list_records(args.quiz_id, args.limit).await?;
    for row in rows {
        println!(
            "{}",
            serde_json::json!({
                "id": row.id,
                "record": row.record,
            })
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Err(ArgsError::MissingCommand.into());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            ArgsError::UnknownArg(first.clone())
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite here so the library crates never touch the filesystem.
    prepare_sqlite_file(&parsed.db_url)?;
    let mut storage = Storage::sqlite(&parsed.db_url).await?;
    if let Some(remote) = RemoteStoreConfig::from_env() {
        tracing::info!(base_url = %remote.base_url, "mirroring violation records to remote store");
        storage = storage.mirrored_to(Arc::new(RemoteRecordStore::new(remote)));
    }

    match cmd {
        Command::Replay => {
            let path = parsed.script.as_ref().ok_or(ArgsError::MissingScript)?;
            let script: ReplayScript = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            replay(&storage, &parsed, script).await
        }
        Command::Records => list_records(&storage, &parsed).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

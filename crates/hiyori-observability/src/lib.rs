use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing_appender::non_blocking::WorkerGuard;

const EVENT_TARGET: &str = "hiyori.obs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Server,
    Chat,
    Run,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Server => "server",
            ProcessKind::Chat => "chat",
            ProcessKind::Run => "run",
        }
    }

    /// Daily files are named `hiyori.<process>.YYYY-MM-DD.jsonl`.
    fn file_prefix(self) -> String {
        format!("hiyori.{}", self.as_str())
    }
}

/// Where and how one process writes its logs.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub process: ProcessKind,
    pub logs_dir: PathBuf,
    pub retention_days: u32,
    /// Compact console output next to the JSONL file. Off for the terminal
    /// chat so log lines do not interleave with a streamed reply.
    pub console: bool,
}

impl LogSettings {
    pub fn under_root(process: ProcessKind, state_root: &Path) -> Self {
        Self {
            process,
            logs_dir: state_root.join("logs"),
            retention_days: 14,
            console: process == ProcessKind::Server,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingInitInfo {
    pub logs_dir: PathBuf,
    pub file_prefix: String,
    pub removed_files: usize,
}

/// One structured line on the `hiyori.obs` target. User text never goes in
/// here unless it went through [`redact_text`].
#[derive(Debug, Clone, Default)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub correlation_id: Option<&'a str>,
    pub locale: Option<&'a str>,
    pub provider_id: Option<&'a str>,
    pub model_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Length plus a fingerprint, so turns can be correlated across log lines
/// without storing them.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} hash={}]", trimmed.len(), fingerprint(trimmed))
}

fn fingerprint(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    // tracing needs the level as a constant at each call site
    macro_rules! record {
        ($level:expr) => {
            tracing::event!(
                target: EVENT_TARGET,
                $level,
                process = process.as_str(),
                component = event.component,
                event = event.event,
                correlation_id = event.correlation_id.unwrap_or(""),
                locale = event.locale.unwrap_or(""),
                provider_id = event.provider_id.unwrap_or(""),
                model_id = event.model_id.unwrap_or(""),
                status = event.status.unwrap_or(""),
                error_code = event.error_code.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "observability_event"
            )
        };
    }

    match level {
        Level::ERROR => record!(Level::ERROR),
        Level::WARN => record!(Level::WARN),
        _ => record!(Level::INFO),
    }
}

/// Installs the global subscriber: `RUST_LOG` filtering (default `info`), a
/// daily JSONL file and, if asked for, the console. Expired files of the same
/// process are removed first. Keep the guard alive for the life of the
/// process or buffered lines are lost.
pub fn init_process_logging(
    settings: &LogSettings,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(&settings.logs_dir)?;
    let file_prefix = settings.process.file_prefix();
    let expired = expired_log_files(
        &settings.logs_dir,
        &file_prefix,
        Utc::now().date_naive(),
        settings.retention_days,
    )?;
    let removed_files = expired
        .iter()
        .filter(|path| fs::remove_file(path).is_ok())
        .count();

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&file_prefix)
        .filename_suffix("jsonl")
        .build(&settings.logs_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);
    let console_layer = settings
        .console
        .then(|| tracing_subscriber::fmt::layer().compact().with_target(true));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok((
        guard,
        LoggingInitInfo {
            logs_dir: settings.logs_dir.clone(),
            file_prefix,
            removed_files,
        },
    ))
}

/// Files of `prefix` whose date is more than `retention_days` before `today`.
/// Names that do not carry a date are never selected.
fn expired_log_files(
    logs_dir: &Path,
    prefix: &str,
    today: NaiveDate,
    retention_days: u32,
) -> anyhow::Result<Vec<PathBuf>> {
    let cutoff = today - chrono::Duration::days(i64::from(retention_days));
    let mut expired = Vec::new();
    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff && path.is_file() {
            expired.push(path);
        }
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_masks_content() {
        let raw = "私の秘密の話";
        let redacted = redact_text(raw);
        assert!(redacted.starts_with("[redacted len="));
        assert!(!redacted.contains(raw));
        assert_eq!(redact_text(raw), redact_text(&format!("  {raw} ")));
        assert_eq!(redact_text("   "), "");
    }

    #[test]
    fn settings_under_root_use_logs_folder() {
        let root = PathBuf::from("/tmp/hiyori");
        let server = LogSettings::under_root(ProcessKind::Server, &root);
        assert_eq!(server.logs_dir, root.join("logs"));
        assert!(server.console);
        assert!(!LogSettings::under_root(ProcessKind::Chat, &root).console);
    }

    #[test]
    fn only_expired_files_of_the_process_are_selected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let today = NaiveDate::from_ymd_opt(2026, 3, 20).expect("date");
        let names = [
            "hiyori.server.2026-03-01.jsonl",
            "hiyori.server.2026-03-10.jsonl",
            "hiyori.server.2026-03-20.jsonl",
            "hiyori.chat.2026-01-01.jsonl",
            "hiyori.server.notes.jsonl",
            "hiyori.serverless.2026-01-01.jsonl",
        ];
        for name in names {
            fs::write(dir.path().join(name), "{}\n").expect("write");
        }

        let expired = expired_log_files(dir.path(), "hiyori.server", today, 14).expect("scan");

        assert_eq!(expired, vec![dir.path().join("hiyori.server.2026-03-01.jsonl")]);
    }
}

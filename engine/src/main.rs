use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use uuid::Uuid;

use hiyori_client::{read_reply, ChatSession, HttpTransport, SendOutcome, TranscriptView};
use hiyori_core::{resolve_config_path, AppConfig, ConfigStore};
use hiyori_observability::{
    emit_event, init_process_logging, redact_text, LogSettings, LoggingInitInfo, ObservabilityEvent,
    ProcessKind, WorkerGuard,
};
use hiyori_providers::{ByteStream, SUPPORTED_PROVIDER_IDS};
use hiyori_server::{relay, serve, AppState};
use hiyori_types::{Locale, Message, Role};

const DEFAULT_PORT: u16 = 8787;

#[derive(Parser, Debug)]
#[command(name = "hiyori-engine")]
#[command(about = "Hiyori chat relay and terminal client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve `POST /api/chat` and the static assets.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        account_id: Option<String>,
        #[arg(long)]
        assets_dir: Option<String>,
    },
    /// Interactive chat against a running server.
    Chat {
        #[arg(long, env = "HIYORI_URL", default_value = "http://127.0.0.1:8787")]
        url: String,
        #[arg(long)]
        locale: Option<String>,
    },
    /// Send one prompt through the relay in-process and print the reply.
    Run {
        prompt: String,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        account_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            config,
            provider,
            model,
            api_key,
            account_id,
            assets_dir,
        } => {
            let (_log_guard, log_info) = init_logging(ProcessKind::Server)?;
            info!("server logging initialized: {:?}", log_info);

            let overrides = build_cli_overrides(CliOverrides {
                provider,
                model,
                api_key,
                account_id,
                assets_dir,
            })?;
            let config_path = resolve_config_path(config.map(PathBuf::from));
            let config = load_config(&config_path, overrides).await?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let startup_attempt_id = Uuid::new_v4().to_string();
            log_startup_paths(&config_path, &config, &addr, &startup_attempt_id);

            let state = AppState::from_config(&config);
            let active = state.providers.active()?.info();
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Server,
                ObservabilityEvent {
                    event: "server.startup.ready",
                    component: "engine.main",
                    correlation_id: Some(startup_attempt_id.as_str()),
                    provider_id: Some(active.id.as_str()),
                    model_id: Some(active.model.as_str()),
                    status: Some("ok"),
                    ..Default::default()
                },
            );
            serve(addr, state).await?;
        }
        Command::Chat { url, locale } => {
            let (_log_guard, _) = init_logging(ProcessKind::Chat)?;
            let locale = startup_locale(locale.as_deref());
            run_chat(&url, locale).await?;
        }
        Command::Run {
            prompt,
            locale,
            config,
            provider,
            model,
            api_key,
            account_id,
        } => {
            let (_log_guard, _) = init_logging(ProcessKind::Run)?;
            let overrides = build_cli_overrides(CliOverrides {
                provider,
                model,
                api_key,
                account_id,
                assets_dir: None,
            })?;
            let config_path = resolve_config_path(config.map(PathBuf::from));
            let config = load_config(&config_path, overrides).await?;
            let state = AppState::from_config(&config);

            let locale = startup_locale(locale.as_deref());
            let composition = state
                .composer
                .compose(&[Message::user(prompt.clone())], Some(locale.as_str()));
            info!(
                "run: locale={} prompt={}",
                composition.locale,
                redact_text(&prompt)
            );
            let provider = state.providers.active()?;
            let stream = relay(&*provider, composition.messages).await?;
            let mut stdout = io::stdout();
            print_reply(stream, &mut stdout).await?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}

fn init_logging(process: ProcessKind) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    let settings = LogSettings::under_root(process, &resolve_state_root());
    let (guard, info) = init_process_logging(&settings)?;
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "engine.main",
            status: Some("ok"),
            detail: Some("jsonl logging initialized"),
            ..Default::default()
        },
    );
    Ok((guard, info))
}

/// `HIYORI_STATE_DIR`, then the platform data directory.
fn resolve_state_root() -> PathBuf {
    if let Ok(dir) = std::env::var("HIYORI_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("hiyori"))
        .unwrap_or_else(|| PathBuf::from(".hiyori"))
}

async fn load_config(
    path: &Path,
    overrides: Option<serde_json::Value>,
) -> anyhow::Result<AppConfig> {
    let store = ConfigStore::new(path, overrides).await?;
    Ok(store.get())
}

fn startup_locale(flag: Option<&str>) -> Locale {
    if let Some(tag) = flag {
        return Locale::resolve(Some(tag));
    }
    let system = std::env::var("LC_ALL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var("LANG").ok());
    Locale::detect(None, system.as_deref())
}

fn log_startup_paths(config_path: &Path, config: &AppConfig, addr: &SocketAddr, attempt_id: &str) {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting hiyori-engine on http://{addr}");
    info!(
        "startup paths: attempt_id={} cwd={} config_path={} assets_dir={}",
        attempt_id,
        cwd.display(),
        config_path.display(),
        config.assets_dir.as_deref().unwrap_or(hiyori_server::DEFAULT_ASSETS_DIR)
    );
}

#[derive(Debug, Default)]
struct CliOverrides {
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    account_id: Option<String>,
    assets_dir: Option<String>,
}

fn build_cli_overrides(flags: CliOverrides) -> anyhow::Result<Option<serde_json::Value>> {
    let provider = normalize_and_validate_provider(flags.provider)?;

    if provider.is_none()
        && flags.model.is_none()
        && flags.api_key.is_none()
        && flags.account_id.is_none()
        && flags.assets_dir.is_none()
    {
        return Ok(None);
    }
    let mut root = serde_json::Map::new();

    if let Some(p) = &provider {
        root.insert(
            "default_provider".to_string(),
            serde_json::Value::String(p.clone()),
        );
    }
    if let Some(dir) = flags.assets_dir {
        root.insert("assets_dir".to_string(), serde_json::Value::String(dir));
    }

    // key/model/account flags apply to the selected provider, else workers-ai.
    // A selected provider always gets an entry so that it is built.
    let target_provider = provider.as_deref().unwrap_or("workers-ai");

    let mut provider_config = serde_json::Map::new();
    if let Some(k) = flags.api_key {
        provider_config.insert("api_key".to_string(), serde_json::Value::String(k));
    }
    if let Some(m) = flags.model {
        provider_config.insert("default_model".to_string(), serde_json::Value::String(m));
    }
    if let Some(a) = flags.account_id {
        provider_config.insert("account_id".to_string(), serde_json::Value::String(a));
    }
    if !provider_config.is_empty() || provider.is_some() {
        let mut providers = serde_json::Map::new();
        providers.insert(
            target_provider.to_string(),
            serde_json::Value::Object(provider_config),
        );
        root.insert(
            "providers".to_string(),
            serde_json::Value::Object(providers),
        );
    }

    Ok(Some(serde_json::Value::Object(root)))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        anyhow::bail!(
            "provider cannot be empty. supported providers: {}",
            SUPPORTED_PROVIDER_IDS.join(", ")
        );
    }
    if SUPPORTED_PROVIDER_IDS.contains(&normalized.as_str()) {
        return Ok(Some(normalized));
    }
    anyhow::bail!(
        "unsupported provider `{}`. supported providers: {}",
        provider,
        SUPPORTED_PROVIDER_IDS.join(", ")
    );
}

/// Decodes a relayed event stream and writes each text delta as it arrives.
async fn print_reply(stream: ByteStream, out: &mut impl Write) -> anyhow::Result<String> {
    let mut write_error = None;
    let reply = read_reply(stream, |delta, _| {
        if write_error.is_none() {
            if let Err(err) = out.write_all(delta.as_bytes()).and_then(|()| out.flush()) {
                write_error = Some(err);
            }
        }
    })
    .await
    .context("inference stream failed")?;
    match write_error {
        Some(err) => Err(err.into()),
        None => Ok(reply),
    }
}

async fn run_chat(url: &str, locale: Locale) -> anyhow::Result<()> {
    let transport = HttpTransport::new(url);
    info!("chat session against {}", transport.endpoint());
    let session = ChatSession::new(transport, TerminalView::new(io::stdout()), locale);

    println!("commands: /clear, /locale <ja|zh|en>, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "/quit" | "/exit" => break,
            "/clear" => session.clear(),
            _ if line.starts_with("/locale") => {
                let tag = line.trim_start_matches("/locale").trim();
                if !session.set_locale(tag) {
                    println!("unsupported locale `{tag}`; use ja, zh or en");
                }
            }
            _ => {
                if let SendOutcome::Failed(err) = session.send(line).await {
                    tracing::warn!("chat turn failed: {}", err);
                }
            }
        }
    }
    Ok(())
}

/// Streams replies to a terminal, writing only the part of the accumulated
/// text that has not been written yet.
struct TerminalView<W> {
    out: W,
    written: usize,
    reply_open: bool,
}

impl<W: Write> TerminalView<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            reply_open: false,
        }
    }

    fn close_reply(&mut self) {
        if self.reply_open {
            let _ = writeln!(self.out);
            self.reply_open = false;
        }
    }
}

impl<W: Write + Send> TranscriptView for TerminalView<W> {
    fn push_message(&mut self, role: Role, content: &str) {
        self.close_reply();
        // the user's own line is already on screen
        if role == Role::Assistant {
            let _ = writeln!(self.out, "hiyori> {content}");
        }
    }

    fn begin_reply(&mut self) {
        self.close_reply();
        let _ = write!(self.out, "hiyori> ");
        let _ = self.out.flush();
        self.written = 0;
        self.reply_open = true;
    }

    fn render_reply(&mut self, text: &str) {
        if let Some(suffix) = text.get(self.written..) {
            let _ = write!(self.out, "{suffix}");
            let _ = self.out.flush();
        }
        self.written = text.len();
    }

    fn set_busy(&mut self, busy: bool) {
        if !busy {
            self.close_reply();
        }
    }

    fn clear(&mut self) {
        self.close_reply();
        let _ = writeln!(self.out, "----");
    }
}

//! till CLI - operator tooling for the auth core
//!
//! Usage:
//!   till token mint --user-id <id> --username <name> --role <role>
//!   till token verify <token>
//!   till token inspect <token>
//!   till hash-password
//!   till gen-secret
//!   till run --users <file> < requests.jsonl

mod serve;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rand::{distributions::Alphanumeric, Rng};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use till_auth::{
    decode_unsafe, spawn_cleanup, Argon2Hasher, AuthService, HashingConfig,
    MemoryCredentialStore, StrengthPolicy, SystemClock, TokenCodec, TokenKind, TokenSubject,
    TracingEventSink,
};
use till_core::config::{MAX_TTL_SECS, MIN_SECRET_LEN};
use till_core::{AppConfig, LoggingConfig, UserRole};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "till")]
#[command(about = "Session and token tooling for the till back office")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables still override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint, verify or inspect tokens with the configured secrets
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Hash a password for a users file (reads stdin when --password is omitted)
    HashPassword {
        #[arg(long)]
        password: Option<String>,
    },
    /// Print a random secret suitable for TILL_ACCESS_SECRET / TILL_REFRESH_SECRET
    GenSecret {
        #[arg(long, default_value_t = 48)]
        length: usize,
    },
    /// Serve line-delimited JSON requests on stdin for a users file, with
    /// periodic cleanup, until Ctrl-C or end of input
    Run {
        /// TOML users file
        #[arg(long)]
        users: PathBuf,

        /// Seconds between stats log lines
        #[arg(long, default_value_t = 60)]
        stats_interval_secs: u64,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Mint a signed token
    Mint {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        role: UserRole,
        #[arg(long, value_enum, default_value_t = KindArg::Access)]
        kind: KindArg,
        /// Lifetime in seconds (defaults to the configured TTL for the kind)
        #[arg(long)]
        ttl_secs: Option<i64>,
    },
    /// Verify a token and print its claims
    Verify {
        token: String,
        #[arg(long, value_enum, default_value_t = KindArg::Access)]
        kind: KindArg,
    },
    /// Print a token's claims without checking signature or expiry
    Inspect { token: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Access,
    Refresh,
}

impl From<KindArg> for TokenKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Access => TokenKind::Access,
            KindArg::Refresh => TokenKind::Refresh,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "till_auth={level},till_cli={level},audit={level}",
            level = logging.level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Token { action } => token_command(&config, action)?,
        Commands::HashPassword { password } => hash_password(password)?,
        Commands::GenSecret { length } => println!("{}", generate_secret(length)?),
        Commands::Run {
            users,
            stats_interval_secs,
        } => run(config, users, stats_interval_secs).await?,
    }

    Ok(())
}

fn token_command(config: &AppConfig, action: TokenAction) -> anyhow::Result<()> {
    let codec = TokenCodec::new(&config.auth, Arc::new(SystemClock))
        .context("token secrets are not configured")?;

    match action {
        TokenAction::Mint {
            user_id,
            username,
            role,
            kind,
            ttl_secs,
        } => {
            let kind = TokenKind::from(kind);
            let ttl_secs = ttl_secs.unwrap_or(match kind {
                TokenKind::Access => config.auth.access_ttl_secs as i64,
                TokenKind::Refresh => config.auth.refresh_ttl_secs as i64,
            });
            let subject = TokenSubject {
                user_id,
                username,
                role,
            };

            let token = codec.mint(&subject, kind, mint_ttl(ttl_secs)?)?;
            println!("{token}");
        }
        TokenAction::Verify { token, kind } => match codec.verify(&token, kind.into()) {
            Ok(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
            Err(e) => bail!("token rejected: {e}"),
        },
        TokenAction::Inspect { token } => {
            let Some(claims) = decode_unsafe(&token) else {
                bail!("not a decodable token");
            };
            warn!("claims below are unverified");
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }

    Ok(())
}

fn mint_ttl(ttl_secs: i64) -> anyhow::Result<chrono::Duration> {
    if ttl_secs <= 0 || ttl_secs.unsigned_abs() > MAX_TTL_SECS {
        bail!("--ttl-secs must be between 1 and {MAX_TTL_SECS}");
    }
    Ok(chrono::Duration::seconds(ttl_secs))
}

fn hash_password(password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        bail!("password must not be empty");
    }

    if let Err(problems) = StrengthPolicy::default().check(&password) {
        warn!("password is weak: {}", problems.join(", "));
    }

    let hasher = Argon2Hasher::new(&HashingConfig::default())?;
    println!("{}", hasher.hash(&password)?);
    Ok(())
}

fn generate_secret(length: usize) -> anyhow::Result<String> {
    if length < MIN_SECRET_LEN {
        bail!("secrets must be at least {MIN_SECRET_LEN} characters");
    }

    Ok(rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect())
}

async fn run(config: AppConfig, users: PathBuf, stats_interval_secs: u64) -> anyhow::Result<()> {
    let store =
        MemoryCredentialStore::load(&users, &HashingConfig::default(), StrengthPolicy::default())
            .await?;
    info!(users = store.len().await, path = %users.display(), "Loaded users");

    let cleanup_interval = Duration::from_secs(config.auth.cleanup_interval_secs);
    let service = Arc::new(AuthService::new(
        config.auth,
        Arc::new(store),
        Arc::new(TracingEventSink),
    )?);

    let cleanup = spawn_cleanup(service.clone(), cleanup_interval);

    let mut stats_tick = tokio::time::interval(Duration::from_secs(stats_interval_secs.max(1)));
    stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    stats_tick.tick().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("till auth core reading requests from stdin; Ctrl-C or EOF stops it");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = serve::handle_line(&service, &line).await;
                stdout.write_all(format!("{response}\n").as_bytes()).await?;
                stdout.flush().await?;
            }
            _ = stats_tick.tick() => {
                let stats = service.stats();
                info!(
                    active_sessions = stats.active_session_count,
                    revoked_tokens = stats.revoked_token_count,
                    "Session stats"
                );
            }
        }
    }

    cleanup.shutdown().await;
    info!("till auth core stopped");
    Ok(())
}

// ============================================================================
// avatar-client - CLI for the token-gated avatar stream
// ============================================================================
// Usage:
//   avatar-client balance <ADDRESS> [--cached]     Check the gated token balance
//   avatar-client login --keypair <PATH>           Sign in with a wallet keypair
//   avatar-client access --keypair <PATH>          Run the full access gate
//   avatar-client stream --keypair <PATH>          Gate, then talk to the live avatar
//   avatar-client whoami | logout                  Inspect / clear the stored login
//   avatar-client chat <MESSAGE>                   Ask the backend chat endpoint
//   avatar-client stats | system-messages | consciousness-log
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use avatar_core::access::{
    decide, AccessGate, AccessState, BalanceChecker, TokenBalanceCache, REQUIRED_TOKEN_AMOUNT,
    TOKEN_MINT,
};
use avatar_core::api::BackendApi;
use avatar_core::auth::{AuthClient, CredentialStore, KeypairSigner, WalletSigner};
use avatar_core::config::ClientConfig;
use avatar_core::db::ClientDb;
use avatar_core::streaming::{
    format_time, is_low_time, HttpAvatarService, NullVideoSink, SessionStatus, StreamEvent,
    StreamingOrchestrator, WebRtcConnector,
};
use avatar_core::voice::VoiceCapture;
#[cfg(feature = "native-audio")]
use avatar_core::voice::{CpalMicrophone, WhisperTranscriber};
use avatar_core::{ChatMessage, PromptType};

/// Token-gated avatar stream client
#[derive(Parser)]
#[command(name = "avatar-client", version, about = "Wallet access and backend tools for the avatar stream")]
struct Cli {
    /// Path to the database file (default: ~/.avatar-stream/client.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the gated token balance of a wallet
    Balance {
        address: String,

        /// Go through the 30s balance cache
        #[arg(long)]
        cached: bool,
    },

    /// Sign in with a Solana keypair file and store the access token
    Login {
        #[arg(long)]
        keypair: String,
    },

    /// Connect, sign in if needed, and check the token balance
    Access {
        #[arg(long)]
        keypair: String,
    },

    /// Pass the access gate, then run a live avatar session
    Stream {
        #[arg(long)]
        keypair: String,
    },

    /// Show the stored login
    Whoami,

    /// Forget the stored login
    Logout,

    /// Send one chat message to the backend
    Chat {
        message: String,

        /// Prompt style: text or video
        #[arg(long, default_value = "text")]
        prompt_type: String,
    },

    /// Show agent stats
    Stats,

    /// List system messages
    SystemMessages {
        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "10")]
        per_page: u32,
    },

    /// List the agent's consciousness log
    ConsciousnessLog {
        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "10")]
        per_page: u32,
    },
}

fn parse_prompt_type(s: &str) -> Result<PromptType> {
    match s.to_lowercase().as_str() {
        "text" => Ok(PromptType::Text),
        "video" => Ok(PromptType::Video),
        _ => anyhow::bail!("Unknown prompt type '{}'. Valid values: text, video", s),
    }
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("avatar_core=debug,avatar_client=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if cli.db_path.is_some() {
        config.db_path = cli.db_path;
    }
    config.validate()?;

    match cli.command {
        Commands::Balance { address, cached } => cmd_balance(&config, &address, cached).await,
        Commands::Login { keypair } => cmd_login(&config, &keypair).await,
        Commands::Access { keypair } => {
            let balance = ensure_access(&config, &keypair).await?;
            println!("Access granted (balance: {})", balance);
            Ok(())
        }
        Commands::Stream { keypair } => cmd_stream(&config, &keypair).await,
        Commands::Whoami => cmd_whoami(&config),
        Commands::Logout => cmd_logout(&config),
        Commands::Chat {
            message,
            prompt_type,
        } => cmd_chat(&config, &message, &prompt_type).await,
        Commands::Stats => print_json(&backend(&config).get_agent_stats().await?),
        Commands::SystemMessages { page, per_page } => {
            print_json(&backend(&config).get_system_messages(page, per_page).await?)
        }
        Commands::ConsciousnessLog { page, per_page } => {
            print_json(&backend(&config).get_consciousness_log(page, per_page).await?)
        }
    }
}

fn backend(config: &ClientConfig) -> BackendApi {
    BackendApi::new(&config.backend_api_url, config.backend_api_key.clone())
}

fn open_db(config: &ClientConfig) -> Result<ClientDb> {
    ClientDb::open(config.db_path.as_deref())
}

fn access_gate(config: &ClientConfig, db: ClientDb) -> Result<AccessGate> {
    let cache = Arc::new(TokenBalanceCache::new(BalanceChecker::new(&config.rpc_url)?));
    Ok(AccessGate::new(cache, Arc::new(db)))
}

async fn cmd_balance(config: &ClientConfig, address: &str, cached: bool) -> Result<()> {
    let checker = BalanceChecker::new(&config.rpc_url)?;
    let balance = if cached {
        TokenBalanceCache::new(checker).get(address).await?
    } else {
        checker.check_token_balance(address).await?
    };

    println!("Wallet:  {}", address);
    println!("Mint:    {}", TOKEN_MINT);
    println!("Balance: {}", balance.balance);
    match decide(&balance, REQUIRED_TOKEN_AMOUNT) {
        Ok(_) => println!("Access:  granted"),
        Err(reason) => println!("Access:  denied ({})", reason.message()),
    }
    Ok(())
}

async fn cmd_login(config: &ClientConfig, keypair: &str) -> Result<()> {
    let signer = KeypairSigner::from_file(keypair)?;
    let auth = AuthClient::new(&config.auth_api_url);
    let mut gate = access_gate(config, open_db(config)?)?;

    gate.wallet_connected(&signer.address())?;
    if gate.is_authenticated() {
        println!("Already signed in as {}", signer.address());
        return Ok(());
    }

    gate.login(&auth, &signer).await?;
    println!("Signed in as {}", signer.address());
    Ok(())
}

/// Connect the keypair's wallet, sign in if needed and check the balance.
/// Returns the balance when access is granted.
async fn ensure_access(config: &ClientConfig, keypair: &str) -> Result<f64> {
    let signer = KeypairSigner::from_file(keypair)?;
    let auth = AuthClient::new(&config.auth_api_url);
    let mut gate = access_gate(config, open_db(config)?)?;

    gate.wallet_connected(&signer.address())?;
    if !gate.is_authenticated() {
        info!("No stored login for {}, signing in", signer.address());
        gate.login(&auth, &signer).await?;
    }

    match gate.evaluate().await {
        AccessState::Granted { balance } => Ok(*balance),
        AccessState::Denied { reason } => Err(anyhow!("Access denied: {}", reason.message())),
        other => Err(anyhow!("Access check did not finish: {:?}", other)),
    }
}

#[cfg(feature = "native-audio")]
fn voice_capture(config: &ClientConfig) -> VoiceCapture {
    match config.openai_api_key.as_deref() {
        Some(key) => VoiceCapture::new(
            Arc::new(CpalMicrophone::new()),
            Arc::new(WhisperTranscriber::new(key)),
        ),
        None => VoiceCapture::disabled(),
    }
}

#[cfg(not(feature = "native-audio"))]
fn voice_capture(_config: &ClientConfig) -> VoiceCapture {
    VoiceCapture::disabled()
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::StatusChanged { status } => println!("[status] {:?}", status),
        StreamEvent::TimeRemaining { seconds } => {
            if seconds % 30 == 0 || (is_low_time(*seconds) && seconds % 10 == 0) {
                println!("[time] {} left", format_time(*seconds));
            }
        }
        StreamEvent::TrackReceived { kind } => println!("[media] {:?} track received", kind),
        StreamEvent::Transcription { text } => println!("[voice] {}", text),
        StreamEvent::Error { message } => eprintln!("[error] {}", message),
    }
}

fn session_ended(event: &StreamEvent) -> bool {
    matches!(
        event,
        StreamEvent::StatusChanged {
            status: SessionStatus::Closed | SessionStatus::Failed
        }
    )
}

async fn cmd_stream(config: &ClientConfig, keypair: &str) -> Result<()> {
    let balance = ensure_access(config, keypair).await?;
    info!("Access granted (balance {}), starting stream", balance);

    let avatar = Arc::new(HttpAvatarService::new(
        &config.avatar_api_url,
        config.require_avatar_api_key()?,
    ));
    let mut builder = StreamingOrchestrator::builder(
        avatar,
        Arc::new(WebRtcConnector::new()),
        Arc::new(NullVideoSink),
    )
    .voice(voice_capture(config));
    if config.backend_api_key.is_some() {
        builder = builder.chat_backend(Arc::new(backend(config)));
    }
    let orchestrator = builder.build();
    let mut events = orchestrator.subscribe();

    orchestrator.start().await?;
    println!("Streaming. Type a message, /rec and /stop for voice, /quit to end.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/rec" => {
                        if let Err(e) = orchestrator.start_recording().await {
                            eprintln!("[error] {}", e);
                        }
                    }
                    "/stop" => match orchestrator.stop_recording().await {
                        Ok(text) => println!("You said: {}", text),
                        Err(e) => eprintln!("[error] {}", e),
                    },
                    text => {
                        if let Err(e) = orchestrator.submit_text(text).await {
                            eprintln!("[error] {}", e);
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if session_ended(&event) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    orchestrator.shutdown().await?;
    println!("Session ended.");
    Ok(())
}

fn cmd_whoami(config: &ClientConfig) -> Result<()> {
    let db = open_db(config)?;
    match db.load()? {
        Some(credential) => {
            println!("Wallet:    {}", credential.wallet_address);
            println!("Signed in: {}", format_timestamp(credential.saved_at));
            println!("Database:  {}", db.path().display());
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

fn cmd_logout(config: &ClientConfig) -> Result<()> {
    let db = open_db(config)?;
    db.clear()?;
    println!("Stored login cleared.");
    Ok(())
}

async fn cmd_chat(config: &ClientConfig, message: &str, prompt_type: &str) -> Result<()> {
    let prompt_type = parse_prompt_type(prompt_type)?;
    let reply = backend(config)
        .send_chat_message(&[ChatMessage::user(message)], prompt_type)
        .await?;
    println!("{}", reply);
    Ok(())
}

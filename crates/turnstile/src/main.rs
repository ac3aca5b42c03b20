//! turnstile - Entitlements and auto prompt client
//!
//! This is the command line entry point. It wires together:
//! - Configuration loading
//! - Storage initialization
//! - HTTP transport to the entitlements service
//! - Entitlement resolution and auto prompt decisions

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use turnstile_api::AutoPromptType;
use turnstile_config::{Settings, load_config};
use turnstile_core::{
    AutoPromptManager, ClientConfigManager, Deps, EncryptionParams, EntitlementsManager,
    GetEntitlementsParams, PromptDecision, ShowAutoPromptParams,
};
use turnstile_host_api::{AnalyticsProbe, HostResult, Presenter, PromptRequest};
use turnstile_host_http::{DEFAULT_TIMEOUT, HttpFetcher};
use turnstile_store::{SqliteStorage, Storage};
use turnstile_util::{STORAGE_DB_FILENAME, SystemClock, default_config_path};

/// turnstile - Reader entitlements and paywall prompts for a news page
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(about = "Reader entitlements and paywall prompts for a news page", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/turnstile/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set TURNSTILE_DATA_DIR env var)
    #[arg(short, long, env = "TURNSTILE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Treat the page as having an analytics integration
    #[arg(long)]
    analytics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the reader's entitlements for the configured page
    Entitlements(EntitlementsArgs),

    /// Decide which prompt, if any, the page shows
    Decide(DecideArgs),
}

#[derive(ClapArgs, Debug)]
struct EntitlementsArgs {
    /// Encrypted document key to unlock
    #[arg(long)]
    encrypted_document_key: Option<String>,

    /// Signed entitlements to accept before resolving
    #[arg(long)]
    push: Option<String>,

    /// Retry while entitlements are expected to turn positive
    #[arg(long)]
    expect_positive: bool,
}

#[derive(ClapArgs, Debug)]
struct DecideArgs {
    /// contribution, contribution_large, subscription, subscription_large or none
    #[arg(long = "type", value_parser = parse_prompt_type)]
    prompt_type: Option<AutoPromptType>,

    /// Show the prompt regardless of caps and entitlements
    #[arg(long)]
    always_show: bool,

    /// Closability override
    #[arg(long)]
    closable: Option<bool>,
}

fn parse_prompt_type(s: &str) -> Result<AutoPromptType, String> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| format!("unknown prompt type: {}", s))
}

/// Presenter that reports through the log and stdout
struct ConsolePresenter;

#[async_trait]
impl Presenter for ConsolePresenter {
    async fn show_prompt(&self, request: &PromptRequest) -> HostResult<()> {
        info!(prompt = ?request.target, closable = request.is_closable, "Showing prompt");
        println!("{}", json!({"prompt": request}));
        Ok(())
    }

    async fn show_entitlement_toast(&self, source: &str) -> HostResult<()> {
        info!(source = %source, "Showing entitlement toast");
        Ok(())
    }

    async fn show_meter_toast(
        &self,
        client_type: Option<u32>,
        user_attribute: Option<&str>,
    ) -> HostResult<()> {
        info!(?client_type, ?user_attribute, "Showing meter toast");
        Ok(())
    }
}

struct StaticAnalytics(bool);

#[async_trait]
impl AnalyticsProbe for StaticAnalytics {
    async fn is_available(&self) -> bool {
        self.0
    }
}

/// Managers for one page view
struct Client {
    entitlements: Arc<EntitlementsManager>,
    auto_prompt: Arc<AutoPromptManager>,
}

impl Client {
    fn new(args: &Args) -> Result<Self> {
        let settings = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            publication = %settings.publication_id,
            product = %settings.product_id,
            locked = settings.locked,
            "Configuration loaded"
        );

        let deps = build_deps(settings, args.data_dir.clone(), args.analytics)?;
        let entitlements = EntitlementsManager::new(deps.clone());
        let client_config = Arc::new(ClientConfigManager::new(deps.clone()));
        let auto_prompt = AutoPromptManager::new(deps, entitlements.clone(), client_config);

        Ok(Self {
            entitlements,
            auto_prompt,
        })
    }

    async fn resolve(&self, args: &EntitlementsArgs) -> Result<Value> {
        if let Some(token) = &args.push {
            let accepted = self.entitlements.push_next_entitlements(token, false).await?;
            info!(accepted, "Pushed entitlements");
        }
        if args.expect_positive {
            self.entitlements.reset(true).await?;
        }

        let params = args
            .encrypted_document_key
            .as_ref()
            .map(|key| GetEntitlementsParams {
                encryption: Some(EncryptionParams {
                    encrypted_document_key: key.clone(),
                }),
                ..Default::default()
            });
        let entitlements = self.entitlements.get_entitlements(params).await?;

        let mut output = entitlements.json();
        output["enablesThis"] = json!(entitlements.enables_this(None));
        if let Some(key) = &entitlements.decrypted_document_key {
            output["decryptedDocumentKey"] = json!(key);
        }
        Ok(output)
    }

    async fn decide(&self, args: &DecideArgs) -> Result<Value> {
        let params = ShowAutoPromptParams {
            auto_prompt_type: args.prompt_type,
            always_show: args.always_show,
            is_closable: args.closable,
        };
        let decision = self.auto_prompt.show_auto_prompt(params).await?;
        self.auto_prompt.display_settled().await;
        Ok(decision_json(decision.as_ref()))
    }

    async fn shutdown(&self) {
        self.entitlements.settled().await;
    }
}

fn build_deps(settings: Settings, data_dir: Option<PathBuf>, analytics: bool) -> Result<Deps> {
    let data_dir = data_dir.unwrap_or_else(|| settings.runtime.data_dir.clone());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let db_path = data_dir.join(STORAGE_DB_FILENAME);
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?,
    );
    info!(db_path = %db_path.display(), "Storage initialized");

    let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT).context("Failed to create HTTP client")?;

    Ok(Deps::new(
        settings,
        Arc::new(SystemClock),
        storage,
        Arc::new(fetcher),
        Arc::new(ConsolePresenter),
        Arc::new(StaticAnalytics(analytics)),
    ))
}

fn decision_json(decision: Option<&PromptDecision>) -> Value {
    match decision {
        Some(decision) => json!({
            "mode": format!("{:?}", decision.mode),
            "delayMs": decision.delay.as_millis() as u64,
            "request": decision.request,
        }),
        None => json!({"mode": null}),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "turnstile starting");

    let client = Client::new(&args)?;
    let result = match &args.command {
        Command::Entitlements(cmd) => client.resolve(cmd).await,
        Command::Decide(cmd) => client.decide(cmd).await,
    };
    client.shutdown().await;

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Command failed");
            Err(e)
        }
    }
}

//! avd-ops
//!
//! Command line entry point: parses global flags, sets up logging and
//! dispatches to the subcommand handlers.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use avd_ops::cli::{self, Command, Context};
use avd_ops::provider::{AuthMethod, ProviderConfig, ProviderFactory, DEFAULT_AUTHORITY, DEFAULT_ENDPOINT};
use avd_ops::{AzureSettings, ConvergeConfig, InMemoryConfig, SettingsStore};

// =============================================================================
// CLI Arguments
// =============================================================================

/// avd-ops - provision, inspect and repair Azure Virtual Desktop deployments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Azure subscription ID
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID", global = true)]
    subscription_id: Option<String>,

    /// Authentication method
    #[arg(long, value_enum, env = "AZURE_AUTH_METHOD", default_value_t = AuthMethod::Auto, global = true)]
    auth_method: AuthMethod,

    /// Settings file
    #[arg(long, env = "AVD_OPS_ENV_FILE", default_value = ".env", global = true)]
    env_file: PathBuf,

    /// Key Vault holding deployment secrets (environment variables otherwise)
    #[arg(long, env = "AZURE_KEY_VAULT_URL", global = true)]
    key_vault_url: Option<String>,

    /// Identity authority
    #[arg(long, env = "AZURE_AUTHORITY_HOST", default_value = DEFAULT_AUTHORITY, hide = true)]
    authority: String,

    /// Resource manager endpoint
    #[arg(long, env = "AZURE_RESOURCE_MANAGER", default_value = DEFAULT_ENDPOINT, hide = true)]
    endpoint: String,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "60", global = true)]
    request_timeout_secs: u64,

    /// Per-resource convergence budget in seconds
    #[arg(long, env = "CONVERGE_TIMEOUT", default_value = "1800", global = true)]
    converge_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Use the in-memory simulator instead of Azure
    #[arg(long, env = "AVD_OPS_SIMULATE", global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);
    debug!("{} {}", avd_ops::NAME, avd_ops::VERSION);

    let connector = ProviderFactory::connector(ProviderConfig {
        auth_method: args.auth_method,
        authority: args.authority.clone(),
        endpoint: args.endpoint.clone(),
        key_vault_url: args.key_vault_url.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        simulate: args.simulate,
    })?;

    let mut overrides = AzureSettings {
        subscription_id: args.subscription_id.clone(),
        ..Default::default()
    };
    let mut converge = ConvergeConfig {
        timeout: Duration::from_secs(args.converge_timeout_secs),
        ..Default::default()
    };
    if args.simulate {
        overrides.subscription_id = overrides
            .subscription_id
            .or_else(|| Some(InMemoryConfig::default().subscription_id));
        converge.poll_interval = Duration::from_millis(100);
    }

    let ctx = Context {
        connector,
        store: SettingsStore::new(&args.env_file),
        overrides,
        converge,
    };

    cli::run(args.command, &ctx).await?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "tower=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

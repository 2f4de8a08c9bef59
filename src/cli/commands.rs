//! Command handlers

use super::output;
use super::{CheckCommand, Command, DeployArgs, HostPoolCommand, ListCommand, SetupArgs, VmCommand};
use crate::convergence::ConvergeConfig;
use crate::dashboard::{DashboardConfig, DashboardServer, DashboardState};
use crate::deployment::{check_network, AvdDeployment, Deployer};
use crate::domain::ports::{Inventory, ScriptKind, VmOperations};
use crate::error::{Error, Result};
use crate::provider::{AuthMethod, Connection, ConnectorRef};
use crate::settings::{AzureSettings, SettingsStore};
use dialoguer::{Input, Password, Select};
use tracing::{debug, info};

// =============================================================================
// Context
// =============================================================================

/// Everything a command needs besides its own arguments
pub struct Context {
    pub connector: ConnectorRef,
    pub store: SettingsStore,
    /// Values from global flags; applied over the settings file
    pub overrides: AzureSettings,
    pub converge: ConvergeConfig,
}

impl Context {
    pub async fn settings(&self) -> Result<AzureSettings> {
        Ok(self.store.load().await?.overlay(self.overrides.clone()))
    }

    pub async fn connect(&self) -> Result<Connection> {
        let settings = self.settings().await?;
        debug!("Connecting with {:?}", settings);
        self.connector.connect(&settings).await
    }
}

/// Dispatch a parsed command
pub async fn run(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Auth => auth(ctx).await,
        Command::Dashboard => dashboard(ctx).await,
        Command::List(list) => list_resources(ctx, list).await,
        Command::Setup(args) => setup(ctx, args).await,
        Command::Serve { addr } => serve(ctx, addr).await,
        Command::Deploy(args) => deploy(ctx, args).await,
        Command::Vm(vm) => vm_command(ctx, vm).await,
        Command::Hostpool(HostPoolCommand::Token { name, resource_group, days }) => {
            host_pool_token(ctx, &resource_group, &name, days).await
        }
        Command::Check(CheckCommand::Network { vm, resource_group }) => {
            let conn = ctx.connect().await?;
            let report = check_network(conn.provider.as_ref(), &resource_group, &vm).await?;
            println!("{}", output::network(&report));
            Ok(())
        }
    }
}

// =============================================================================
// Inventory
// =============================================================================

async fn auth(ctx: &Context) -> Result<()> {
    let conn = ctx.connect().await?;
    let info = conn.provider.subscription_info().await?;
    println!("Authentication successful ({})\n", conn.auth);
    println!("{}", output::subscription(&info));
    Ok(())
}

async fn dashboard(ctx: &Context) -> Result<()> {
    let conn = ctx.connect().await?;
    let provider = &conn.provider;
    let (subscription, groups, vms, accounts, apps) = tokio::try_join!(
        provider.subscription_info(),
        provider.list_resource_groups(),
        provider.list_virtual_machines(None),
        provider.list_storage_accounts(None),
        provider.list_web_apps(None),
    )?;
    println!("{}", output::dashboard(&subscription, &groups, &vms, &accounts, &apps));
    Ok(())
}

async fn list_resources(ctx: &Context, command: ListCommand) -> Result<()> {
    let conn = ctx.connect().await?;
    let provider = &conn.provider;

    let (rendered, total, label) = match command {
        ListCommand::Vms { resource_group } => {
            let vms = provider.list_virtual_machines(resource_group.as_deref()).await?;
            let table = output::table::<_, output::VmRow>(&vms, "No virtual machines found.");
            (table, vms.len(), "VMs")
        }
        ListCommand::Storage { resource_group } => {
            let accounts = provider.list_storage_accounts(resource_group.as_deref()).await?;
            let table = output::table::<_, output::StorageRow>(&accounts, "No storage accounts found.");
            (table, accounts.len(), "storage accounts")
        }
        ListCommand::Webapps { resource_group } => {
            let apps = provider.list_web_apps(resource_group.as_deref()).await?;
            let table = output::table::<_, output::WebAppRow>(&apps, "No web apps found.");
            (table, apps.len(), "web apps")
        }
        ListCommand::Resourcegroups => {
            let groups = provider.list_resource_groups().await?;
            let table = output::table::<_, output::ResourceGroupRow>(&groups, "No resource groups found.");
            (table, groups.len(), "resource groups")
        }
    };

    println!("{}", rendered);
    if total > 0 {
        println!("\nTotal {}: {}", label, total);
    }
    Ok(())
}

// =============================================================================
// Setup
// =============================================================================

fn prompt_error(e: dialoguer::Error) -> Error {
    Error::Configuration(format!("prompt failed: {}", e))
}

/// `given` when set, otherwise a prompt (or `default` when not interactive)
fn ask(given: Option<String>, prompt: &str, default: Option<&str>, interactive: bool) -> Result<Option<String>> {
    if let Some(value) = given.filter(|v| !v.trim().is_empty()) {
        return Ok(Some(value.trim().to_string()));
    }
    if !interactive {
        return Ok(default.map(str::to_string));
    }
    let mut input = Input::<String>::new().with_prompt(prompt).allow_empty(true);
    if let Some(default) = default {
        input = input.default(default.to_string());
    }
    let value = input.interact_text().map_err(prompt_error)?;
    Ok(Some(value.trim().to_string()).filter(|v| !v.is_empty()))
}

fn ask_secret(given: Option<String>, prompt: &str, interactive: bool) -> Result<Option<String>> {
    if given.as_deref().map_or(false, |v| !v.is_empty()) || !interactive {
        return Ok(given);
    }
    let value = Password::new().with_prompt(prompt).interact().map_err(prompt_error)?;
    Ok(Some(value).filter(|v| !v.is_empty()))
}

fn choose_method(args: &SetupArgs, interactive: bool) -> Result<AuthMethod> {
    if let Some(method) = args.method {
        return Ok(method);
    }
    if !interactive {
        return Ok(if args.client_secret.is_some() {
            AuthMethod::ServicePrincipal
        } else {
            AuthMethod::ManagedIdentity
        });
    }
    let choices = [
        AuthMethod::ServicePrincipal,
        AuthMethod::Interactive,
        AuthMethod::ManagedIdentity,
    ];
    let labels = [
        "Service principal (client id and secret)",
        "Interactive (device code sign-in)",
        "Managed identity (inside Azure)",
    ];
    let index = Select::new()
        .with_prompt("Authentication method")
        .items(&labels)
        .default(0)
        .interact()
        .map_err(prompt_error)?;
    Ok(choices[index])
}

/// Settings to persist for `method`; only the service principal keeps
/// tenant, client and secret
pub fn settings_for(method: AuthMethod, collected: AzureSettings) -> Result<AzureSettings> {
    let settings = match method {
        AuthMethod::ServicePrincipal | AuthMethod::Auto => collected,
        AuthMethod::ManagedIdentity => AzureSettings {
            tenant_id: None,
            client_secret: None,
            ..collected
        },
        AuthMethod::Interactive => AzureSettings {
            client_id: None,
            client_secret: None,
            ..collected
        },
    };
    match method {
        AuthMethod::ServicePrincipal => settings.validate_service_principal()?,
        _ if settings.subscription_id.is_none() => return Err(Error::missing_field("subscription_id")),
        _ => {}
    }
    Ok(settings)
}

async fn setup(ctx: &Context, args: SetupArgs) -> Result<()> {
    let interactive = !args.non_interactive;
    let current = ctx.store.load().await?;

    if interactive {
        println!("Azure setup: values are written to {}\n", ctx.store.path().display());
    }

    let subscription_id = ask(
        ctx.overrides.subscription_id.clone(),
        "Subscription ID",
        current.subscription_id.as_deref(),
        interactive,
    )?;
    let method = choose_method(&args, interactive)?;

    let mut collected = AzureSettings {
        subscription_id,
        default_location: ask(
            args.default_location.clone(),
            "Default location",
            Some(current.location()),
            interactive,
        )?,
        ..Default::default()
    };

    match method {
        AuthMethod::ServicePrincipal => {
            if interactive {
                println!("\nCreate an app registration in Microsoft Entra ID, add a client secret,");
                println!("and grant it the Contributor role on the subscription.\n");
            }
            collected.tenant_id = ask(args.tenant_id, "Tenant ID", current.tenant_id.as_deref(), interactive)?;
            collected.client_id = ask(args.client_id, "Client ID", current.client_id.as_deref(), interactive)?;
            collected.client_secret = ask_secret(args.client_secret, "Client secret", interactive)?;
        }
        AuthMethod::Interactive => {
            collected.tenant_id = ask(args.tenant_id, "Tenant ID (optional)", current.tenant_id.as_deref(), interactive)?;
        }
        AuthMethod::ManagedIdentity | AuthMethod::Auto => {
            collected.client_id = args.client_id;
        }
    }

    let settings = settings_for(method, collected)?;
    if let Some(backup) = ctx.store.save(&settings).await? {
        println!("Previous settings backed up as {}", backup.display());
    }

    println!("Configuration saved to {}", ctx.store.path().display());
    println!("\nNext steps:");
    println!("  1. Test authentication: avd-ops --auth-method {} auth", method);
    println!("  2. View dashboard:      avd-ops dashboard");
    Ok(())
}

// =============================================================================
// Dashboard Server
// =============================================================================

async fn serve(ctx: &Context, addr: std::net::SocketAddr) -> Result<()> {
    let state = DashboardState::new(ctx.store.clone(), ctx.connector.clone(), ctx.overrides.clone());
    DashboardServer::new(DashboardConfig { addr }, state).run().await
}

// =============================================================================
// Deployment
// =============================================================================

/// Plan from file or defaults, with flags applied
pub async fn build_plan(args: &DeployArgs, settings: &AzureSettings) -> Result<AvdDeployment> {
    let mut plan = match &args.plan {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<AvdDeployment>(&raw)
                .map_err(|e| Error::Configuration(format!("invalid plan {}: {}", path.display(), e)))?
        }
        None => AvdDeployment {
            location: settings.location().to_string(),
            ..Default::default()
        },
    };

    if let Some(rg) = &args.resource_group {
        plan.resource_group = rg.clone();
    }
    if let Some(location) = &args.location {
        plan.location = location.clone();
    }
    if let Some(count) = args.session_hosts {
        plan.session_hosts = count;
    }
    if let Some(size) = &args.vm_size {
        plan.vm_size = size.clone();
    }
    if let Some(user) = &args.admin_username {
        plan.admin_username = user.clone();
    }
    plan.allow_https |= args.allow_https;
    if args.no_public_ip {
        plan.public_ips = false;
    }
    plan.validate()?;
    Ok(plan)
}

async fn deploy(ctx: &Context, args: DeployArgs) -> Result<()> {
    let settings = ctx.settings().await?;
    let plan = build_plan(&args, &settings).await?;

    if args.dry_run {
        let subscription = settings.subscription_id.as_deref().unwrap_or("<subscription>");
        for (i, stage) in plan.stages(subscription, "")?.iter().enumerate() {
            println!("Stage {} ({}):", i + 1, stage.name);
            for resource in &stage.resources {
                println!("  {}", resource.key());
            }
        }
        return Ok(());
    }

    let conn = ctx.connect().await?;
    info!(
        "Deploying {} session host(s) into {} ({})",
        plan.session_hosts, plan.resource_group, plan.location
    );
    let deployer = Deployer::new(conn.provider.clone(), conn.secrets.clone(), ctx.converge.clone());
    let report = deployer.deploy(&plan).await?;

    println!("{}", output::deployment(&report));
    match report.failed_at {
        Some(stage) => Err(Error::OperationFailed {
            operation: "deploy".into(),
            reason: format!("stopped at stage {}", stage),
        }),
        None => Ok(()),
    }
}

// =============================================================================
// Remote Operations
// =============================================================================

async fn vm_command(ctx: &Context, command: VmCommand) -> Result<()> {
    let conn = ctx.connect().await?;
    match command {
        VmCommand::Restart { name, resource_group } => {
            conn.provider.restart_vm(&resource_group, &name).await?;
            println!("Restarted {}/{}", resource_group, name);
        }
        VmCommand::Run {
            name,
            resource_group,
            script_file,
            shell,
        } => {
            let script = tokio::fs::read_to_string(&script_file).await?;
            let kind = if shell { ScriptKind::Shell } else { ScriptKind::PowerShell };
            let output = conn.provider.run_command(&resource_group, &name, kind, &script).await?;
            for message in output.messages {
                println!("{}", message);
            }
        }
    }
    Ok(())
}

async fn host_pool_token(ctx: &Context, resource_group: &str, name: &str, days: u32) -> Result<()> {
    let conn = ctx.connect().await?;
    let min_validity = chrono::Duration::days(i64::from(days.max(1)));
    let token = conn
        .provider
        .registration_token(resource_group, name, min_validity)
        .await?;

    println!("{}", token.token);
    if let Some(expires) = token.expiration_time {
        eprintln!("Valid until {}", expires.to_rfc3339());
    }
    Ok(())
}

//! `MetaKube` provisioner CLI entrypoint.
//!
//! This is the main entrypoint for the `metakube` command-line tool.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use metakube_provisioner::cli::{
    Cli, Commands, KeyCommands, OutputFormatter, ProjectCommands, StateCommands,
};
use metakube_provisioner::config::{find_config_file, ConfigParser, ConfigValidator, Manifest};
use metakube_provisioner::error::{ApiError, MetaKubeError, Result, StateError};
use metakube_provisioner::metakube::{
    same_public_key, ClusterObserver, ClusterProvisioner, MetaKubeClient, ObservedCluster,
    ProjectManager, SshKeyManager,
};
use metakube_provisioner::planner::{check_immutable, ClusterChanges};
use metakube_provisioner::state::{
    generate_holder_id, hold_lock, ClusterState, HistoryEntry, LocalStateStore, Operation,
    StateStore,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a command needs from the manifest.
struct Context {
    manifest: Manifest,
    store: LocalStateStore,
    cancel: CancellationToken,
}

impl Context {
    fn client(&self) -> Result<MetaKubeClient> {
        let token = ConfigParser::api_token()?;
        MetaKubeClient::new(&self.manifest.api, &token, self.cancel.clone())
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current request");
            on_interrupt.cancel();
        }
    });

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Apply { yes } => cmd_apply(&load_context(config, cancel)?, yes, &formatter).await,
        Commands::Status => cmd_status(&load_context(config, cancel)?, &formatter).await,
        Commands::Destroy { yes } => {
            cmd_destroy(&load_context(config, cancel)?, yes, &formatter).await
        }
        Commands::Versions => cmd_versions(&load_context(config, cancel)?, &formatter).await,
        Commands::Project { command } => {
            cmd_project(&load_context(config, cancel)?, command, &formatter).await
        }
        Commands::Key { command } => {
            cmd_key(&load_context(config, cancel)?, command, &formatter).await
        }
        Commands::State { command } => {
            cmd_state(&load_context(config, cancel)?, command, &formatter).await
        }
    }
}

/// Validate the manifest.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating manifest: {}", config_file.display());

    let manifest = load_manifest(&config_file)?;
    let result = ConfigValidator::new().validate(&manifest)?;

    println!("{}", formatter.format_validation(&manifest, &result, show_warnings));
    Ok(())
}

/// Create the cluster, or update it towards the manifest.
async fn cmd_apply(ctx: &Context, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let lock = ctx
        .store
        .acquire_lock(&generate_holder_id(), "apply")
        .await?;

    let outcome = hold_lock(
        &ctx.store,
        &lock,
        ctx.store.refresh_interval(),
        apply(ctx, auto_approve, formatter),
    )
    .await;

    if let Err(e) = ctx.store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock: {e}");
    }
    outcome
}

async fn apply(ctx: &Context, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let desired = &ctx.manifest.cluster;
    let client = ctx.client()?;
    let observer = ClusterObserver::new(client.clone());
    let provisioner = ClusterProvisioner::new(client, &ctx.manifest.waits);

    let Some(state) = ctx.store.load().await? else {
        return create(ctx, &provisioner, auto_approve, formatter).await;
    };

    check_immutable(&state.applied, desired)?;

    match observer.read(&state.locator(), &state.node_pool).await? {
        Some(observed) => update(ctx, &provisioner, state, &observed, auto_approve, formatter).await,
        None => {
            warn!("Recorded cluster {} no longer exists, creating it again", state.cluster_id);
            create(ctx, &provisioner, auto_approve, formatter).await
        }
    }
}

async fn create(
    ctx: &Context,
    provisioner: &ClusterProvisioner,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let desired = &ctx.manifest.cluster;

    if !auto_approve
        && !confirm(
            &format!(
                "Create cluster {} in {} with version {}? [y/N]: ",
                desired.name, desired.datacenter, desired.version
            ),
            "y",
        )?
    {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let locator = provisioner.submit(desired).await?;

    // Record the id before waiting so an interrupted create is not orphaned.
    let mut state = ClusterState::new(&locator, desired);
    ctx.store.save(&state).await?;

    let result = provisioner.complete_creation(&locator, desired).await;
    match &result {
        Ok(()) => state.add_history(HistoryEntry::new(Operation::Create, Vec::new())),
        Err(e) => state.add_history(HistoryEntry::failed(
            Operation::Create,
            Vec::new(),
            &e.to_string(),
        )),
    }
    ctx.store.save(&state).await?;
    result?;

    println!(
        "{}",
        formatter.success(&format!("Created cluster {} (ID: {})", desired.name, locator.cluster_id))
    );
    Ok(())
}

async fn update(
    ctx: &Context,
    provisioner: &ClusterProvisioner,
    mut state: ClusterState,
    observed: &ObservedCluster,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let desired = &ctx.manifest.cluster;
    let changes = ClusterChanges::between(observed, desired);
    println!("{}", formatter.format_changes(&changes));

    if changes.is_empty() {
        if state.applied != desired.redacted() {
            state.set_applied(desired);
            ctx.store.save(&state).await?;
        }
        return Ok(());
    }

    if !auto_approve && !confirm("Do you want to apply these changes? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let outcome = provisioner.update(&state.locator(), desired, &changes).await;

    let applied: Vec<String> = outcome.applied.iter().map(ToString::to_string).collect();
    let failure = outcome
        .failure
        .as_ref()
        .map(|(group, e)| (*group, e.to_string()));
    println!(
        "{}",
        formatter.format_update(
            &outcome.applied,
            failure.as_ref().map(|(group, e)| (*group, e.as_str()))
        )
    );

    match &failure {
        None => {
            state.set_applied(desired);
            state.add_history(HistoryEntry::new(Operation::Update, applied));
        }
        Some((_, e)) => state.add_history(HistoryEntry::failed(Operation::Update, applied, e)),
    }
    ctx.store.save(&state).await?;

    outcome.into_result().map(|_| ())
}

/// Show the observed cluster.
async fn cmd_status(ctx: &Context, formatter: &OutputFormatter) -> Result<()> {
    let Some(state) = ctx.store.load().await? else {
        println!("{}", formatter.warning("No cluster recorded; run `metakube apply` first."));
        return Ok(());
    };

    let observer = ClusterObserver::new(ctx.client()?);
    let observed = observer.read(&state.locator(), &state.node_pool).await?;

    println!("{}", formatter.format_status(observed.as_ref()));
    Ok(())
}

/// Delete the cluster.
async fn cmd_destroy(ctx: &Context, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let Some(state) = ctx.store.load().await? else {
        println!("{}", formatter.warning("No cluster recorded, nothing to destroy."));
        return Ok(());
    };

    if !auto_approve {
        eprintln!(
            "Cluster {} ({}) will be destroyed with all its nodes.",
            state.applied.name, state.cluster_id
        );
        if !confirm("This action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(());
        }
    }

    let lock = ctx
        .store
        .acquire_lock(&generate_holder_id(), "destroy")
        .await?;

    let provisioner = ClusterProvisioner::new(ctx.client()?, &ctx.manifest.waits);
    let work = async {
        provisioner.delete(&state.locator()).await?;
        ctx.store.delete().await?;
        Ok::<(), MetaKubeError>(())
    };
    let outcome: Result<()> =
        hold_lock(&ctx.store, &lock, ctx.store.refresh_interval(), work).await;

    if let Err(e) = ctx.store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock: {e}");
    }
    outcome?;

    println!(
        "{}",
        formatter.success(&format!("Destroyed cluster {}", state.cluster_id))
    );
    Ok(())
}

/// List available versions.
async fn cmd_versions(ctx: &Context, formatter: &OutputFormatter) -> Result<()> {
    let versions = ctx.client()?.available_versions().await?;
    println!("{}", formatter.format_versions(&versions));
    Ok(())
}

/// Project commands.
async fn cmd_project(
    ctx: &Context,
    command: ProjectCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let projects = ProjectManager::new(ctx.client()?, &ctx.manifest.waits);
    let not_found = |id: &str| {
        MetaKubeError::Api(ApiError::NotFound {
            path: format!("/api/v1/projects/{id}"),
        })
    };

    match command {
        ProjectCommands::Create { name, labels } => {
            let project = projects.create(&name, labels.into_iter().collect()).await?;
            println!("{}", formatter.format_project(&project));
        }
        ProjectCommands::Show { id } => {
            let project = projects.read(&id).await?.ok_or_else(|| not_found(&id))?;
            println!("{}", formatter.format_project(&project));
        }
        ProjectCommands::Update {
            id,
            name,
            labels,
            clear_labels,
        } => {
            let labels = if clear_labels {
                Some(BTreeMap::new())
            } else if labels.is_empty() {
                None
            } else {
                Some(labels.into_iter().collect())
            };
            let project = projects
                .update(&id, name.as_deref(), labels)
                .await?
                .ok_or_else(|| not_found(&id))?;
            println!("{}", formatter.format_project(&project));
        }
        ProjectCommands::Delete { id, yes } => {
            if !yes
                && !confirm(
                    &format!("Delete project {id} with all its clusters? Type 'delete' to confirm: "),
                    "delete",
                )?
            {
                eprintln!("Deletion cancelled.");
                return Ok(());
            }
            projects.delete(&id).await?;
            println!("{}", formatter.success(&format!("Deleted project {id}")));
        }
    }

    Ok(())
}

/// Project SSH key commands.
async fn cmd_key(ctx: &Context, command: KeyCommands, formatter: &OutputFormatter) -> Result<()> {
    let keys = SshKeyManager::new(ctx.client()?);
    let default_project = || ctx.manifest.cluster.project_id.clone();

    match command {
        KeyCommands::Create {
            name,
            public_key_file,
            project,
        } => {
            let project = project.unwrap_or_else(default_project);
            let public_key = tokio::fs::read_to_string(&public_key_file).await?;
            let id = keys.create(&project, &name, &public_key).await?;
            println!("{}", formatter.success(&format!("Created SSH key {name} (ID: {id})")));
        }
        KeyCommands::Show {
            id,
            public_key_file,
            project,
        } => {
            let project = project.unwrap_or_else(default_project);
            let key = keys.read(&project, &id).await?.ok_or_else(|| {
                MetaKubeError::Api(ApiError::NotFound {
                    path: format!("/api/v1/projects/{project}/sshkeys/{id}"),
                })
            })?;
            let matches_local = match public_key_file {
                Some(path) => {
                    let local = tokio::fs::read_to_string(&path).await?;
                    Some(same_public_key(&local, &key.spec.public_key))
                }
                None => None,
            };
            println!("{}", formatter.format_key(&key, matches_local));
        }
        KeyCommands::Delete { id, project } => {
            let project = project.unwrap_or_else(default_project);
            keys.delete(&project, &id).await?;
            println!("{}", formatter.success(&format!("Deleted SSH key {id}")));
        }
    }

    Ok(())
}

/// Local state commands.
async fn cmd_state(ctx: &Context, command: StateCommands, formatter: &OutputFormatter) -> Result<()> {
    match command {
        StateCommands::Show => {
            let state = ctx.store.load().await?;
            let lock = ctx.store.lock_info().await?;
            println!(
                "{}",
                formatter.format_state(&ctx.store.location(), state.as_ref(), lock.as_ref())
            );
        }
        StateCommands::Unlock { force } => match ctx.store.lock_info().await? {
            None => println!("{}", formatter.warning("State is not locked.")),
            Some(lock) if !lock.is_expired() && !force => {
                return Err(MetaKubeError::State(StateError::LockedByOther {
                    holder: lock.holder,
                    since: lock.acquired_at.to_rfc3339(),
                }));
            }
            Some(_) => {
                if let Some(removed) = ctx.store.force_unlock().await? {
                    debug!("Removed lock {} held by {}", removed.lock_id, removed.holder);
                }
                println!("{}", formatter.success("State unlocked."));
            }
        },
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads `.env` and the manifest with environment overrides.
fn load_manifest(config_file: &Path) -> Result<Manifest> {
    let parser = ConfigParser::new().with_base_path(manifest_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads and validates the manifest and opens the state store next to it.
fn load_context(config_path: Option<&Path>, cancel: CancellationToken) -> Result<Context> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let manifest = load_manifest(&config_file)?;
    ConfigValidator::new().validate(&manifest)?;

    let store = LocalStateStore::with_base_dir(manifest_dir(&config_file).join(&manifest.state.dir));

    Ok(Context {
        manifest,
        store,
        cancel,
    })
}

fn manifest_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Prompts on stderr and compares the answer with `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

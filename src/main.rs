//! kdo CLI entrypoint.
//!
//! This is the main entrypoint for the kdo command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use kdo::backend::kube::Kubectl;
use kdo::backend::{
    Backend, BackendKind, ComponentHandle, DockerBackend, KubeBackend, component_labels,
};
use kdo::cli::{Cli, Commands, OutputFormatter};
use kdo::config::{ConfigLoader, KdoConfig};
use kdo::devfile::{Devfile, DevfileParser, DevfileValidator, GroupKind, find_devfile};
use kdo::error::{CommandError, Result};
use kdo::reconciler::{PushOptions, Reconciler};
use kdo::runner::CommandRunner;
use kdo::state::LocalStateStore;

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => code,
        Err(e) => {
            eprint!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let context = cli.context.as_path();

    let mut config = ConfigLoader::new(context).load(|name| std::env::var(name).ok())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if cli.namespace.is_some() {
        config.namespace.clone_from(&cli.namespace);
    }
    debug!("Using {} backend", config.backend);

    let name = match &cli.command {
        Commands::Push { name, .. } => name.clone(),
        _ => None,
    };
    let devfile = load_devfile(context, cli.devfile.as_deref(), name)?;

    if matches!(cli.command, Commands::Validate) {
        print!("{}", formatter.format_devfile(&devfile));
        return Ok(ExitCode::SUCCESS);
    }

    let backend = build_backend(&config)?;
    let store = LocalStateStore::for_context(context);
    let options = cli.command.push_options();

    match cli.command {
        Commands::Push { .. } => {
            cmd_push(backend.as_ref(), &store, &devfile, context, &config, &options, formatter).await
        }
        Commands::Status => cmd_status(backend.as_ref(), &store, &devfile, context, formatter).await,
        Commands::Exec { command_id } => {
            let handle = running_handle(backend.as_ref(), &devfile, &config).await?;
            let mut runner = CommandRunner::new(backend.as_ref(), &devfile);
            runner.run(&command_id.to_lowercase(), &handle).await?;
            print!("{}", formatter.success(&format!("Executed {command_id}")));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Test { test_command } => {
            let handle = running_handle(backend.as_ref(), &devfile, &config).await?;
            let id = test_command.map(|id| id.to_lowercase());
            let mut runner = CommandRunner::new(backend.as_ref(), &devfile);
            runner.run_group(GroupKind::Test, id.as_deref(), &handle).await?;
            print!("{}", formatter.success("Tests passed"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Logs { container } => {
            cmd_logs(backend.as_ref(), &devfile, &config, container, formatter).await
        }
        Commands::Delete { yes } => {
            cmd_delete(backend.as_ref(), &store, &devfile, context, yes, formatter).await
        }
        Commands::Validate => Ok(ExitCode::SUCCESS),
    }
}

/// Locates, parses and validates the devfile.
fn load_devfile(context: &Path, path: Option<&Path>, name: Option<String>) -> Result<Devfile> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => find_devfile(context)?,
    };
    let devfile = DevfileParser::new().with_name(name).load_file(&path)?;
    DevfileValidator::new().validate(&devfile)?;
    Ok(devfile)
}

/// Builds the configured backend.
fn build_backend(config: &KdoConfig) -> Result<Box<dyn Backend>> {
    Ok(match config.backend {
        BackendKind::Docker => Box::new(
            DockerBackend::new(&config.docker_host)?
                .with_bootstrap_image(config.bootstrap_image.clone()),
        ),
        BackendKind::Kubernetes => Box::new(
            KubeBackend::new(Kubectl::new(config.kubectl.clone(), config.namespace.clone()))
                .with_bootstrap_image(config.bootstrap_image.clone()),
        ),
    })
}

/// Waits for the running instance of the component.
async fn running_handle(
    backend: &dyn Backend,
    devfile: &Devfile,
    config: &KdoConfig,
) -> Result<ComponentHandle> {
    backend
        .watch_until_running(&component_labels(&devfile.name), config.watch_timeout())
        .await
}

/// Push the component.
async fn cmd_push(
    backend: &dyn Backend,
    store: &LocalStateStore,
    devfile: &Devfile,
    context: &Path,
    config: &KdoConfig,
    options: &PushOptions,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let report = Reconciler::new(backend, store, devfile, context)
        .with_watch_timeout(config.watch_timeout())
        .push(options)
        .await;

    print!("{}", formatter.format_push(&report));
    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show drift between the devfile and the component.
async fn cmd_status(
    backend: &dyn Backend,
    store: &LocalStateStore,
    devfile: &Devfile,
    context: &Path,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let report = Reconciler::new(backend, store, devfile, context)
        .check_drift()
        .await?;
    print!("{}", formatter.format_drift(&report));
    Ok(ExitCode::SUCCESS)
}

/// Print a container log.
async fn cmd_logs(
    backend: &dyn Backend,
    devfile: &Devfile,
    config: &KdoConfig,
    container: Option<String>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let container = container
        .or_else(|| {
            devfile
                .default_command(GroupKind::Run)
                .and_then(|c| c.as_exec())
                .map(|exec| exec.component.clone())
        })
        .ok_or_else(|| CommandError::DefaultNotFound {
            kind: GroupKind::Run.to_string(),
        })?;

    let handle = running_handle(backend, devfile, config).await?;
    let log = backend.logs(&handle, &container).await?;
    print!("{}", formatter.text("log", &log));
    Ok(ExitCode::SUCCESS)
}

/// Delete the component.
async fn cmd_delete(
    backend: &dyn Backend,
    store: &LocalStateStore,
    devfile: &Devfile,
    context: &Path,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let component = devfile.name.as_str();
    let reconciler = Reconciler::new(backend, store, devfile, context);
    if !backend.exists(component).await? {
        eprintln!("Component {component} does not exist.");
        reconciler.delete().await?;
        return Ok(ExitCode::SUCCESS);
    }

    // Confirm
    if !auto_approve {
        eprint!("Delete component {component} and its volumes? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !matches!(input.trim(), "y" | "Y" | "yes") {
            eprintln!("Deletion cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    reconciler.delete().await?;
    print!("{}", formatter.success(&format!("Deleted component {component}")));
    Ok(ExitCode::SUCCESS)
}

//! Command tree construction and top-level dispatch.
//!
//! The tree is assembled at startup from the operation catalog plus the
//! builtin command groups the embedded configuration enables. Exit
//! codes: 0 success, 1 runtime failure, 2 configuration or validation
//! failure, 130 after an interrupt.

use crate::auth::{AuthenticatedTransport, EnvTokenAuthenticator};
use crate::catalog::StaticCatalog;
use crate::commands;
use crate::context::AppContext;
use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use cliforge_core::config::{capture_env, AppConfig, ComposedConfig, ConfigComposer};
use cliforge_core::error::{CliforgeError, ConfigError};
use cliforge_core::paths;
use cliforge_core::traits::{HttpTransport, OperationCatalog, ReqwestTransport};
use cliforge_core::types::OperationSpec;
use cliforge_core::utils::parse_duration;
use log::debug;
use owo_colors::OwoColorize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const EXIT_RUNTIME: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_INTERRUPT: i32 = 130;

/// Entry point for the bundled binary
pub async fn run() -> Result<()> {
    run_branded(
        include_str!("../assets/embedded.yaml").as_bytes(),
        include_str!("../assets/operations.yaml"),
    )
    .await
}

/// Entry point for generated binaries carrying their own embedded
/// configuration and operation catalog.
pub async fn run_branded(embedded: &[u8], catalog_yaml: &str) -> Result<()> {
    let code = dispatch(embedded, catalog_yaml).await;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn dispatch(embedded: &[u8], catalog_yaml: &str) -> i32 {
    // The app identity comes from the embedded document; everything
    // else waits for the full composition.
    let identity: AppConfig = match serde_yaml::from_slice(embedded) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: embedded configuration is invalid: {}", "error".red(), e);
            return EXIT_CONFIG;
        }
    };
    let app = identity.metadata.name.clone();
    let env_prefix = app.to_uppercase().replace('-', "_");

    let catalog = match StaticCatalog::from_yaml(catalog_yaml) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("{}: {}", "error".red(), e);
            return EXIT_CONFIG;
        }
    };

    let composer = ConfigComposer::new(env_prefix.clone());
    let env_vars = capture_env(&env_prefix);
    let user_path = paths::user_config_path(&app, &env_prefix);
    let composed = match composer.compose(embedded, &user_path, &HashMap::new(), &env_vars) {
        Ok(composed) => composed,
        Err(e) => {
            eprintln!("{}: {}", "error".red(), e);
            return EXIT_CONFIG;
        }
    };

    let cli = build_cli(&composed.config, &catalog);
    let matches = cli.get_matches();

    init_logging(&matches);

    // Re-compose when the invocation overrides the user file or flags.
    let flag_overrides = flag_override_paths(&matches);
    let custom_config = string_arg(&matches, "config");
    let composed = if custom_config.is_some() || !flag_overrides.is_empty() {
        let user_path = custom_config
            .map(std::path::PathBuf::from)
            .unwrap_or(user_path);
        match composer.compose(embedded, &user_path, &flag_overrides, &env_vars) {
            Ok(composed) => composed,
            Err(e) => {
                eprintln!("{}: {}", "error".red(), e);
                return EXIT_CONFIG;
            }
        }
    } else {
        composed
    };

    for warning in &composed.warnings {
        eprintln!("{}: {}", "warning".yellow(), warning);
    }
    print_debug_banner(&composed);

    let profile = string_arg(&matches, "profile");
    let base_url = match composed.base_url_for_profile(profile.as_deref()) {
        Ok(base_url) => base_url,
        Err(e) => {
            eprintln!("{}: {}", "error".red(), e);
            return EXIT_CONFIG;
        }
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let context = match build_app_context(&app, &env_prefix, &composed, base_url, profile, cancel.clone()) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("{}: {}", "error".red(), e);
            return EXIT_CONFIG;
        }
    };

    let verbose = flag_set(&matches, "verbose") || flag_set(&matches, "debug");
    let result = route(&matches, &catalog, &context).await;

    match result {
        Ok(code) => {
            if cancel.is_cancelled() {
                EXIT_INTERRUPT
            } else {
                code
            }
        }
        Err(e) => {
            report_error(&e, verbose);
            if cancel.is_cancelled() {
                EXIT_INTERRUPT
            } else {
                classify_error(&e)
            }
        }
    }
}

async fn route(matches: &ArgMatches, catalog: &StaticCatalog, context: &AppContext) -> Result<i32> {
    match matches.subcommand() {
        Some(("workflow", sub)) => commands::workflow::execute(sub, context).await,
        Some(("cache", sub)) => commands::cache::execute(sub, context),
        Some(("config", sub)) => commands::config_cmd::execute(sub, context),
        Some((name, sub)) => match find_operation(catalog, name) {
            Some(operation) => commands::operation::execute(operation, sub, context).await,
            None => {
                eprintln!("{}: unknown command '{}'", "error".red(), name);
                Ok(EXIT_CONFIG)
            }
        },
        None => Ok(EXIT_CONFIG),
    }
}

fn find_operation<'a>(catalog: &'a StaticCatalog, command: &str) -> Option<&'a OperationSpec> {
    catalog
        .operations()
        .iter()
        .find(|op| command_name(op) == command)
}

pub fn command_name(operation: &OperationSpec) -> String {
    operation
        .cli_command
        .clone()
        .unwrap_or_else(|| operation.operation_id.clone())
}

/// Assemble the clap command tree from configuration and catalog
pub fn build_cli(config: &AppConfig, catalog: &StaticCatalog) -> Command {
    let mut cli = Command::new(config.metadata.name.clone())
        .version(config.metadata.version.clone())
        .about(
            config
                .metadata
                .description
                .clone()
                .unwrap_or_else(|| config.metadata.display_name.clone().unwrap_or_default()),
        )
        .arg_required_else_help(true);

    let flags = &config.behaviors.global_flags;
    if flags.output {
        cli = cli.arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("FORMAT")
                .global(true)
                .help("Output format: json, yaml, table or raw"),
        );
    }
    if flags.verbose {
        cli = cli.arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Verbose logging"),
        );
    }
    if flags.debug {
        cli = cli.arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Debug logging and full error chains"),
        );
    }
    if flags.no_color {
        cli = cli.arg(
            Arg::new("no-color")
                .long("no-color")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Disable colored output"),
        );
    }
    if flags.config {
        cli = cli.arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to the user configuration file"),
        );
    }
    if flags.profile {
        cli = cli.arg(
            Arg::new("profile")
                .long("profile")
                .value_name("NAME")
                .global(true)
                .help("API environment to target"),
        );
    }

    let builtin = &config.behaviors.builtin_commands;
    if builtin.workflow && config.features.workflows {
        cli = cli.subcommand(commands::workflow::command());
    }
    if builtin.cache {
        cli = cli.subcommand(commands::cache::command());
    }
    if builtin.config {
        cli = cli.subcommand(commands::config_cmd::command());
    }

    for operation in catalog.operations() {
        cli = cli.subcommand(operation_command(operation));
    }
    cli
}

fn operation_command(operation: &OperationSpec) -> Command {
    let mut command = Command::new(command_name(operation)).about(format!(
        "{} {}",
        operation.method.to_uppercase(),
        operation.path
    ));
    for parameter in &operation.parameters {
        let mut arg = Arg::new(parameter.name.clone())
            .long(parameter.name.replace('_', "-"))
            .value_name(parameter.name.to_uppercase());
        if let Some(description) = &parameter.description {
            arg = arg.help(description.clone());
        }
        if parameter.required {
            arg = arg.required(true);
        }
        command = command.arg(arg);
    }
    for flag in &operation.cli_flags {
        let mut arg = Arg::new(flag.name.clone())
            .long(flag.name.replace('_', "-"))
            .value_name(flag.name.to_uppercase());
        if let Some(description) = &flag.description {
            arg = arg.help(description.clone());
        }
        command = command.arg(arg);
    }
    if operation.workflow.is_some() {
        command = command.arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Print the execution plan without running it"),
        );
    }
    if operation.watch.is_some() {
        command = command.arg(
            Arg::new("watch")
                .long("watch")
                .action(ArgAction::SetTrue)
                .help("Stream live status events after the operation"),
        );
    }
    command
}

fn init_logging(matches: &ArgMatches) {
    let default_filter = if flag_set(matches, "debug") {
        "debug"
    } else if flag_set(matches, "verbose") {
        "info"
    } else {
        "warn"
    };
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Flag lookup tolerating configurations that removed the flag
fn flag_set(matches: &ArgMatches, id: &str) -> bool {
    matches
        .try_get_one::<bool>(id)
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false)
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

/// Dotted-path overrides carried by global flags (priority just below
/// environment variables).
fn flag_override_paths(matches: &ArgMatches) -> HashMap<String, Value> {
    let mut overrides = HashMap::new();
    if let Some(format) = string_arg(matches, "output") {
        overrides.insert("defaults.output.format".to_string(), json!(format));
    }
    if flag_set(matches, "no-color") {
        overrides.insert("defaults.output.color".to_string(), json!("never"));
    }
    overrides
}

fn print_debug_banner(composed: &ComposedConfig) {
    if composed.active_overrides.is_empty() {
        return;
    }
    eprintln!("{}", "================ DEBUG BUILD ================".yellow().bold());
    eprintln!("{}", "active configuration overrides:".yellow());
    for path in &composed.active_overrides {
        eprintln!("  {}", path.yellow());
    }
    eprintln!("{}", "=============================================".yellow().bold());
}

fn build_app_context(
    app: &str,
    env_prefix: &str,
    composed: &ComposedConfig,
    base_url: String,
    profile: Option<String>,
    cancel: CancellationToken,
) -> Result<AppContext> {
    let timeout = parse_duration(&composed.config.defaults.http.timeout)
        .unwrap_or_else(|_| Duration::from_secs(30));
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(timeout)?);
    let transport: Arc<dyn HttpTransport> = if composed.config.behaviors.auth.kind == "none" {
        transport
    } else {
        let authenticator = Arc::new(EnvTokenAuthenticator::new(
            composed.config.behaviors.auth.clone(),
            env_prefix,
        ));
        Arc::new(AuthenticatedTransport::new(transport, authenticator, profile.clone()))
    };

    debug!("base URL: {}", base_url);
    Ok(AppContext::new(
        app.to_string(),
        composed.clone(),
        transport,
        base_url,
        profile,
        cancel,
    ))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, cleaning up...");
            cancel.cancel();
        }
    });
}

fn report_error(error: &anyhow::Error, verbose: bool) {
    eprintln!("{}: {}", "error".red(), error);
    if verbose {
        for (depth, cause) in error.chain().skip(1).enumerate() {
            eprintln!("  {}: {}", depth, cause);
        }
    }
}

fn classify_error(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<CliforgeError>() {
        Some(CliforgeError::Config(_)) | Some(CliforgeError::Workflow(_)) => EXIT_CONFIG,
        Some(_) => EXIT_RUNTIME,
        None => {
            if error.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG
            } else {
                EXIT_RUNTIME
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_config() -> AppConfig {
        serde_yaml::from_str(include_str!("../assets/embedded.yaml")).unwrap()
    }

    #[test]
    fn command_tree_includes_operations_and_builtins() {
        let catalog = StaticCatalog::from_yaml(include_str!("../assets/operations.yaml")).unwrap();
        let cli = build_cli(&demo_config(), &catalog);
        let names: Vec<&str> = cli.get_subcommands().map(|c| c.get_name()).collect();
        assert!(names.contains(&"workflow"));
        assert!(names.contains(&"cache"));
        assert!(names.contains(&"config"));
        assert!(names.contains(&"projects-list"));
        assert!(names.contains(&"projects-deploy"));
    }

    #[test]
    fn required_path_parameters_are_required_args() {
        let catalog = StaticCatalog::from_yaml(include_str!("../assets/operations.yaml")).unwrap();
        let cli = build_cli(&demo_config(), &catalog);
        let get = cli
            .get_subcommands()
            .find(|c| c.get_name() == "projects-get")
            .unwrap();
        let arg = get
            .get_arguments()
            .find(|a| a.get_id() == "project_id")
            .unwrap();
        assert!(arg.is_required_set());
    }

    #[test]
    fn error_classification() {
        let config_err: anyhow::Error = CliforgeError::Config(ConfigError::UnknownProfile("qa".into())).into();
        assert_eq!(classify_error(&config_err), EXIT_CONFIG);
        let runtime_err: anyhow::Error =
            CliforgeError::Cancelled("workflow".to_string()).into();
        assert_eq!(classify_error(&runtime_err), EXIT_RUNTIME);
        let anon = anyhow::anyhow!("boom");
        assert_eq!(classify_error(&anon), EXIT_RUNTIME);
    }
}

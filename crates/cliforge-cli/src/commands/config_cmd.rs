//! Builtin `config` command group: introspection of the merged tree.

use crate::cli::EXIT_CONFIG;
use crate::context::AppContext;
use anyhow::Result;
use clap::{ArgMatches, Command};
use cliforge_core::paths;

pub fn command() -> Command {
    Command::new("config")
        .about("Inspect the effective configuration")
        .subcommand_required(true)
        .subcommand(Command::new("show").about("Print the merged configuration"))
        .subcommand(Command::new("path").about("Print the user configuration file location"))
}

pub fn execute(matches: &ArgMatches, context: &AppContext) -> Result<i32> {
    match matches.subcommand() {
        Some(("show", _)) => {
            println!("{}", serde_yaml::to_string(&context.composed.config)?);
            Ok(0)
        }
        Some(("path", _)) => {
            let env_prefix = context.app.to_uppercase().replace('-', "_");
            println!(
                "{}",
                paths::user_config_path(&context.app, &env_prefix).display()
            );
            Ok(0)
        }
        _ => Ok(EXIT_CONFIG),
    }
}

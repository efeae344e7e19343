//! Builtin `cache` command group over the spec cache.

use crate::cli::EXIT_CONFIG;
use crate::context::AppContext;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use cliforge_core::cache::{FileSpecCache, SpecCache};
use cliforge_core::paths;
use cliforge_core::utils::parse_duration;
use std::time::Duration;

pub fn command() -> Command {
    Command::new("cache")
        .about("Manage the cached OpenAPI documents")
        .subcommand_required(true)
        .subcommand(Command::new("clear").about("Remove every cache entry"))
        .subcommand(
            Command::new("prune")
                .about("Remove entries older than the caching TTL")
                .arg(
                    Arg::new("older-than")
                        .long("older-than")
                        .value_name("DURATION")
                        .help("Override the configured TTL"),
                ),
        )
}

pub fn execute(matches: &ArgMatches, context: &AppContext) -> Result<i32> {
    let cache = FileSpecCache::new(paths::cache_home(&context.app));
    match matches.subcommand() {
        Some(("clear", _)) => {
            let removed = cache.clear().map_err(cliforge_core::error::CliforgeError::Cache)?;
            println!("removed {} cache entrie(s)", removed);
            Ok(0)
        }
        Some(("prune", sub)) => {
            let ttl = match sub.get_one::<String>("older-than") {
                Some(raw) => parse_duration(raw)?,
                None => parse_duration(&context.composed.config.behaviors.caching.ttl)
                    .unwrap_or(Duration::from_secs(24 * 3600)),
            };
            let removed = cache.prune(ttl).map_err(cliforge_core::error::CliforgeError::Cache)?;
            println!("removed {} cache entrie(s)", removed);
            Ok(0)
        }
        _ => Ok(EXIT_CONFIG),
    }
}

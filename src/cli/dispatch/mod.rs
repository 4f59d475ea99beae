use crate::cli::actions::Action;
use anyhow::{Context, Result};
use std::time::Duration;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let sub_m = |subcommand| -> Result<&clap::ArgMatches> {
        matches
            .subcommand_matches(subcommand)
            .context("arguments not found")
    };

    match matches.subcommand_name() {
        Some("check") => {
            let matches = sub_m("check")?;
            Ok(Action::Check {
                route: matches
                    .get_one("route")
                    .map(|s: &String| s.to_string())
                    .ok_or_else(|| anyhow::anyhow!("missing required argument: --route"))?,
                max_attempts: matches.get_one::<u32>("max-attempts").copied().unwrap_or(10),
                poll_interval: Duration::from_millis(
                    matches
                        .get_one::<u64>("poll-interval-ms")
                        .copied()
                        .unwrap_or(500),
                ),
            })
        }
        _ => Err(anyhow::anyhow!("no subcommand provided")),
    }
}

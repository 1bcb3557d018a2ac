use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use git_msync::cancel::CancelToken;
use git_msync::cli::CliArgs;
use git_msync::config::Config;
use git_msync::engine::Engine;

const EXIT_CONFIG_ERROR: u8 = 2;

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    init_tracing(cli_args.verbose);

    match run(&cli_args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli_args: &CliArgs) -> Result<u8> {
    let config = Config::from_cli_and_file(cli_args).context("Failed to load configuration")?;
    let roots = config.expanded_roots();
    let flags = config.sync_flags();
    info!("syncing {} roots with {} workers", roots.len(), flags.jobs);

    let cancel = CancelToken::new();
    watch_for_interrupt(cancel.clone());

    let engine = Engine::system(config.github.protocol).with_cancel(cancel);

    let mut declared = config.declared_repos();
    if config.github.enabled {
        match roots.first() {
            Some(root) => declared.extend(engine.hosted_repos(
                root,
                config.github.owner.as_deref(),
                config.github.limit,
                flags.repo_timeout,
            )),
            None => warn!("GitHub listing enabled but no root to clone into"),
        }
    }

    let report = engine.run(&roots, &declared, &flags);
    print!("{}", report.render());

    Ok(u8::try_from(report.exit_code()).unwrap_or(1))
}

/// Ctrl-C cancels the run; in-flight git processes are killed and the report still prints.
fn watch_for_interrupt(cancel: CancelToken) {
    let spawned = thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("cannot watch for Ctrl-C: {}", e);
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    if let Err(e) = spawned {
        warn!("cannot watch for Ctrl-C: {}", e);
    }
}

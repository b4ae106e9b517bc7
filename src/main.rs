use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use deimos::{
    config::RunConfig,
    output,
    pipeline::{Pipeline, RunContext},
    target, ReconError,
};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// Exit status after Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

fn build_cli() -> Command {
    Command::new("deimos")
        .version(env!("CARGO_PKG_VERSION"))
        .author("ibrahimsql")
        .about("Deimos: bounded reconnaissance pipeline for authorized targets")
        .arg(
            Arg::new("domain")
                .short('d')
                .long("domain")
                .value_name("TARGET")
                .help("Target domain, host, IP address or URL"),
        )
        .arg(
            Arg::new("confirm")
                .short('c')
                .long("confirm")
                .help("Confirm you are authorized to scan the target")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output root directory [default: ./output]"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECONDS")
                .help("Per-tool timeout in seconds [default: 300]")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .value_name("N")
                .help("Parallel jobs for fan-out stages [default: 4]")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file [default: ~/.deimos.toml]"),
        )
        .arg(
            Arg::new("wordlist")
                .short('w')
                .long("wordlist")
                .value_name("FILE")
                .help("Wordlist for directory discovery"),
        )
        .arg(
            Arg::new("severity")
                .long("severity")
                .value_name("LIST")
                .help("nuclei severity filter [default: medium,high,critical]"),
        )
        .arg(
            Arg::new("top-ports")
                .long("top-ports")
                .value_name("N")
                .help("Number of top ports for the port scan [default: 1000]")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("deadline")
                .long("deadline")
                .value_name("SECONDS")
                .help("Stop the whole run after this many seconds, keeping partial results")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("no-banner")
                .long("no-banner")
                .help("Hide the banner")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
}

/// Layer CLI flags over the file configuration
fn load_config(matches: &ArgMatches) -> deimos::Result<RunConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => RunConfig::from_toml_file(path)?,
        None => RunConfig::load_default_config()?,
    };

    if let Some(dir) = matches.get_one::<String>("output") {
        config.output_root = PathBuf::from(dir);
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config.timeout = timeout;
    }
    if let Some(&jobs) = matches.get_one::<usize>("jobs") {
        config.jobs = jobs;
    }
    if let Some(wordlist) = matches.get_one::<String>("wordlist") {
        config.wordlist = Some(PathBuf::from(wordlist));
    }
    if let Some(severity) = matches.get_one::<String>("severity") {
        config.severity = severity.clone();
    }
    if let Some(&top_ports) = matches.get_one::<u16>("top-ports") {
        config.top_ports = top_ports;
    }
    if let Some(&deadline) = matches.get_one::<u64>("deadline") {
        config.deadline = Some(deadline);
    }
    config.verbose |= matches.get_flag("verbose");

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .init();
}

/// Fire `cancel` on Ctrl-C and when the optional deadline passes
fn spawn_cancellation(cancel: &CancellationToken, deadline: Option<Duration>) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));

    let token = cancel.clone();
    let flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "\n[!] Interrupted, stopping running tools...".bright_yellow());
            flag.store(true, Ordering::SeqCst);
            token.cancel();
        }
    });

    if let Some(deadline) = deadline {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    warn!("Run deadline of {}s reached, cancelling remaining work", deadline.as_secs());
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }

    interrupted
}

async fn run() -> anyhow::Result<i32> {
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return Ok(code);
        }
    };

    if matches.get_flag("no-color") {
        colored::control::set_override(false);
    }

    // Both pre-run checks happen before any file or socket is touched.
    // Authorization comes first: without -c the exit status is always 2.
    if !matches.get_flag("confirm") {
        return Err(ReconError::AuthorizationMissing.into());
    }

    let raw_target = matches
        .get_one::<String>("domain")
        .ok_or_else(|| ReconError::InvalidTarget("no target given, use -d <TARGET>".to_string()))?;
    let target = target::resolve(raw_target)?;

    let config = load_config(&matches)?;
    init_logging(config.verbose);
    debug!("Configuration: {:?}", config);

    if !matches.get_flag("no-banner") {
        output::print_banner();
    }
    println!(
        "{} {} ({})",
        "[~] Target:".bright_blue(),
        target.host.bright_cyan().bold(),
        target.base_url
    );

    let cancel = CancellationToken::new();
    let interrupted = spawn_cancellation(&cancel, config.deadline_duration());

    let ctx = RunContext::new(target, config, cancel);
    let pipeline = Pipeline::new(ctx)?.with_progress(true);
    println!(
        "{} {}",
        "[~] Results:".bright_blue(),
        pipeline.store().run_dir().display()
    );

    let summary = pipeline.run().await?;
    output::print_summary(&summary);

    if interrupted.load(Ordering::SeqCst) {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(0)
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "[!]".bright_red(), e);
            match e.downcast_ref::<ReconError>() {
                Some(err) => {
                    if err.is_pre_run() {
                        eprintln!("    Usage: deimos -d <TARGET> -c [OPTIONS], see --help");
                    }
                    err.exit_code()
                }
                None => 1,
            }
        }
    };
    process::exit(code);
}

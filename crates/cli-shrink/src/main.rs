use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use humansize::{format_size, DECIMAL};
use log::{debug, error, info};
use shrink::{
    config::ShrinkConfig,
    preflight, quarantine, report, scan,
    signal::{spawn_interrupt_listener, INTERRUPTED_EXIT_CODE},
    CommandEncoder, Scheduler, ShrinkError,
};
use tokio_util::sync::CancellationToken;

/// Batch image and video compressor with a reversible quarantine for originals
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Prefix for quarantine directory names
    #[arg(long, global = true)]
    quarantine_prefix: Option<String>,

    /// Directory in which quarantine directories live
    #[arg(long, global = true)]
    quarantine_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Permanently delete a quarantine directory
    Purge {
        /// Quarantine directory name, e.g. trash-20240101-123456
        name: String,
        /// Repeat the directory name to confirm deletion
        #[arg(long)]
        confirm: String,
    },
    /// List quarantine directories and their contents
    ListQuarantine,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Files or directories to process (default: current directory)
    paths: Vec<PathBuf>,

    /// Number of files processed at once
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Show what would be done without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Regenerate compressed files that already exist
    #[arg(short, long)]
    force: bool,

    /// Delete originals instead of moving them to quarantine
    #[arg(long)]
    delete_originals: bool,

    /// Process images and videos together instead of images first
    #[arg(long)]
    interleaved: bool,

    /// Print a line for every skipped file
    #[arg(long)]
    show_skips: bool,

    /// Always show ETA, even for fast jobs
    #[arg(long)]
    always_show_eta: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
}

fn apply_overrides(cfg: &mut ShrinkConfig, args: &Args) {
    if let Some(prefix) = &args.quarantine_prefix {
        cfg.quarantine_prefix = prefix.clone();
    }
    if let Some(root) = &args.quarantine_root {
        cfg.quarantine_root = root.clone();
    }

    let run = &args.run;
    if let Some(jobs) = run.jobs {
        cfg.concurrency = jobs;
    }
    cfg.dry_run |= run.dry_run;
    cfg.recursive |= run.recursive;
    cfg.force |= run.force;
    cfg.delete_originals |= run.delete_originals;
    cfg.interleaved |= run.interleaved;
    cfg.show_skips |= run.show_skips;
    cfg.always_show_eta |= run.always_show_eta;
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match run(args).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!("{:#}", e);
            let code = e.downcast_ref::<ShrinkError>().map(|s| s.exit_code()).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(args: Args) -> Result<i32> {
    let mut cfg = ShrinkConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&mut cfg, &args);
    cfg.validate()?;
    debug!("Configuration: {:?}", cfg);

    match &args.command {
        Some(Command::Purge { name, confirm }) => {
            let occ = quarantine::purge_quarantine(&cfg.quarantine_root, &cfg.quarantine_prefix, name, confirm)?;
            println!("Deleted {} ({} files, {})", name, occ.files, format_size(occ.bytes, DECIMAL));
            Ok(0)
        }
        Some(Command::ListQuarantine) => {
            let listings = quarantine::list_quarantines(&cfg.quarantine_root, &cfg.quarantine_prefix)?;
            if listings.is_empty() {
                println!("No quarantine directories in {}", cfg.quarantine_root.display());
            }
            for listing in listings {
                println!(
                    "{}  {} files  {}",
                    listing.name,
                    listing.occupancy.files,
                    format_size(listing.occupancy.bytes, DECIMAL)
                );
            }
            Ok(0)
        }
        None => run_batch(cfg, &args.run).await,
    }
}

async fn run_batch(cfg: ShrinkConfig, run_args: &RunArgs) -> Result<i32> {
    let inputs = if run_args.paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        run_args.paths.clone()
    };

    let candidates = tokio::task::spawn_blocking({
        let cfg = cfg.clone();
        move || scan::discover(&inputs, &cfg)
    })
    .await
    .context("Discovery task failed")?;

    if candidates.is_empty() {
        info!("No images or videos found");
    }

    preflight::check_tools(&cfg, &candidates).await?;

    let cancel = CancellationToken::new();
    let listener = spawn_interrupt_listener(cancel.clone());

    let encoder = Arc::new(CommandEncoder::from_config(&cfg));
    let json = run_args.json;
    let outcome = Scheduler::new(cfg, encoder).run(&candidates, cancel).await?;
    listener.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    } else {
        print!("{}", report::summary_text(&outcome.summary));
    }

    Ok(if outcome.interrupted { INTERRUPTED_EXIT_CODE } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "mshrink", "-j", "8", "--dry-run", "-r", "--quarantine-prefix", "old", "photos",
        ]);
        let mut cfg = ShrinkConfig::default();
        apply_overrides(&mut cfg, &args);

        assert_eq!(cfg.concurrency, 8);
        assert!(cfg.dry_run);
        assert!(cfg.recursive);
        assert!(!cfg.force);
        assert_eq!(cfg.quarantine_prefix, "old");
        assert_eq!(args.run.paths, vec![PathBuf::from("photos")]);
    }

    #[test]
    fn test_purge_subcommand_parses() {
        let args = Args::parse_from([
            "mshrink", "purge", "trash-20240101-10", "--confirm", "trash-20240101-10",
        ]);
        match args.command {
            Some(Command::Purge { name, confirm }) => assert_eq!(name, confirm),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

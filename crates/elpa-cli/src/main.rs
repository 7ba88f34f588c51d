use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use elpa_archive::{Archive, RebuildReport, RebuildSource};
use elpa_config::ElpaConfig;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "elpa", version, about = "Package archive indexer and server")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file (defaults to `ELPA_CONFIG_PATH`, then `elpa.toml` / `.elpa.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Repository root, overriding `archive.root`
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Cache directory, overriding `archive.store`
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the archive over HTTP
    Serve(ServeArgs),
    /// Load or build the index and report how it was obtained
    Index(IndexArgs),
    /// Print the `archive-contents` served to clients
    Contents,
    /// Drop the index and rebuild it
    Refresh(RefreshArgs),
    /// Show cache and index state without rebuilding
    Status(StatusArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on, overriding `server.bind`
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// URL prefix, overriding `server.prefix`
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Args)]
struct IndexArgs {
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RefreshArgs {
    /// Privilege level; above `archive.purge_threshold` the disk cache is deleted too
    #[arg(long, default_value_t = 0)]
    level: u32,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct IndexOutput {
    packages: usize,
    rebuild: Option<RebuildReport>,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let (config, config_path) = load_config(&cli.global)?;
    elpa_config::init_tracing(&config.logging);
    if let Some(path) = config_path {
        tracing::debug!(target: "elpa.config", path = %path.display(), "loaded config");
    }
    let archive = Archive::new(config.archive.to_options());

    match cli.command {
        Command::Serve(args) => {
            let mut server = config.server.clone();
            if let Some(bind) = args.bind {
                server.bind = bind;
            }
            if let Some(prefix) = args.prefix {
                server.prefix = prefix;
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(elpa_server::serve(archive, &server))?;
            Ok(0)
        }
        Command::Index(args) => {
            let snapshot = archive.snapshot();
            let output = IndexOutput {
                packages: snapshot.len(),
                rebuild: archive.status().last_rebuild,
            };
            print_index(&output, args.json)?;
            Ok(0)
        }
        Command::Contents => {
            print!("{}", archive.snapshot().render());
            Ok(0)
        }
        Command::Refresh(args) => {
            let snapshot = archive.refresh(args.level);
            let output = IndexOutput {
                packages: snapshot.len(),
                rebuild: archive.status().last_rebuild,
            };
            print_index(&output, args.json)?;
            Ok(0)
        }
        Command::Status(args) => {
            let status = archive.status();
            if args.json {
                print_json(&status)?;
            } else {
                println!("root: {}", status.root.display());
                println!("cache: {}", status.cache_path.display());
                println!("cache_stale: {}", status.cache_stale);
            }
            Ok(0)
        }
    }
}

fn load_config(global: &GlobalArgs) -> Result<(ElpaConfig, Option<PathBuf>)> {
    let (mut config, path) = match &global.config {
        Some(path) => (ElpaConfig::load_from_path(path)?, Some(path.clone())),
        None => {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            elpa_config::load_for_dir(&cwd)?
        }
    };
    if let Some(root) = &global.root {
        config.archive.root = root.clone();
    }
    if let Some(store) = &global.store {
        config.archive.store = store.clone();
    }
    Ok((config, path))
}

fn print_index(output: &IndexOutput, json: bool) -> Result<()> {
    if json {
        return print_json(output);
    }

    println!("packages: {}", output.packages);
    if let Some(report) = &output.rebuild {
        let source = match report.source {
            RebuildSource::Cache => "cache",
            RebuildSource::Scan => "scan",
        };
        println!("source: {source}");
        if report.source == RebuildSource::Scan {
            println!("discovered: {}", report.discovered);
            println!("skipped: {}", report.skipped);
        }
        println!("elapsed_ms: {}", report.duration_ms);
        if let Some(error) = &report.error {
            println!("error: {error}");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

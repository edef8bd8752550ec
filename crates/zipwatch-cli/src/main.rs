//! Zipwatch CLI - Serve a zip archive and a transformed copy of it
//!
//! Commands:
//! - zipwatch serve <archive> --port <p>        - Serve one archive
//! - zipwatch serve-zips <archive> --port <p> --modified-port <q>
//!                                              - Serve original + modified copy
//! - zipwatch run <config.json>                 - Same, options from a file

mod config;
mod logger;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{load_config, WatchConfig, ZipwatchConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;
use zipwatch_core::{clear_cache, load_edit_script, Edit, EditScript};
use zipwatch_daemon::{pipeline, run_and_watch, server, watch, ServeZips};

/// Zipwatch - serve zip archives over HTTP
#[derive(Parser)]
#[command(name = "zipwatch", version, about = "Serve zip archives and transformed copies")]
struct Cli {
    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one archive until interrupted
    Serve {
        /// Zip archive to serve
        archive: PathBuf,
        /// Port to listen on
        #[arg(short, long)]
        port: u16,
        /// Directory inside the archive to serve from
        #[arg(short, long, default_value = "")]
        root: String,
    },
    /// Serve an archive and a modified copy on a second port
    ServeZips(ServeZipsArgs),
    /// Serve an archive and a modified copy, options from a JSON file
    Run {
        /// Path to the config file
        config: PathBuf,
    },
}

#[derive(Args)]
struct ServeZipsArgs {
    /// Zip archive to serve
    archive: PathBuf,
    /// Port for the original archive
    #[arg(short, long)]
    port: u16,
    /// Port for the modified archive
    #[arg(short, long)]
    modified_port: u16,
    /// Directory inside the archive to serve from
    #[arg(short, long, default_value = "")]
    root: String,
    /// JSON edit script applied to the copy
    #[arg(short, long)]
    script: Option<PathBuf>,
    /// Entry to drop from the copy (repeatable)
    #[arg(long = "remove", value_name = "ENTRY")]
    remove: Vec<String>,
    /// Re-run whenever the archive or the script changes
    #[arg(short, long)]
    watch: bool,
    /// Quiet window before a re-run, in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout: u64,
    /// Event that triggers a re-run: add, change, unlink or all
    #[arg(long, default_value = "change")]
    event: String,
}

impl From<ServeZipsArgs> for ZipwatchConfig {
    fn from(args: ServeZipsArgs) -> Self {
        ZipwatchConfig {
            archive: args.archive,
            port: args.port,
            modified_port: args.modified_port,
            zip_root: args.root,
            script: args.script,
            edits: args
                .remove
                .into_iter()
                .map(|name| Edit::Remove { name })
                .collect(),
            watch: args.watch.then(|| WatchConfig {
                timeout_ms: args.timeout,
                event: args.event,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_logger(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Serve {
            archive,
            port,
            root,
        } => {
            server::serve(&archive, port, &root).await?;
            wait_for_shutdown().await
        }

        Commands::ServeZips(args) => {
            let config = ZipwatchConfig::from(args);
            config.validate()?;
            serve_zips(config).await
        }

        Commands::Run { config } => serve_zips(load_config(&config)?).await,
    }
}

type RerunFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Run the pipeline once, or keep re-running it on changes when watching
async fn serve_zips(config: ZipwatchConfig) -> Result<()> {
    let config = Arc::new(config);

    let Some(watch_config) = config.watch.clone() else {
        run_pipeline(&config).await?;
        return wait_for_shutdown().await;
    };
    let options = watch_config.options()?;

    let _archive_watch =
        run_and_watch(&config.archive, rerun(Arc::clone(&config), false), options).await?;

    let _script_watch = match &config.script {
        Some(script) => Some(watch(script, rerun(Arc::clone(&config), true), options)?),
        None => None,
    };

    wait_for_shutdown().await
}

/// Rerun callback; `reload_script` evicts the cached edit script first
fn rerun(
    config: Arc<ZipwatchConfig>,
    reload_script: bool,
) -> impl Fn(PathBuf) -> RerunFuture + Send + Sync + 'static {
    move |changed: PathBuf| {
        let config = Arc::clone(&config);
        let run: RerunFuture = Box::pin(async move {
            info!("Change detected: {}", changed.display());
            if reload_script {
                if let Some(script) = &config.script {
                    evict_script(script);
                }
            }
            run_pipeline(&config).await
        });
        run
    }
}

fn evict_script(script: &Path) {
    let target = std::fs::canonicalize(script).unwrap_or_else(|_| script.to_path_buf());
    clear_cache(|id| id == target.as_path());
}

async fn run_pipeline(config: &ZipwatchConfig) -> Result<()> {
    let mut script = match &config.script {
        Some(path) => load_edit_script(path)
            .with_context(|| format!("loading edit script {}", path.display()))?
            .as_ref()
            .clone(),
        None => EditScript::default(),
    };
    script.extend(config.edits.iter().cloned());

    let job = ServeZips {
        archive_path: config.archive.clone(),
        port: config.port,
        modified_port: config.modified_port,
        zip_root: config.zip_root.clone(),
        modifiers: Arc::new(script),
    };

    pipeline::serve_zips(&job).await?;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server::global().shutdown().await?;
    pipeline::global().clean_outputs().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_zips() {
        let cli = Cli::try_parse_from([
            "zipwatch",
            "serve-zips",
            "site.zip",
            "--port",
            "8080",
            "--modified-port",
            "8081",
            "--remove",
            "secret.txt",
            "--remove",
            "drafts/a.md",
            "--watch",
            "--timeout",
            "100",
        ])
        .unwrap();

        let Commands::ServeZips(args) = cli.command else {
            panic!("expected serve-zips");
        };
        let config = ZipwatchConfig::from(args);

        assert_eq!(config.archive, PathBuf::from("site.zip"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.modified_port, 8081);
        assert_eq!(
            config.edits,
            vec![
                Edit::Remove {
                    name: "secret.txt".into()
                },
                Edit::Remove {
                    name: "drafts/a.md".into()
                },
            ]
        );
        let watch = config.watch.unwrap();
        assert_eq!(watch.timeout_ms, 100);
        assert_eq!(watch.event, "change");
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["zipwatch", "-q", "serve", "a.zip", "-p", "9000"]).unwrap();
        assert!(cli.quiet);

        let Commands::Serve { port, root, .. } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(port, 9000);
        assert_eq!(root, "");
    }

    #[test]
    fn test_without_watch_flag() {
        let cli = Cli::try_parse_from([
            "zipwatch",
            "serve-zips",
            "a.zip",
            "-p",
            "1",
            "-m",
            "2",
        ])
        .unwrap();
        let Commands::ServeZips(args) = cli.command else {
            panic!("expected serve-zips");
        };
        assert!(ZipwatchConfig::from(args).watch.is_none());
    }
}

/*!
 * clouddeck CLI - Command Line Interface
 */

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use clouddeck::{
    cli_progress::UploadProgressBar,
    cli_style::{
        self, entries_table, format_bytes, format_duration, plan_table, print_error, print_info,
        print_success, stats_table, Icons, Theme,
    },
    config::{DeckConfig, LogLevel},
    error::{store_exit_code, DeckError, EXIT_PARTIAL, EXIT_SUCCESS},
    logging,
    protocol::s3::{
        explorer::DEFAULT_SHARE_EXPIRY,
        listing::folder_prefix,
        progress::ProgressReporter,
        ConnectionManager, ConnectionParams, Explorer, FileParamsStore, Lister, S3Error,
        S3StoreFactory, TransferRequest, Uploader,
    },
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Parser)]
#[command(name = "clouddeck")]
#[command(version, about = "Explore S3 buckets and upload files with adaptive multipart transfers", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/clouddeck/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug logging, per-part progress)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a bucket and remember the connection
    Connect {
        /// Bucket name
        #[arg(short, long)]
        bucket: String,

        /// Region
        #[arg(short, long, env = "AWS_REGION", default_value = "us-east-1")]
        region: String,

        /// Access key ID
        #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
        access_key: String,

        /// Secret access key
        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_key: String,

        /// Session token for temporary credentials
        #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
        session_token: Option<String>,

        /// Custom endpoint for S3-compatible services
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Use virtual-hosted addressing with a custom endpoint
        #[arg(long)]
        virtual_host: bool,

        /// Only test the parameters; do not save them
        #[arg(long)]
        check: bool,
    },

    /// Forget the saved connection
    Disconnect,

    /// List a folder
    Ls {
        /// Folder path (default: bucket root)
        #[arg(default_value = "")]
        path: String,

        /// Stop after this many entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Keys per listing request
        #[arg(long, default_value = "1000")]
        page_size: i32,
    },

    /// Upload a file
    Put {
        /// Local file
        file: PathBuf,

        /// Destination key, or folder when it ends with `/` (default: file name at the root)
        dest: Option<String>,

        /// Override the detected content type
        #[arg(long)]
        content_type: Option<String>,

        /// Extra metadata as KEY=VALUE (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show how a file would be uploaded without sending it
    Plan {
        /// Local file
        file: PathBuf,

        /// Destination key or folder
        dest: Option<String>,
    },

    /// Print a download URL valid for one hour
    Url {
        /// Object key
        key: String,
    },

    /// Print a shareable link
    Share {
        /// Object key
        key: String,

        /// Validity in seconds (max 7 days)
        #[arg(short, long, default_value_t = DEFAULT_SHARE_EXPIRY.as_secs())]
        expires: u64,
    },

    /// Delete objects
    Rm {
        /// Keys to delete; folder paths with --recursive
        #[arg(required = true)]
        keys: Vec<String>,

        /// Delete folders and everything below them
        #[arg(short, long)]
        recursive: bool,
    },

    /// Rename a file or folder within its folder
    Mv {
        /// Current key (folders end with `/`)
        key: String,

        /// New name, without the folder path
        new_name: String,
    },

    /// Create a folder
    Mkdir {
        /// Folder path
        path: String,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e), suggestion(&e));
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(deck) = error.downcast_ref::<DeckError>() {
        return deck.exit_code();
    }
    if let Some(store) = error.downcast_ref::<S3Error>() {
        return store_exit_code(store);
    }
    EXIT_PARTIAL
}

fn suggestion(error: &anyhow::Error) -> Option<&'static str> {
    match error.downcast_ref::<S3Error>().map(S3Error::root) {
        Some(S3Error::NotConnected(_)) => Some("run `clouddeck connect --bucket <name>` first"),
        Some(e) if e.class() == clouddeck::protocol::s3::ErrorClass::Authorization => {
            Some("check the access key, secret key and bucket policy")
        }
        _ => None,
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DeckConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;

    if let Err(e) = logging::init_logging(&config) {
        cli_style::print_warning(&format!("Failed to initialize logging: {}", e));
    }

    let explorer = build_explorer(&config)?;

    match cli.command {
        Commands::Connect {
            bucket,
            region,
            access_key,
            secret_key,
            session_token,
            endpoint,
            virtual_host,
            check,
        } => {
            let mut params = ConnectionParams::new(access_key, secret_key, region, bucket);
            if let Some(endpoint) = endpoint {
                params = params.with_endpoint(endpoint);
                params.force_path_style = !virtual_host;
            }
            if let Some(token) = session_token {
                params = params.with_session_token(token);
            }

            if check {
                explorer.test_connection(&params).await?;
                print_success(&format!("Bucket '{}' is reachable", params.bucket));
            } else {
                let connection = explorer.connections().connect(params).await?;
                print_success(&format!("Connected to bucket '{}'", connection.bucket()));
            }
        }

        Commands::Disconnect => {
            explorer.connections().disconnect()?;
            print_success("Disconnected");
        }

        Commands::Ls {
            path,
            limit,
            page_size,
        } => {
            let lister = Lister::new(Arc::clone(explorer.connections())).with_page_size(page_size);
            let entries = lister.list_folder(&path, limit).await?;
            let prefix = folder_prefix(&path);

            if entries.is_empty() {
                print_info(&format!("{} /{} is empty", Icons::FOLDER, prefix));
            } else {
                println!("{}", entries_table(&entries));
                println!(
                    "{}",
                    Theme::muted(format!("{} entries in /{}", entries.len(), prefix))
                );
            }
        }

        Commands::Put {
            file,
            dest,
            content_type,
            metadata,
            no_progress,
        } => {
            let key = destination_key(&file, dest.as_deref())?;
            let mut request = TransferRequest::from_file(&file, &key)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            if let Some(content_type) = content_type {
                request = request.with_content_type(content_type);
            }
            for pair in &metadata {
                let (name, value) = parse_metadata(pair)?;
                request = request.with_metadata(name, value);
            }

            let (reporter, events) = ProgressReporter::new();
            let bar = UploadProgressBar::new(!no_progress, config.verbose).spawn(events);
            let result = explorer.upload(request, reporter).await;
            // the reporter is gone once upload returns, so the bar task ends
            finish_progress(bar).await;
            let outcome = result?;

            println!(
                "{}",
                stats_table(&[
                    ("Key", outcome.key.clone()),
                    ("Size", format_bytes(outcome.bytes)),
                    ("Attempts", outcome.attempts.to_string()),
                    ("Duration", format_duration(outcome.elapsed.as_secs_f64())),
                ])
            );
        }

        Commands::Plan { file, dest } => {
            let key = destination_key(&file, dest.as_deref())?;
            let request = TransferRequest::from_file(&file, &key)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let plan = explorer.uploader().plan(&request);
            println!(
                "{}",
                plan_table(&key, request.size(), &request.media_kind.to_string(), &plan)
            );
        }

        Commands::Url { key } => {
            println!("{}", explorer.download_url(&key).await?);
        }

        Commands::Share { key, expires } => {
            let link = explorer
                .share_link(&key, Duration::from_secs(expires))
                .await?;
            println!("{} {}", Icons::LINK, link.url);
            println!(
                "{}",
                Theme::muted(format!(
                    "expires {} ({})",
                    link.expires_at.to_rfc3339(),
                    format_duration(link.expires_in.as_secs_f64())
                ))
            );
        }

        Commands::Rm { keys, recursive } => {
            let mut deleted = 0;
            let mut files = Vec::new();
            for key in keys {
                if recursive && key.ends_with('/') {
                    deleted += explorer.delete_folder(&key).await?;
                } else {
                    files.push(key);
                }
            }
            deleted += explorer.delete(&files).await?;
            print_success(&format!("Deleted {} object(s)", deleted));
        }

        Commands::Mv { key, new_name } => {
            let new_key = explorer.rename(&key, &new_name).await?;
            print_success(&format!("{} {} {}", key, Icons::ARROW_RIGHT, new_key));
        }

        Commands::Mkdir { path } => {
            let key = explorer.create_folder(&path).await?;
            print_success(&format!("Created {} {}", Icons::FOLDER, key));
        }
    }

    Ok(())
}

fn build_explorer(config: &DeckConfig) -> anyhow::Result<Explorer> {
    let params_path = config
        .params_path()
        .ok_or_else(|| DeckError::Config("no configuration directory available".to_string()))?;

    let manager = Arc::new(ConnectionManager::new(
        Arc::new(S3StoreFactory::new(config.connection.store_options())),
        Arc::new(FileParamsStore::new(params_path)),
    ));
    let uploader = Uploader::new(Arc::clone(&manager))
        .with_planner(config.transfer.clone())
        .with_policy(config.retry.policy());

    Ok(Explorer::new(manager).with_uploader(uploader))
}

/// Key for `file` given an optional key or folder destination
fn destination_key(file: &Path, dest: Option<&str>) -> anyhow::Result<String> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DeckError::FileNotFound(file.to_path_buf()))?;

    Ok(match dest {
        None => name.to_string(),
        Some(dest) if dest.is_empty() || dest.ends_with('/') => {
            format!("{}{}", folder_prefix(dest), name)
        }
        Some(dest) => dest.trim_start_matches('/').to_string(),
    })
}

fn parse_metadata(pair: &str) -> anyhow::Result<(String, String)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_ascii_lowercase(), value.to_string()))
        }
        _ => bail!("metadata must be KEY=VALUE, got '{}'", pair),
    }
}

/// Wait for the progress bar task; its failure never fails the upload
async fn finish_progress(bar: JoinHandle<()>) {
    if let Err(e) = bar.await {
        warn!(error = %e, "Progress display task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clouddeck::error::EXIT_FATAL;

    #[tokio::test]
    async fn test_panicked_progress_task_is_absorbed() {
        let bar = tokio::spawn(async { panic!("terminal went away") });
        finish_progress(bar).await;

        finish_progress(tokio::spawn(async {})).await;
    }

    #[test]
    fn test_destination_key() {
        let file = Path::new("/home/me/clip.mp4");
        assert_eq!(destination_key(file, None).unwrap(), "clip.mp4");
        assert_eq!(destination_key(file, Some("videos/")).unwrap(), "videos/clip.mp4");
        assert_eq!(destination_key(file, Some("/")).unwrap(), "clip.mp4");
        assert_eq!(destination_key(file, Some("/v/new.mp4")).unwrap(), "v/new.mp4");
    }

    #[test]
    fn test_parse_metadata() {
        assert_eq!(
            parse_metadata("Owner=ops=1").unwrap(),
            ("owner".to_string(), "ops=1".to_string())
        );
        assert!(parse_metadata("novalue").is_err());
        assert!(parse_metadata("=x").is_err());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["clouddeck", "ls", "trips", "--verbose", "-n", "5"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Ls { limit: Some(5), .. }));
    }

    #[test]
    fn test_exit_code_for_not_connected() {
        let err = anyhow::Error::from(S3Error::NotConnected("none".into()));
        assert_eq!(exit_code(&err), EXIT_FATAL);
    }
}

//! httpvfs command line.
//!
//! Usage:
//!   httpvfs --url http://127.0.0.1:8000/ ls /
//!   httpvfs --url 'https://mega.nz/folder/<id>#<key>' tree
//!   httpvfs --url https://example.com/ --alias index.html cat /index.html
//!
//! Logs go to stderr; `RUST_LOG` overrides the level.

mod config;
mod tree;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use httpvfs::action::DriverRegistry;
use httpvfs::{FileAttr, FileType, MegaDriver, ReqwestHttpClient, RootFileAlias, Volume};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use crate::config::CliConfig;

/// Browse a remote directory tree.
#[derive(Parser, Debug)]
#[command(name = "httpvfs")]
#[command(about = "Browse HTTP directory listings and MEGA links")]
struct Args {
    /// Root URL: an http(s) directory or file, or a MEGA link
    #[arg(long)]
    url: String,

    /// Config file (default: $XDG_CONFIG_HOME/httpvfs/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send every request through this proxy
    #[arg(long)]
    proxy: Option<Url>,

    /// Load the whole tree before running the command
    #[arg(long)]
    preload: bool,

    /// Present a single-file root as a directory, optionally naming the file
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    alias: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        /// Long format: mode, size, modification time
        #[arg(short)]
        long: bool,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show attributes of a path
    Stat { path: String },
    /// Write a file to stdout
    Cat { path: String },
    /// Print the tree below a path
    Tree {
        #[arg(default_value = "/")]
        path: String,
        /// Stop descending after this many levels
        #[arg(long)]
        depth: Option<u32>,
    },
}

fn apply_args(mut config: CliConfig, args: &Args) -> CliConfig {
    if let Some(proxy) = &args.proxy {
        config.volume.proxy = Some(proxy.clone());
    }
    if args.preload {
        config.volume.preload = true;
    }
    match args.alias.as_deref() {
        Some("") => config.volume.root_file_alias = RootFileAlias::Enabled(true),
        Some(name) => config.volume.root_file_alias = RootFileAlias::Named(name.to_string()),
        None => {}
    }
    config
}

fn registry(config: &CliConfig) -> DriverRegistry {
    let mut mega = MegaDriver::new().with_max_retries(config.mega.max_retries);
    if let Some(gateway) = &config.mega.gateway {
        mega = mega.with_gateway(gateway.clone());
    }
    let mega = Arc::new(mega);
    let mut registry = DriverRegistry::new();
    registry.register("mega.nz", mega.clone());
    registry.register("mega.co.nz", mega);
    registry
}

fn mode_string(attr: &FileAttr) -> String {
    let mut out = String::with_capacity(10);
    out.push(if attr.is_dir() { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (attr.perm >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn long_line(name: &str, attr: &FileAttr) -> String {
    let mtime: DateTime<Utc> = attr.mtime.into();
    format!(
        "{} {:>10} {} {}",
        mode_string(attr),
        attr.size,
        mtime.format("%Y-%m-%d %H:%M"),
        name
    )
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

async fn run(volume: &Volume, command: Command) -> Result<()> {
    match command {
        Command::Ls { long, path } => {
            let entries = volume
                .readdir_with_types(&path)
                .await
                .with_context(|| format!("listing {path}"))?;
            for entry in entries {
                if long {
                    let attr = volume.stat(join(&path, &entry.name)).await?;
                    println!("{}", long_line(&entry.name, &attr));
                } else if entry.kind == Some(FileType::Directory) {
                    println!("{}/", entry.name);
                } else {
                    println!("{}", entry.name);
                }
            }
        }
        Command::Stat { path } => {
            let attr = volume.stat(&path).await.with_context(|| format!("stat {path}"))?;
            println!("{}", long_line(&path, &attr));
        }
        Command::Cat { path } => {
            let mut reader = volume.create_read_stream(&path).into_async_read();
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout)
                .await
                .with_context(|| format!("reading {path}"))?;
            stdout.flush().await?;
        }
        Command::Tree { path, depth } => {
            let listed = tree::collect(volume, path.clone(), path, 0, depth).await?;
            for line in tree::format_tree(&listed) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = config::load(args.config.as_deref())?;
    let config = apply_args(config, &args);

    let mut http = ReqwestHttpClient::new();
    if let Some(timeout) = config.http.connect_timeout() {
        http = http.with_connect_timeout(timeout);
    }

    let volume = Volume::builder(args.url.clone())
        .with_config(config.volume.clone())
        .with_registry(Arc::new(registry(&config)))
        .with_http_client(Arc::new(http))
        .open()
        .await
        .with_context(|| format!("opening {}", args.url))?;
    tracing::debug!(?volume, "volume ready");

    run(&volume, args.command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_flag_forms() {
        let args = Args::parse_from(["httpvfs", "--url", "http://h/", "--alias", "home.html", "ls"]);
        let cfg = apply_args(CliConfig::default(), &args);
        assert_eq!(cfg.volume.root_file_alias, RootFileAlias::Named("home.html".into()));

        let args = Args::parse_from(["httpvfs", "--alias", "--url", "http://h/", "ls"]);
        let cfg = apply_args(CliConfig::default(), &args);
        assert_eq!(cfg.volume.root_file_alias, RootFileAlias::Enabled(true));

        let args = Args::parse_from(["httpvfs", "--url", "http://h/", "ls"]);
        let cfg = apply_args(CliConfig::default(), &args);
        assert!(!cfg.volume.root_file_alias.is_enabled());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = CliConfig::default();
        file.volume.preload = false;
        let args = Args::parse_from([
            "httpvfs",
            "--url",
            "http://h/",
            "--preload",
            "--proxy",
            "http://p:1/",
            "tree",
        ]);
        let cfg = apply_args(file, &args);
        assert!(cfg.volume.preload);
        assert_eq!(cfg.volume.proxy.unwrap().host_str(), Some("p"));
    }

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(&FileAttr::file(1, 0o444)), "-r--r--r--");
        assert_eq!(mode_string(&FileAttr::directory(0o555)), "dr-xr-xr-x");
    }
}

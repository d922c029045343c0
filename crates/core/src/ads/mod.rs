//! Client for the archival description system.
//!
//! DIP delivery is two steps: migrate the DIP directory to the description
//! host with rsync, then trigger ingestion with an authenticated SWORD
//! deposit call. rsync runs with a whitelisted argument set only; anything
//! else is rejected before a process is spawned.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AtomConfig;
use crate::retry;

/// Errors from DIP migration and deposit.
#[derive(Debug, Error)]
pub enum AdsError {
    /// An rsync argument fell outside the whitelist.
    #[error("unsupported rsync argument: {arg}")]
    BadArgs { arg: String },

    /// rsync exited non-zero.
    #[error("rsync failed: {detail}")]
    Rsync { detail: String },

    /// The deposit endpoint answered with a non-200 status.
    #[error("failed to deposit DIP: {status}")]
    Deposit { status: u16 },

    /// HTTP transport failure during deposit.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cancelled while the transfer was running.
    #[error("DIP delivery cancelled")]
    Cancelled,

    /// Spawning rsync failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdsError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => retry::reqwest_is_transient(err),
            Self::Deposit { status } => retry::http_status_is_transient(*status),
            _ => false,
        }
    }
}

/// DIP delivery operations, behind a trait so the orchestrator can be
/// exercised without rsync or a live description system.
#[async_trait]
pub trait AdsApi: Send + Sync {
    /// Migrates the DIP directory to the configured rsync target.
    async fn migrate(
        &self,
        token: &CancellationToken,
        config: &AtomConfig,
        dip_path: &Path,
    ) -> Result<(), AdsError>;

    /// Triggers ingestion of a migrated DIP via the SWORD deposit endpoint.
    async fn deposit(
        &self,
        config: &AtomConfig,
        slug: &str,
        dip_name: &str,
    ) -> Result<(), AdsError>;
}

/// Production client: rsync subprocess plus an HTTP deposit call.
pub struct AdsClient {
    http: reqwest::Client,
}

impl AdsClient {
    /// Deposit calls are small; a short timeout is enough.
    pub fn new(allow_insecure_tls: bool) -> Result<Self, AdsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(allow_insecure_tls)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AdsApi for AdsClient {
    async fn migrate(
        &self,
        token: &CancellationToken,
        config: &AtomConfig,
        dip_path: &Path,
    ) -> Result<(), AdsError> {
        let extra_args: Vec<String> = config
            .rsync_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        rsync_file(token, dip_path, &config.rsync_target, &extra_args).await
    }

    async fn deposit(
        &self,
        config: &AtomConfig,
        slug: &str,
        dip_name: &str,
    ) -> Result<(), AdsError> {
        let url = format!("{}/sword/deposit/{slug}", config.host.trim_end_matches('/'));
        let content_location = format!("file:///{}", urlencoding::encode(dip_name));
        let auth = BASE64.encode(format!("{}:{}", config.login_email, config.login_password));

        debug!(%url, dip_name, "depositing DIP");
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Basic {auth}"))
            .header("Content-Location", content_location)
            .header("X-Packaging", "http://purl.org/net/sword-types/METSArchivematicaDIP")
            .header("X-No-Op", "false")
            .header("User-Agent", "curate")
            .header("Content-Type", "application/zip")
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AdsError::Deposit {
                status: response.status().as_u16(),
            });
        }
        info!(slug, dip_name, "DIP deposited");
        Ok(())
    }
}

/// Flags rsync may be invoked with.
const ALLOWED_RSYNC_FLAGS: [&str; 8] = [
    "-a",
    "--archive",
    "-v",
    "--verbose",
    "-z",
    "--compress",
    "--progress",
    "-e",
];

/// Checks one rsync argument against the whitelist. `-e` values may only be
/// `ssh` with numeric `-p` port options.
fn validate_rsync_arg(arg: &str) -> Result<(), AdsError> {
    if ALLOWED_RSYNC_FLAGS.contains(&arg) {
        return Ok(());
    }

    if let Some(rest) = arg.strip_prefix("ssh ") {
        for part in rest.split_whitespace() {
            if part == "-p" {
                continue;
            }
            if part.parse::<u32>().is_err() {
                return Err(AdsError::BadArgs {
                    arg: format!("invalid SSH option: {part}"),
                });
            }
        }
        return Ok(());
    }

    if !arg.starts_with('-') {
        // Non-flag arguments must be clean paths.
        if clean_path(arg) != arg {
            return Err(AdsError::BadArgs {
                arg: arg.to_string(),
            });
        }
        return Ok(());
    }

    Err(AdsError::BadArgs {
        arg: arg.to_string(),
    })
}

/// Runs rsync with validated arguments, source and destination appended
/// last. The child is killed if the token fires.
async fn rsync_file(
    token: &CancellationToken,
    src: &Path,
    dest: &str,
    extra_args: &[String],
) -> Result<(), AdsError> {
    if src.as_os_str().is_empty() || dest.is_empty() {
        return Err(AdsError::BadArgs {
            arg: "source and destination paths cannot be empty".to_string(),
        });
    }
    for arg in extra_args {
        validate_rsync_arg(arg)?;
    }

    let src = clean_path(&src.to_string_lossy());
    debug!(%src, dest, ?extra_args, "running rsync");

    let mut command = Command::new("rsync");
    command.args(extra_args).arg(&src).arg(dest).kill_on_drop(true);

    let output = tokio::select! {
        output = command.output() => output?,
        _ = token.cancelled() => return Err(AdsError::Cancelled),
    };

    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
        detail.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(AdsError::Rsync {
            detail: format!("exit {}: {}", output.status, detail.trim()),
        });
    }
    Ok(())
}

/// Lexical path cleaning, mirroring what the transfer sanitiser does.
fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(c) => parts.push(c.to_string_lossy().into_owned()),
            Component::ParentDir => {
                if parts.pop().is_none() && !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

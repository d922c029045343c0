//! Bulk file transfer through the external `cec` binary.
//!
//! Downloads and uploads go through a subprocess invocation of the CMS
//! client binary. Every argument that reaches the command line is sanitised
//! first; the binary path and remote address come from trusted configuration
//! but get the same treatment.

use std::path::{Component, Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use super::{CmsError, UserClient};

pub(crate) struct CecTransfer {
    binary: PathBuf,
    address: String,
}

impl CecTransfer {
    pub(crate) fn new(binary: PathBuf, address: String) -> Self {
        Self { binary, address }
    }

    /// Downloads `cells_src` into `dest_dir` and returns the local path the
    /// binary places the node at.
    pub(crate) async fn download(
        &self,
        user: &UserClient,
        cells_src: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, CmsError> {
        let src = sanitize_path_arg(cells_src);
        let dest = sanitize_path_arg(&dest_dir.to_string_lossy());
        self.run(user, format!("cells://{src}/"), dest.clone()).await?;

        let name = Path::new(&src)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(PathBuf::from(dest).join(name))
    }

    /// Uploads `src` under the logical `cells_dest` directory and returns
    /// the logical path of the uploaded node.
    pub(crate) async fn upload(
        &self,
        user: &UserClient,
        src: &Path,
        cells_dest: &str,
    ) -> Result<String, CmsError> {
        let local = sanitize_path_arg(&src.to_string_lossy());
        let dest = sanitize_path_arg(cells_dest);
        self.run(user, local.clone(), format!("cells://{dest}/")).await?;

        let name = Path::new(&local)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("{}/{name}", dest.trim_end_matches('/')))
    }

    async fn run(&self, user: &UserClient, from: String, to: String) -> Result<(), CmsError> {
        let binary = sanitize_path_arg(&self.binary.to_string_lossy());
        let address = sanitize_string_arg(&self.address);
        let login = sanitize_string_arg(&user.user.login);

        debug!(%from, %to, login, "invoking transfer binary");
        let output = Command::new(binary)
            .args([
                "scp",
                "-n",
                "--url",
                address.as_str(),
                "--skip-verify",
                "--login",
                login.as_str(),
                "--token",
                user.token.as_str(),
                from.as_str(),
                to.as_str(),
            ])
            .output()
            .await?;

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
            detail.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CmsError::Transfer {
                detail: format!("exit {}: {}", output.status, detail.trim()),
            });
        }
        Ok(())
    }
}

/// Lexically cleans a path and strips shell metacharacters.
pub(crate) fn sanitize_path_arg(path: &str) -> String {
    sanitize_string_arg(&clean_path(path))
}

/// Strips shell metacharacters from an argument.
pub(crate) fn sanitize_string_arg(arg: &str) -> String {
    let cleaned: String = arg
        .chars()
        .filter(|c| !matches!(c, ';' | '&' | '|' | '`' | '$' | '"' | '\''))
        .collect();
    if cleaned != arg {
        warn!(original = arg, sanitized = cleaned, "sanitised command argument");
    }
    cleaned
}

/// Lexical path normalisation: resolves `.` and `..`, collapses separators,
/// keeps the path relative or absolute as it came in.
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

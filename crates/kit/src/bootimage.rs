//! Obtaining the boot ISO for a new machine
//!
//! Without an explicit URL the shared cached ISO is copied into the machine
//! directory, downloading the latest release into the cache first if needed.
//! An explicit URL is either a GitHub releases API endpoint (resolved to the
//! newest release asset) or a direct download/file location.

use std::fs;
use std::io::Write as _;
use std::sync::LazyLock;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

/// File name of the boot ISO inside a machine directory and the cache
pub const ISO_FILENAME: &str = "boot2docker.iso";

/// Default releases endpoint consulted when nothing is cached
pub const DEFAULT_RELEASES_API: &str =
    "https://api.github.com/repos/boot2docker/boot2docker/releases";

static GITHUB_RELEASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?)://([^/]+)(/api/v3)?/repos/([^/]+)/([^/]+)/releases$")
        .expect("valid regex")
});

/// Supplies the boot ISO of a machine
pub trait BootImageProvider: std::fmt::Debug + Send + Sync {
    /// Write the ISO to `dest`, creating its parent directory.
    fn fetch(&self, dest: &Utf8Path, url: Option<&str>) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
}

/// Pick the newest non-prerelease tag and build its ISO download URL.
///
/// Returns `None` when `api_url` is not a GitHub releases endpoint.
fn release_download_url(api_url: &str, releases_json: &str) -> Result<Option<String>> {
    let Some(caps) = GITHUB_RELEASES.captures(api_url) else {
        return Ok(None);
    };
    let scheme = &caps[1];
    let host = match &caps[2] {
        "api.github.com" => "github.com",
        other => other,
    };
    let (org, repo) = (&caps[4], &caps[5]);

    let releases: Vec<Release> = serde_json::from_str(releases_json).with_context(|| {
        "Error demarshaling the GitHub API response; you may be getting rate limited by GitHub"
    })?;
    if releases.is_empty() {
        return Err(eyre!("no releases found"));
    }
    // Releases are listed newest first.
    let tag = releases
        .iter()
        .find(|r| !r.prerelease)
        .map(|r| r.tag_name.as_str())
        .ok_or_else(|| eyre!("Could not find latest release for {api_url}"))?;
    info!("Latest release for {host}/{org}/{repo} is {tag}");
    Ok(Some(format!(
        "{scheme}://{host}/{org}/{repo}/releases/download/{tag}/{ISO_FILENAME}"
    )))
}

/// Downloads over HTTP and keeps a shared copy of the default ISO
#[derive(Debug, Clone)]
pub struct HttpBootImageCache {
    cache_dir: Utf8PathBuf,
    releases_api: String,
}

impl HttpBootImageCache {
    /// Cache the default ISO under `cache_dir`.
    pub fn new(cache_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            releases_api: DEFAULT_RELEASES_API.to_string(),
        }
    }

    fn client() -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .user_agent(concat!("vboxkit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Building HTTP client")
    }

    /// Turn a releases API URL into an ISO URL; anything else passes through.
    fn resolve(&self, url: &str) -> Result<String> {
        if !GITHUB_RELEASES.is_match(url) {
            return Ok(url.to_string());
        }
        let mut req = Self::client()?.get(url);
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            req = req.header("Authorization", format!("token {token}"));
        }
        let body = req
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .with_context(|| format!("Querying {url}"))?;
        release_download_url(url, &body)?.ok_or_else(|| eyre!("Unexpected releases URL {url}"))
    }

    /// Fetch `url` into `dest` through a temporary file next to it.
    fn download(&self, dest: &Utf8Path, url: &str) -> Result<()> {
        let dir = parent_dir(dest)?;
        fs::create_dir_all(dir).with_context(|| format!("Creating {dir}"))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{ISO_FILENAME}.tmp"))
            .tempfile_in(dir)
            .with_context(|| format!("Creating temporary file in {dir}"))?;

        let local = url.strip_prefix("file://").or_else(|| {
            (!url.contains("://")).then_some(url)
        });
        if let Some(path) = local {
            let mut src = fs::File::open(path).with_context(|| format!("Opening {path}"))?;
            std::io::copy(&mut src, &mut tmp)?;
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg} {bytes} ({bytes_per_sec})")
                    .context("Invalid progress template")?,
            );
            spinner.set_message(format!("Downloading {url}"));
            spinner.enable_steady_tick(Duration::from_millis(120));
            let result = Self::client()?
                .get(url)
                .send()
                .and_then(|r| r.error_for_status())
                .with_context(|| format!("Downloading {url}"))
                .and_then(|mut resp| {
                    resp.copy_to(&mut spinner.wrap_write(&mut tmp))
                        .with_context(|| format!("Downloading {url}"))
                });
            spinner.finish_and_clear();
            result?;
        }
        tmp.flush()?;
        tmp.persist(dest)
            .with_context(|| format!("Renaming download to {dest}"))?;
        Ok(())
    }
}

fn parent_dir(path: &Utf8Path) -> Result<&Utf8Path> {
    path.parent()
        .filter(|p| !p.as_str().is_empty())
        .ok_or_else(|| eyre!("{path} has no parent directory"))
}

impl BootImageProvider for HttpBootImageCache {
    fn fetch(&self, dest: &Utf8Path, url: Option<&str>) -> Result<()> {
        match url.filter(|u| !u.is_empty()) {
            Some(url) => {
                let url = self.resolve(url)?;
                info!("Downloading {ISO_FILENAME} from {url}...");
                self.download(dest, &url)
            }
            None => {
                let cached = self.cache_dir.join(ISO_FILENAME);
                if !cached.exists() {
                    info!("No default {ISO_FILENAME} found locally, downloading the latest release...");
                    let url = self.resolve(&self.releases_api)?;
                    self.download(&cached, &url)?;
                }
                let dir = parent_dir(dest)?;
                fs::create_dir_all(dir).with_context(|| format!("Creating {dir}"))?;
                fs::copy(&cached, dest).with_context(|| format!("Copying {cached} to {dest}"))?;
                Ok(())
            }
        }
    }
}

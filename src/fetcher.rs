use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{Settings, SourceKind};
use crate::credentials::{self, CredentialSource, SecretStoreCredentials};
use crate::models::UsageReading;
use crate::parser;

pub const USAGE_API_URL: &str = "https://api.anthropic.com/api/oauth/usage";

const ANTHROPIC_BETA_VALUE: &str = "oauth-2025-04-20";
const CLAUDE_CODE_USER_AGENT: &str = "claude-code/2.0.31";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: u64 = 1024 * 1024;

pub const HELPER_SCRIPT_NAME: &str = "fetch-usage.sh";
pub const CACHE_FILE_NAME: &str = "usage-cache.json";

/// Written to the install path when no helper script is found.
pub const DEFAULT_HELPER_SCRIPT: &str = include_str!("../scripts/fetch-usage.sh");

const HELPER_WAIT_STEP: Duration = Duration::from_millis(50);

/// A fallback reading older than this is logged as stale.
pub const STALE_FALLBACK_AGE: chrono::Duration = chrono::Duration::minutes(15);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("No Claude credentials found")]
    NoCredentials,
    #[error("Network error: {0}")]
    Network(String),
    #[error("No cache file. Run fetch-usage.sh first.")]
    NoCacheFile,
    #[error("Failed to parse usage: {0}")]
    Decode(String),
    #[error("Failed to read cache file: {0}")]
    CacheRead(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Usage fetch failed: {0}")]
    Internal(String),
}

/// One way of obtaining a usage reading. Blocking; called off the owner thread.
pub trait UsageSource: Send + Sync {
    fn fetch(&self) -> Result<UsageReading, FetchError>;
}

impl<T: UsageSource + ?Sized> UsageSource for Box<T> {
    fn fetch(&self) -> Result<UsageReading, FetchError> {
        (**self).fetch()
    }
}

/// Queries the OAuth usage endpoint directly.
pub struct ApiSource<C> {
    credentials: C,
    url: String,
}

impl<C: CredentialSource> ApiSource<C> {
    pub fn new(credentials: C) -> Self {
        Self {
            credentials,
            url: USAGE_API_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl<C: CredentialSource> UsageSource for ApiSource<C> {
    fn fetch(&self) -> Result<UsageReading, FetchError> {
        let creds = self.credentials.credentials().ok_or(FetchError::NoCredentials)?;

        let tls = std::sync::Arc::new(
            native_tls::TlsConnector::new().map_err(|e| FetchError::Network(e.to_string()))?,
        );
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .tls_connector(tls)
            .build();

        log::debug!("Requesting usage from {}", self.url);
        let response = match agent
            .get(&self.url)
            .set("Authorization", &format!("Bearer {}", creds.access_token))
            .set("anthropic-beta", ANTHROPIC_BETA_VALUE)
            .set("User-Agent", CLAUDE_CODE_USER_AGENT)
            .call()
        {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(FetchError::Network(extract_error_message(&body, code)));
            }
            Err(e) => return Err(FetchError::Network(e.to_string())),
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Network(e.to_string()))?;

        parser::parse(&body)?.into_reading()
    }
}

fn extract_error_message(body: &str, status: u16) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = json.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str())
        {
            return format!("HTTP {status}: {msg}");
        }
    }
    let truncated: String = body.chars().take(200).collect();
    format!("HTTP {status}: {truncated}")
}

/// Reads the JSON file the helper script leaves behind.
#[derive(Clone, Debug)]
pub struct CacheFileSource {
    path: PathBuf,
}

impl CacheFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_claude_dir(claude_dir: &Path) -> Self {
        Self::new(claude_dir.join(CACHE_FILE_NAME))
    }
}

impl UsageSource for CacheFileSource {
    fn fetch(&self) -> Result<UsageReading, FetchError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NoCacheFile)
            }
            Err(e) => {
                return Err(FetchError::CacheRead(format!("{}: {e}", self.path.display())))
            }
        };
        parser::parse(&bytes)?.into_reading()
    }
}

/// Runs the external helper script, then reads its cache file.
pub struct HelperSource {
    candidates: Vec<PathBuf>,
    install_path: PathBuf,
    cache: CacheFileSource,
    timeout: Duration,
}

impl HelperSource {
    pub fn new(
        candidates: Vec<PathBuf>,
        install_path: PathBuf,
        cache: CacheFileSource,
        timeout: Duration,
    ) -> Self {
        Self {
            candidates,
            install_path,
            cache,
            timeout,
        }
    }

    /// Standard locations: beside the executable, the shared data dir, then `~/.claude`.
    pub fn in_claude_dir(claude_dir: &Path, timeout: Duration) -> Self {
        let install_path = claude_dir.join(HELPER_SCRIPT_NAME);
        let mut candidates = Vec::new();
        if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
            candidates.push(exe_dir.join(HELPER_SCRIPT_NAME));
            candidates.push(
                exe_dir
                    .join("..")
                    .join("share")
                    .join("claude-usage-bar")
                    .join(HELPER_SCRIPT_NAME),
            );
        }
        candidates.push(install_path.clone());

        Self::new(
            candidates,
            install_path,
            CacheFileSource::in_claude_dir(claude_dir),
            timeout,
        )
    }

    /// First existing candidate, or a fresh copy of the bundled script.
    pub fn locate_or_install(&self) -> std::io::Result<PathBuf> {
        if let Some(found) = self.candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }

        log::info!(
            "{HELPER_SCRIPT_NAME} not found, installing to {}",
            self.install_path.display()
        );
        if let Some(parent) = self.install_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.install_path, DEFAULT_HELPER_SCRIPT)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.install_path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(self.install_path.clone())
    }

    fn run_helper(&self) {
        let script = match self.locate_or_install() {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Could not create or find fetch script: {e}");
                return;
            }
        };

        let mut child = match Command::new("/bin/bash")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to run fetch script: {e}");
                return;
            }
        };

        // An unrepresentable deadline means the wait is effectively unbounded.
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if !status.success() {
                        log::debug!("Fetch script exited with {status}");
                    }
                    return;
                }
                Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                    log::warn!("Fetch script timed out after {:?}, killing it", self.timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
                Ok(None) => std::thread::sleep(HELPER_WAIT_STEP),
                Err(e) => {
                    log::warn!("Failed to wait for fetch script: {e}");
                    return;
                }
            }
        }
    }
}

impl UsageSource for HelperSource {
    fn fetch(&self) -> Result<UsageReading, FetchError> {
        self.run_helper();
        self.cache.fetch()
    }
}

/// Tries `primary`; on a credentials or network failure, tries `fallback`.
pub struct FallbackSource<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: UsageSource, F: UsageSource> UsageSource for FallbackSource<P, F> {
    fn fetch(&self) -> Result<UsageReading, FetchError> {
        match self.primary.fetch() {
            Err(err @ (FetchError::NoCredentials | FetchError::Network(_))) => {
                log::info!("Primary usage source failed ({err}), trying fallback");
                match self.fallback.fetch() {
                    Ok(reading) => {
                        if let Some(age) = stale_age(&reading, chrono::Utc::now()) {
                            log::warn!(
                                "Showing cached usage from {} minutes ago ({err})",
                                age.num_minutes()
                            );
                        }
                        Ok(reading)
                    }
                    Err(fallback_err) => {
                        log::debug!("Fallback usage source failed: {fallback_err}");
                        Err(err)
                    }
                }
            }
            other => other,
        }
    }
}

/// How old `reading` is, if older than [`STALE_FALLBACK_AGE`].
/// Readings without a timestamp have an unknown age and are not flagged.
pub fn stale_age(
    reading: &UsageReading,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<chrono::Duration> {
    let age = now.signed_duration_since(reading.fetched_at?);
    (age > STALE_FALLBACK_AGE).then_some(age)
}

/// Build the source selected in `settings`, rooted at `claude_dir`.
pub fn from_settings(settings: &Settings, claude_dir: &Path) -> Box<dyn UsageSource> {
    let cache = CacheFileSource::in_claude_dir(claude_dir);
    match settings.source {
        SourceKind::Api => {
            let creds = SecretStoreCredentials::new(credentials::platform_store())
                .with_credentials_file(Some(claude_dir.join(".credentials.json")));
            let api = ApiSource::new(creds);
            if settings.fallback_to_cache {
                Box::new(FallbackSource::new(api, cache))
            } else {
                Box::new(api)
            }
        }
        SourceKind::Helper => Box::new(HelperSource::in_claude_dir(
            claude_dir,
            settings.helper_timeout(),
        )),
        SourceKind::Cache => Box::new(cache),
    }
}

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Secret-store entry written by the Claude Code CLI.
pub const CLI_SERVICE: &str = "Claude Code-credentials";

/// Secret-store entry written by the Claude desktop app.
pub const DESKTOP_SERVICE: &str = "Claude Safe Storage";

pub const DEFAULT_SERVICES: &[&str] = &[CLI_SERVICE, DESKTOP_SERVICE];

/// An OAuth access token, held only for the duration of one fetch.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Anything that can hand out an access token.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

impl<T: CredentialSource + ?Sized> CredentialSource for &T {
    fn credentials(&self) -> Option<Credentials> {
        (**self).credentials()
    }
}

/// Platform keyed secret storage (keychain, credential manager, ...).
pub trait SecretStore: Send + Sync {
    /// Raw secret bytes stored under `service`, or `None` on a miss.
    fn read(&self, service: &str) -> Option<Vec<u8>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsBlob {
    claude_ai_oauth: Option<OAuthBlob>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthBlob {
    access_token: Option<String>,
}

/// Pull `claudeAiOauth.accessToken` out of a UTF-8 JSON credentials blob.
pub fn extract_access_token(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let blob: CredentialsBlob = serde_json::from_str(text.trim()).ok()?;
    blob.claude_ai_oauth?
        .access_token
        .filter(|token| !token.is_empty())
}

/// Tries each secret-store service in order, then the credentials file.
pub struct SecretStoreCredentials<S> {
    store: S,
    services: Vec<String>,
    credentials_file: Option<PathBuf>,
}

impl<S: SecretStore> SecretStoreCredentials<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            services: DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect(),
            credentials_file: default_credentials_file(),
        }
    }

    pub fn with_services<I, T>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credentials_file(mut self, path: Option<PathBuf>) -> Self {
        self.credentials_file = path;
        self
    }

    fn from_file(&self) -> Option<String> {
        let path = self.credentials_file.as_ref()?;
        let content = std::fs::read(path).ok()?;
        extract_access_token(&content)
    }
}

impl<S: SecretStore> CredentialSource for SecretStoreCredentials<S> {
    fn credentials(&self) -> Option<Credentials> {
        for service in &self.services {
            match self.store.read(service).as_deref().map(extract_access_token) {
                Some(Some(access_token)) => {
                    log::debug!("Using credentials from secret store entry {service:?}");
                    return Some(Credentials { access_token });
                }
                Some(None) => log::debug!("Secret store entry {service:?} has no usable token"),
                None => log::debug!("Secret store entry {service:?} not found"),
            }
        }

        let access_token = self.from_file()?;
        log::debug!("Using credentials from credentials file");
        Some(Credentials { access_token })
    }
}

fn default_credentials_file() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".claude").join(".credentials.json"))
}

/// The secret store for the current platform.
pub fn platform_store() -> PlatformStore {
    PlatformStore
}

pub struct PlatformStore;

#[cfg(target_os = "macos")]
impl SecretStore for PlatformStore {
    fn read(&self, service: &str) -> Option<Vec<u8>> {
        let output = std::process::Command::new("security")
            .args(["find-generic-password", "-s", service, "-w"])
            .output()
            .map_err(|e| log::warn!("Failed to run security: {e}"))
            .ok()?;

        if !output.status.success() {
            return None;
        }
        Some(output.stdout)
    }
}

#[cfg(windows)]
impl SecretStore for PlatformStore {
    fn read(&self, service: &str) -> Option<Vec<u8>> {
        use windows::core::PCWSTR;
        use windows::Win32::Security::Credentials::{
            CredFree, CredReadW, CREDENTIALW, CRED_TYPE_GENERIC,
        };

        let target: Vec<u16> = service.encode_utf16().chain(std::iter::once(0)).collect();
        let mut cred: *mut CREDENTIALW = std::ptr::null_mut();

        unsafe {
            CredReadW(PCWSTR::from_raw(target.as_ptr()), CRED_TYPE_GENERIC, 0, &mut cred).ok()?;
            if cred.is_null() {
                return None;
            }
            let c = &*cred;
            let bytes = if c.CredentialBlob.is_null() {
                Vec::new()
            } else {
                std::slice::from_raw_parts(c.CredentialBlob, c.CredentialBlobSize as usize).to_vec()
            };
            CredFree(cred as *const std::ffi::c_void);
            Some(bytes)
        }
    }
}

#[cfg(not(any(target_os = "macos", windows)))]
impl SecretStore for PlatformStore {
    fn read(&self, _service: &str) -> Option<Vec<u8>> {
        None
    }
}

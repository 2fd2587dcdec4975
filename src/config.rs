use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Public API gateway used by the forecast, observation and vigilance services.
pub const DEFAULT_BASE_URL: &str = "https://public-api.meteofrance.fr/public/";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base API URL, typically `https://public-api.meteofrance.fr/public/`.
    pub url: String,
    /// API key sent in the `apikey` header. Wins over `token` when both are set.
    pub api_key: Option<String>,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    /// Base64 `client_id:client_secret` pair used to derive tokens.
    pub application_id: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Extra PEM bundle of trusted certificates.
    pub ca_bundle: Option<PathBuf>,
    /// Where tokens and downloaded coverages are cached.
    /// Defaults to `<user cache dir>/meteofrance`.
    pub cache_dir: Option<PathBuf>,
    /// Show a progress bar while downloading large payloads.
    pub progress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            token: None,
            application_id: None,
            verify: true,
            ca_bundle: None,
            cache_dir: None,
            progress: true,
        }
    }
}

impl ClientConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn with_application_id(application_id: impl Into<String>) -> Self {
        Self {
            application_id: Some(application_id.into()),
            ..Self::default()
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some() || self.token.is_some() || self.application_id.is_some()
    }

    pub(crate) fn ensure_credential(&self) -> Result<()> {
        if self.has_credential() {
            Ok(())
        } else {
            Err(Error::Configuration(
                "api_key or token or application_id must be provided".to_string(),
            ))
        }
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    api_key: Option<String>,
    token: Option<String>,
    application_id: Option<String>,
    verify: Option<bool>,
    ca_bundle: Option<String>,
    cache_dir: Option<String>,
}

impl RcConfig {
    fn has_credential(&self) -> bool {
        self.api_key.is_some() || self.token.is_some() || self.application_id.is_some()
    }

    fn set(&mut self, key: &str, value: &str) {
        let value = Some(value.to_string());
        match key {
            "url" => self.url = value,
            "api_key" | "apikey" | "key" => self.api_key = value,
            "token" => self.token = value,
            "application_id" => self.application_id = value,
            "ca_bundle" => self.ca_bundle = value,
            "cache_dir" => self.cache_dir = value,
            _ => {}
        }
    }
}

/// Credentials passed explicitly by the caller.
#[derive(Debug, Default, Clone)]
pub(crate) struct Explicit {
    pub(crate) api_key: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) application_id: Option<String>,
}

/// Resolves the configuration from (in order of precedence) explicit
/// arguments, `METEOFRANCE_*` environment variables and a `.meteofrancerc`
/// file.
///
/// Credentials are taken as a group from the first source that provides any of
/// them, so an explicit token is never overridden by an api key from a file.
pub(crate) fn load_config(explicit: Explicit) -> Result<ClientConfig> {
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    let mut url = env("METEOFRANCE_URL");
    let mut creds = (explicit.api_key, explicit.token, explicit.application_id);
    if creds.0.is_none() && creds.1.is_none() && creds.2.is_none() {
        creds = (
            env("METEOFRANCE_API_KEY"),
            env("METEOFRANCE_TOKEN"),
            env("METEOFRANCE_APPLICATION_ID"),
        );
    }
    let mut verify: Option<bool> = None;
    let mut ca_bundle = env("METEOFRANCE_CA_BUNDLE");
    let mut cache_dir = env("METEOFRANCE_CACHE_DIR");

    let rc_candidates = rc_candidates();
    for rc_path in &rc_candidates {
        if !rc_path.exists() {
            continue;
        }
        let cfg = read_rc(rc_path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read configuration file {}: {}",
                rc_path.display(),
                e
            ))
        })?;

        url = url.or(cfg.url.clone());
        if creds.0.is_none() && creds.1.is_none() && creds.2.is_none() && cfg.has_credential() {
            creds = (cfg.api_key.clone(), cfg.token.clone(), cfg.application_id.clone());
        }
        verify = verify.or(cfg.verify);
        ca_bundle = ca_bundle.or(cfg.ca_bundle);
        cache_dir = cache_dir.or(cfg.cache_dir);
        break;
    }

    let (api_key, token, application_id) = creds;
    if api_key.is_none() && token.is_none() && application_id.is_none() {
        let hint = if rc_candidates.is_empty() {
            "create .meteofrancerc".to_string()
        } else {
            format!(
                "put `api_key:`, `token:` or `application_id:` in one of: {}",
                rc_candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        return Err(Error::Configuration(format!(
            "api_key or token or application_id must be provided (set METEOFRANCE_API_KEY, METEOFRANCE_TOKEN or METEOFRANCE_APPLICATION_ID, or {})",
            hint
        )));
    }

    Ok(ClientConfig {
        url: url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        api_key,
        token,
        application_id,
        verify: verify.unwrap_or(true),
        ca_bundle: ca_bundle.map(PathBuf::from),
        cache_dir: cache_dir.map(PathBuf::from),
        progress: true,
    })
}

fn read_rc(path: &Path) -> std::io::Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // Long tokens are often pasted on the line after `token:`.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') {
                cfg.set(pk, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if k == "verify" {
                if !v.is_empty() {
                    cfg.verify = Some(!matches!(v, "0" | "false" | "no"));
                }
            } else if v.is_empty() {
                pending_key = Some(k);
            } else {
                cfg.set(k, v);
            }
        }
    }

    cfg
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) METEOFRANCE_RC (explicit)
    // 2) ./.meteofrancerc
    // 3) ~/.meteofrancerc
    if let Ok(p) = std::env::var("METEOFRANCE_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".meteofrancerc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".meteofrancerc"));
    }
    v
}

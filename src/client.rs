use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::{ClientConfig, Explicit, load_config};
use crate::error::{Error, Result, describe_body};
use crate::token::TokenStore;
use crate::transport::{HttpRequest, HttpTransport, RawResponse, ReqwestTransport, TransportOptions};
use crate::util::{cache_key, default_cache_root, urljoin};

/// OAuth2 client-credentials endpoint of the Météo-France portal.
pub const TOKEN_URL: &str = "https://portail-api.meteofrance.fr/token";

const SUCCESS_CODES: [u16; 3] = [200, 201, 202];
const PARAMETER_ERROR_CODE: u16 = 400;
const EXPIRED_TOKEN_CODE: u16 = 401;
const FORBIDDEN_CODE: u16 = 403;
const MISSING_DATA_CODE: u16 = 404;
const GATEWAY_ERROR_CODE: u16 = 502;

const EXPIRED_TOKEN_MARKER: &str = "Invalid JWT token";

/// Convenience for calls without query parameters.
pub(crate) const NO_PARAMS: [(&str, &str); 0] = [];

#[derive(Debug, Clone)]
enum AuthHeader {
    ApiKey(String),
    Bearer(String),
}

impl AuthHeader {
    fn apply(&self, request: HttpRequest) -> HttpRequest {
        match self {
            AuthHeader::ApiKey(key) => request.header("apikey", key.as_str()),
            AuthHeader::Bearer(token) => request.header("Authorization", format!("Bearer {}", token)),
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    auth: Option<AuthHeader>,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authenticated, retrying HTTP client shared by every service of the crate.
///
/// The client is cheap to share behind an [`Arc`]: the only mutable state is
/// the current token and the header derived from it.
pub struct Client {
    base_url: String,
    api_key: Option<String>,
    application_id: Option<String>,
    cache_root: PathBuf,
    token_url: String,

    max_retries: usize,
    backoff: Duration,

    token_store: TokenStore,
    transport: Arc<dyn HttpTransport>,
    session: Mutex<Session>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("application_id", &self.application_id.as_ref().map(|_| "***"))
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("token_store", &self.token_store)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client using environment variables and/or `.meteofrancerc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `api_key`/`token`/`application_id` arguments
    /// - environment variables `METEOFRANCE_API_KEY` / `METEOFRANCE_TOKEN` /
    ///   `METEOFRANCE_APPLICATION_ID`
    /// - config file from `METEOFRANCE_RC` or `.meteofrancerc`
    pub fn new(
        api_key: Option<String>,
        token: Option<String>,
        application_id: Option<String>,
    ) -> Result<Self> {
        let cfg = load_config(Explicit {
            api_key,
            token,
            application_id,
        })?;
        Self::from_config(cfg)
    }

    /// Creates a client from a fully specified configuration, without looking
    /// at the environment.
    ///
    /// No request is made here; the authentication header is set up on the
    /// first call to [`Client::get`] or by an explicit [`Client::connect`].
    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        cfg.ensure_credential()?;

        let transport = ReqwestTransport::new(&TransportOptions {
            verify: cfg.verify,
            ca_bundle: cfg.ca_bundle.clone(),
            progress: cfg.progress,
            ..TransportOptions::default()
        })?;

        let cache_root = cfg.cache_dir.clone().unwrap_or_else(default_cache_root);
        let token_dir = cache_root.join("token").join(cache_key(
            cfg.application_id.as_deref().unwrap_or("anonymous"),
        ));

        Ok(Self {
            base_url: cfg.url,
            api_key: cfg.api_key,
            application_id: cfg.application_id,
            cache_root,
            token_url: TOKEN_URL.to_string(),
            max_retries: 5,
            backoff: Duration::from_secs(5),
            token_store: TokenStore::new(token_dir),
            transport: Arc::new(transport),
            session: Mutex::new(Session {
                token: cfg.token,
                auth: None,
            }),
        })
    }

    /// Maximum number of attempts when the gateway answers 502.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Pause between two attempts after a 502.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_token_store(mut self, store: TokenStore) -> Self {
        self.token_store = store;
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Replaces the HTTP stack, e.g. with a proxy-aware or scripted transport.
    pub fn with_transport<T: HttpTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    /// Token currently in use, explicit or derived.
    pub fn token(&self) -> Option<String> {
        self.session().token.clone()
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets up the authentication header.
    ///
    /// The api key is used when present, otherwise the known token, otherwise a
    /// token derived from the application id.
    pub fn connect(&self) -> Result<()> {
        let auth = match &self.api_key {
            Some(key) => {
                debug!("using api key");
                AuthHeader::ApiKey(key.clone())
            }
            None => {
                let known = self.session().token.clone();
                let token = match known {
                    Some(token) => token,
                    None => self.derive_token()?,
                };
                debug!("using token");
                AuthHeader::Bearer(token)
            }
        };
        self.session().auth = Some(auth);
        Ok(())
    }

    /// Forces a new token: the cached one is dropped and a fresh one is
    /// requested from the portal.
    pub fn refresh(&self) -> Result<String> {
        if let Err(e) = self.token_store.invalidate() {
            warn!("failed to clear token cache {}: {}", self.token_store.dir().display(), e);
        }
        self.session().token = None;
        self.derive_token()
    }

    /// Returns a token for the application id, from the on-disk cache when it
    /// is still valid, from the portal otherwise.
    pub fn derive_token(&self) -> Result<String> {
        let application_id = self.application_id.as_deref().ok_or_else(|| {
            Error::Configuration(
                "a token is required but no application_id is available to derive one".to_string(),
            )
        })?;

        match self.token_store.load() {
            Ok(Some(token)) => {
                self.session().token = Some(token.clone());
                return Ok(token);
            }
            Ok(None) => {}
            Err(e) => warn!("ignoring unreadable token cache: {}", e),
        }

        info!("requesting a new token");
        let request = HttpRequest::post(&self.token_url)
            .query(&[("grant_type".to_string(), "client_credentials".to_string())])
            .header("Authorization", format!("Basic {}", application_id));
        let resp = self.transport.send(&request)?;
        if !SUCCESS_CODES.contains(&resp.status) {
            return Err(Error::Api {
                status: resp.status,
                url: self.token_url.clone(),
                message: describe_body(&resp.text()),
            });
        }

        let token = resp.json::<TokenResponse>()?.access_token;
        if let Err(e) = self.token_store.store(&token) {
            warn!("failed to cache token in {}: {}", self.token_store.dir().display(), e);
        }
        self.session().token = Some(token.clone());
        Ok(token)
    }

    /// Sends a GET request, recovering from an expired token and retrying
    /// gateway errors.
    ///
    /// `url` may be absolute or relative to the configured base URL.
    pub fn get<K, V>(&self, url: &str, params: impl IntoIterator<Item = (K, V)>) -> Result<RawResponse>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let url = urljoin(&self.base_url, url);
        let params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        if self.session().auth.is_none() {
            self.connect()?;
        }

        debug!("GET {}", url);
        let mut attempt = 0usize;
        while attempt < self.max_retries {
            let resp = self.send_get(&url, &params)?;

            if token_expired(&resp) {
                info!("token expired, requesting a new one");
                self.refresh()?;
                self.connect()?;
                return self.send_get(&url, &params);
            }

            match resp.status {
                code if SUCCESS_CODES.contains(&code) => {
                    debug!("request successful");
                    return Ok(resp);
                }
                FORBIDDEN_CODE => {
                    return Err(Error::Api {
                        status: resp.status,
                        url,
                        message: describe_body(&resp.text()),
                    });
                }
                PARAMETER_ERROR_CODE => {
                    error!("parameter error");
                    return Err(Error::Parameter {
                        url,
                        message: describe_body(&resp.text()),
                    });
                }
                MISSING_DATA_CODE => {
                    error!("missing data");
                    return Err(Error::MissingData {
                        url,
                        message: describe_body(&resp.text()),
                    });
                }
                GATEWAY_ERROR_CODE => {
                    error!("gateway error (HTTP 502)");
                    attempt += 1;
                    if attempt < self.max_retries {
                        thread::sleep(self.backoff);
                        info!("retrying... attempt {} of {}", attempt, self.max_retries);
                    }
                }
                other => {
                    return Err(Error::RetriesExhausted {
                        status: other,
                        url,
                        message: describe_body(&resp.text()),
                    });
                }
            }
        }

        Err(Error::TransientService {
            url,
            attempts: attempt,
        })
    }

    fn send_get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse> {
        let auth = self.session().auth.clone();
        let mut request = HttpRequest::get(url).query(params);
        if let Some(auth) = auth {
            request = auth.apply(request);
        }
        self.transport.send(&request)
    }
}

/// A 401 whose JSON body says the JWT is invalid means the token expired.
fn token_expired(resp: &RawResponse) -> bool {
    if resp.status != EXPIRED_TOKEN_CODE || !resp.is_json() {
        return false;
    }
    match resp.json::<serde_json::Value>() {
        Ok(body) => ["description", "message"].iter().any(|field| {
            body.get(field)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.contains(EXPIRED_TOKEN_MARKER))
        }),
        Err(_) => false,
    }
}

//! On-disk cache for bearer tokens derived from an application id.
//!
//! Two flat files live in the cache directory: `token.txt` holds the token and
//! `token_time.txt` the issuance time in epoch seconds. No locking is done;
//! concurrent processes may both refresh, and the last writer wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::error::Result;

/// Tokens issued by the portal are valid for one hour.
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(3600);

const TOKEN_FILE: &str = "token.txt";
const TOKEN_TIME_FILE: &str = "token_time.txt";

#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
    validity: Duration,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            validity: TOKEN_VALIDITY,
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the cached token if one exists and is still inside its window.
    pub fn load(&self) -> Result<Option<String>> {
        self.load_at(SystemTime::now())
    }

    pub(crate) fn load_at(&self, now: SystemTime) -> Result<Option<String>> {
        let token_path = self.dir.join(TOKEN_FILE);
        let time_path = self.dir.join(TOKEN_TIME_FILE);
        if !token_path.exists() || !time_path.exists() {
            return Ok(None);
        }

        debug!("reading token from cache {}", self.dir.display());
        let issued_at = fs::read_to_string(&time_path)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite());
        let issued_at = match issued_at {
            Some(v) => v,
            None => {
                warn!("ignoring unreadable token timestamp in {}", time_path.display());
                return Ok(None);
            }
        };

        let now = epoch_seconds(now);
        if now - issued_at >= self.validity.as_secs_f64() {
            debug!("cached token expired");
            return Ok(None);
        }

        let token = fs::read_to_string(&token_path)?.trim().to_string();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(Some(token))
    }

    /// Persists `token` as issued now, overwriting any previous value.
    pub fn store(&self, token: &str) -> Result<()> {
        self.store_at(token, SystemTime::now())
    }

    pub(crate) fn store_at(&self, token: &str, issued_at: SystemTime) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(TOKEN_FILE), token)?;
        fs::write(
            self.dir.join(TOKEN_TIME_FILE),
            epoch_seconds(issued_at).to_string(),
        )?;
        Ok(())
    }

    /// Forgets the cached token so that the next derivation hits the network.
    pub fn invalidate(&self) -> Result<()> {
        for name in [TOKEN_FILE, TOKEN_TIME_FILE] {
            match fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn epoch_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

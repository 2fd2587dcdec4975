use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No usable credential, or a credential path that cannot be completed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// HTTP 400: the provider rejected the query parameters.
    #[error("parameter error (HTTP 400) for url ({url}): {message}")]
    Parameter { url: String, message: String },

    /// HTTP 404: the requested resource or time window has no data.
    #[error("missing data (HTTP 404) for url ({url}): {message}")]
    MissingData { url: String, message: String },

    /// HTTP 502 returned on every attempt.
    #[error("gateway error persisted after {attempts} attempt(s) for url ({url}); retries exhausted")]
    TransientService { url: String, attempts: usize },

    #[error("API request failed: HTTP {status} for url ({url})\n{message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("failed to get a successful response after retries: HTTP {status} for url ({url})\n{message}")]
    RetriesExhausted {
        status: u16,
        url: String,
        message: String,
    },

    /// A caller supplied value that is not valid for the service.
    #[error("{0}")]
    Validation(String),

    #[error("malformed coverage id '{0}': expected '<INDICATOR>___<RUN>Z[_<INTERVAL>]'")]
    MalformedCoverageId(String),

    #[error("invalid XML document: {0}")]
    Xml(String),

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CSV document: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode raster file: {0:#}")]
    Decode(anyhow::Error),
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}

impl Error {
    /// HTTP status carried by the error, when it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Parameter { .. } => Some(400),
            Error::MissingData { .. } => Some(404),
            Error::TransientService { .. } => Some(502),
            Error::Api { status, .. } | Error::RetriesExhausted { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Météo-France gateways answer with {"code":..,"message":..,"description":..};
// some backends use {"title":..,"detail":..} instead.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) code: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

impl ApiErrorBody {
    /// The text the gateway uses to explain the failure, if any.
    pub(crate) fn explanation(&self) -> String {
        [
            self.message.as_deref(),
            self.title.as_deref(),
            self.description.as_deref(),
            self.detail.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(": ")
    }
}

/// Turns a raw error body into a human readable message.
///
/// JSON bodies are reduced to their message/description fields, anything else
/// is passed through trimmed.
pub(crate) fn describe_body(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        let text = parsed.explanation();
        if !text.is_empty() {
            return match &parsed.code {
                Some(serde_json::Value::String(code)) => format!("[{}] {}", code, text),
                Some(code) => format!("[{}] {}", code, text),
                None => text,
            };
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bodies_are_summarised() {
        let body = r#"{"code":"900901","message":"Invalid Credentials","description":"Invalid JWT token. Make sure you have provided the correct security credentials"}"#;
        let text = describe_body(body);
        assert!(text.starts_with("[900901] Invalid Credentials: Invalid JWT token"));
    }

    #[test]
    fn plain_bodies_pass_through() {
        assert_eq!(describe_body("  no matching blob \n"), "no matching blob");
    }

    #[test]
    fn status_is_exposed_for_http_errors() {
        let err = Error::MissingData {
            url: "u".into(),
            message: "m".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(Error::Validation("x".into()).status(), None);
    }
}

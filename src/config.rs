//! Client configuration.
//!
//! Every deployment-specific knob (backend location, endpoint paths,
//! accepted file types, timeouts) lives in [`ClientConfig`], built via
//! [`ClientConfigBuilder`]. The protocol itself mandates no timeout; one set
//! here surfaces as a `NetworkError` when it expires.

use crate::error::ConverterError;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Statement extensions accepted when no list is configured.
pub const DEFAULT_ACCEPTED_TYPES: [&str; 4] = [".xlsx", ".xls", ".csv", ".pdf"];

/// Configuration for talking to a conversion backend.
///
/// # Example
/// ```rust
/// use statement_converter::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .base_url("https://convert.example.com")
///     .request_timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(
///     config.endpoint(&config.convert_path).unwrap().as_str(),
///     "https://convert.example.com/api/convert-suggest"
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend origin, e.g. `http://localhost:8000`. Default: `http://localhost:8000`.
    pub base_url: String,

    /// Path of the convert endpoint, relative to `base_url`. Default: `api/convert-suggest`.
    pub convert_path: String,

    /// Path of the approval endpoint, relative to `base_url`. Default: `api/approve`.
    pub approve_path: String,

    /// Static path under which output files are served. Default: `output/`.
    pub output_path: String,

    /// Accepted statement extensions, lowercase with a leading dot.
    pub accepted_types: Vec<String>,

    /// Per-request timeout in seconds. `None` waits indefinitely. Default: 120.
    ///
    /// Conversion runs the statement parser and the categorizer on the
    /// backend; large PDF statements routinely take tens of seconds.
    pub request_timeout_secs: Option<u64>,

    /// TCP connect timeout in seconds. Default: 10.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            convert_path: "api/convert-suggest".to_string(),
            approve_path: "api/approve".to_string(),
            output_path: "output/".to_string(),
            accepted_types: DEFAULT_ACCEPTED_TYPES.iter().map(|s| s.to_string()).collect(),
            request_timeout_secs: Some(120),
            connect_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// The backend origin as a URL that always ends with `/`, so that
    /// relative joins append instead of replacing the last segment.
    pub fn base(&self) -> Result<Url, ConverterError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| {
            ConverterError::InvalidConfig(format!("base URL '{}': {e}", self.base_url))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConverterError::InvalidConfig(format!(
                "base URL must be http or https, got '{other}'"
            ))),
        }
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConverterError> {
        self.base()?
            .join(path.trim_start_matches('/'))
            .map_err(|e| ConverterError::InvalidConfig(format!("endpoint '{path}': {e}")))
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn convert_path(mut self, path: impl Into<String>) -> Self {
        self.config.convert_path = path.into();
        self
    }

    pub fn approve_path(mut self, path: impl Into<String>) -> Self {
        self.config.approve_path = path.into();
        self
    }

    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.config.output_path = path.into();
        self
    }

    /// Replace the accepted-type set. Entries are normalised to `.ext`.
    pub fn accepted_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.accepted_types = types
            .into_iter()
            .map(|t| normalise_extension(t.as_ref()))
            .collect();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn no_request_timeout(mut self) -> Self {
        self.config.request_timeout_secs = None;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, ConverterError> {
        let c = &self.config;
        c.base()?;
        c.endpoint(&c.convert_path)?;
        c.endpoint(&c.approve_path)?;
        if c.accepted_types.is_empty() || c.accepted_types.iter().any(|t| t.len() < 2) {
            return Err(ConverterError::InvalidConfig(
                "at least one non-empty accepted file type is required".into(),
            ));
        }
        if c.request_timeout_secs == Some(0) {
            return Err(ConverterError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.connect_timeout_secs == 0 {
            return Err(ConverterError::InvalidConfig(
                "connect timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

/// `"CSV"`, `"csv"` and `".csv"` all become `".csv"`.
pub(crate) fn normalise_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    format!(".{ext}")
}

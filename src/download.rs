//! Download resolver: turn an output reference into a retrievable artifact.
//!
//! The backend serves converted files from a static path, so resolution is
//! pure URL construction. Fetching and saving are separate steps so a
//! presentation layer can hand the URL to a browser instead.

use crate::config::ClientConfig;
use crate::error::ConverterError;
use crate::model::file_stem;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Suffix appended to the source file's stem for downloaded files.
pub const CONVERTED_SUFFIX: &str = "_convertido";

/// Runs of characters that are unsafe in a file name on common platforms.
static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]+"#).expect("valid regex"));

/// A converted file ready to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// The output reference the backend returned.
    pub reference: String,
    /// Absolute URL of the converted file.
    pub url: Url,
    /// Suggested local file name.
    pub file_name: String,
}

/// Maps output references to [`Artifact`]s and retrieves them.
#[derive(Debug, Clone)]
pub struct DownloadResolver {
    base: Url,
    output_base: Url,
    client: reqwest::Client,
}

impl DownloadResolver {
    pub fn new(config: &ClientConfig) -> Result<Self, ConverterError> {
        let base = config.base()?;
        let mut output_path = config.output_path.trim().trim_start_matches('/').to_string();
        if !output_path.is_empty() && !output_path.ends_with('/') {
            output_path.push('/');
        }
        let output_base = base
            .join(&output_path)
            .map_err(|e| ConverterError::InvalidConfig(format!("output path: {e}")))?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ConverterError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            base,
            output_base,
            client,
        })
    }

    /// Build the artifact for `reference`. No network call is made.
    ///
    /// Absolute `http(s)` references are used as-is, `/`-prefixed ones are
    /// resolved against the server origin, and bare names against the
    /// configured output path.
    ///
    /// `source_name` is the uploaded statement's file name; it drives the
    /// suggested local name (`<stem>_convertido.<ext>`).
    pub fn resolve(
        &self,
        reference: &str,
        source_name: Option<&str>,
    ) -> Result<Artifact, ConverterError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ConverterError::NoOutputAvailable);
        }

        let url = if reference.starts_with("http://") || reference.starts_with("https://") {
            Url::parse(reference)
                .map_err(|_| ConverterError::InvalidOutputReference(reference.to_string()))?
        } else {
            if reference.split(['/', '\\']).any(|seg| seg == "..") {
                return Err(ConverterError::InvalidOutputReference(
                    reference.to_string(),
                ));
            }
            let joined = if reference.starts_with('/') {
                self.base.join(reference)
            } else {
                self.output_base.join(reference)
            };
            joined.map_err(|_| ConverterError::InvalidOutputReference(reference.to_string()))?
        };

        let file_name = suggested_file_name(reference, source_name);
        debug!("Resolved output '{}' to {}", reference, url);

        Ok(Artifact {
            reference: reference.to_string(),
            url,
            file_name,
        })
    }

    /// Fetch the artifact's bytes.
    pub async fn fetch(&self, artifact: &Artifact) -> Result<Vec<u8>, ConverterError> {
        let failed = |reason: String| ConverterError::DownloadFailed {
            url: artifact.url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(artifact.url.clone())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        info!("Downloaded {} ({} bytes)", artifact.url, bytes.len());
        Ok(bytes.to_vec())
    }

    /// Fetch the artifact and write it to `path` atomically.
    ///
    /// The bytes go to a temp file in the destination directory which is
    /// then renamed over `path`, so a failed download never leaves a
    /// truncated file behind. Returns the number of bytes written.
    pub async fn save(&self, artifact: &Artifact, path: impl AsRef<Path>) -> Result<u64, ConverterError> {
        let path = path.as_ref().to_path_buf();
        let bytes = self.fetch(artifact).await?;
        let len = bytes.len() as u64;

        let write_failed = |source: std::io::Error| ConverterError::OutputWriteFailed {
            path: path.clone(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await.map_err(write_failed)?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| write_failed(std::io::Error::other(e.to_string())))?
        .map_err(write_failed)?;

        info!("Saved converted statement to {}", path.display());
        Ok(len)
    }
}

/// `<source stem>_convertido.<reference ext>`, falling back to the
/// reference's own name when the source is unknown.
fn suggested_file_name(reference: &str, source_name: Option<&str>) -> String {
    let ref_name = reference
        .rsplit(['/', '\\'])
        .next()
        .map(|n| n.split(['?', '#']).next().unwrap_or(n))
        .unwrap_or(reference);
    let extension = match ref_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
        _ => "xlsx".to_string(),
    };

    let stem = match source_name {
        Some(name) => format!("{}{CONVERTED_SUFFIX}", file_stem(name)),
        None if !ref_name.is_empty() => file_stem(ref_name).to_string(),
        None => format!("statement{CONVERTED_SUFFIX}"),
    };

    let stem = UNSAFE_FILE_CHARS.replace_all(stem.trim(), "_");
    format!("{stem}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> DownloadResolver {
        let config = ClientConfig::builder()
            .base_url("http://backend:8000")
            .build()
            .unwrap();
        DownloadResolver::new(&config).unwrap()
    }

    #[test]
    fn bare_reference_resolves_under_output_path() {
        let a = resolver().resolve("out123.xlsx", Some("statement.csv")).unwrap();
        assert_eq!(a.url.as_str(), "http://backend:8000/output/out123.xlsx");
        assert_eq!(a.reference, "out123.xlsx");
        assert_eq!(a.file_name, "statement_convertido.xlsx");
    }

    #[test]
    fn server_relative_reference_uses_origin() {
        let a = resolver().resolve("/files/2024/out.xlsx", None).unwrap();
        assert_eq!(a.url.as_str(), "http://backend:8000/files/2024/out.xlsx");
        assert_eq!(a.file_name, "out.xlsx");
    }

    #[test]
    fn absolute_reference_used_as_is() {
        let a = resolver()
            .resolve("https://cdn.example/x/out.xlsx", Some("Extrato.pdf"))
            .unwrap();
        assert_eq!(a.url.as_str(), "https://cdn.example/x/out.xlsx");
        assert_eq!(a.file_name, "Extrato_convertido.xlsx");
    }

    #[test]
    fn empty_reference_has_no_output() {
        assert!(matches!(
            resolver().resolve("   ", None),
            Err(ConverterError::NoOutputAvailable)
        ));
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(matches!(
            resolver().resolve("../secrets.txt", None),
            Err(ConverterError::InvalidOutputReference(_))
        ));
        assert!(matches!(
            resolver().resolve("a\\..\\b.xlsx", None),
            Err(ConverterError::InvalidOutputReference(_))
        ));
    }

    #[test]
    fn custom_output_path_without_trailing_slash() {
        let config = ClientConfig::builder()
            .base_url("http://backend:8000/app")
            .output_path("/static/converted")
            .build()
            .unwrap();
        let r = DownloadResolver::new(&config).unwrap();
        let a = r.resolve("out.xlsx", None).unwrap();
        assert_eq!(a.url.as_str(), "http://backend:8000/app/static/converted/out.xlsx");
    }

    #[test]
    fn suggested_names() {
        assert_eq!(
            suggested_file_name("out.csv", Some("jan: extrato?.xlsx")),
            "jan_ extrato__convertido.csv"
        );
        assert_eq!(suggested_file_name("abc", Some("x.pdf")), "x_convertido.xlsx");
        assert_eq!(suggested_file_name("abc", None), "abc.xlsx");
        assert_eq!(
            suggested_file_name("/dl/out.XLSX?token=1", None),
            "out.xlsx"
        );
    }
}

//! Data carried between the session, the transport, and the backend.

use crate::banks::Bank;
use crate::config::normalise_extension;
use crate::error::ConverterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A statement file chosen by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedFile {
    bytes: Vec<u8>,
    file_name: String,
    extension: String,
}

impl UploadedFile {
    /// Wrap in-memory bytes. The extension is taken from `file_name`.
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let file_name = file_name.into();
        let extension = match file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => normalise_extension(ext),
            _ => String::new(),
        };
        Self {
            bytes: bytes.into(),
            file_name,
            extension,
        }
    }

    /// Read a statement from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ConverterError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ConverterError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "statement".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Lowercase extension with a leading dot, or `""` when the name has none.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Size in KiB, as shown next to the selected file.
    pub fn size_kib(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0
    }

    /// MIME type for the multipart `statement` part.
    pub fn mime_type(&self) -> &'static str {
        match self.extension.as_str() {
            ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ".xls" => "application/vnd.ms-excel",
            ".csv" => "text/csv",
            ".pdf" => "application/pdf",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("extension", &self.extension)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// File name without its extension. Dot-files keep their full name.
pub(crate) fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Everything the backend needs for one conversion.
#[derive(Clone)]
pub struct ConversionRequest {
    pub file: UploadedFile,
    pub bank: Bank,
    pub credential: Option<String>,
}

impl fmt::Debug for ConversionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRequest")
            .field("file", &self.file)
            .field("bank", &self.bank.id)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Direction of a categorized line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntryType {
    Income,
    Expense,
}

impl EntryType {
    /// Single-letter wire code used by the backend.
    pub fn code(&self) -> &'static str {
        match self {
            EntryType::Income => "I",
            EntryType::Expense => "E",
        }
    }
}

impl TryFrom<String> for EntryType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "i" | "income" | "receita" | "entrada" => Ok(EntryType::Income),
            "e" | "expense" | "despesa" | "saida" | "saída" => Ok(EntryType::Expense),
            other => Err(format!("unknown entry type '{other}'")),
        }
    }
}

impl From<EntryType> for String {
    fn from(value: EntryType) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Income => f.write_str("Income"),
            EntryType::Expense => f.write_str("Expense"),
        }
    }
}

/// A category proposed by the backend for one statement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Source text of the statement line.
    #[serde(rename = "texto")]
    pub text: String,
    /// Proposed category.
    #[serde(rename = "sugestao")]
    pub category: String,
    #[serde(rename = "tipo")]
    pub entry_type: EntryType,
}

impl Suggestion {
    pub fn new(text: impl Into<String>, category: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
            entry_type,
        }
    }
}

/// Successful body of the convert endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertResponse {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    /// Output reference: where the converted file will be served.
    #[serde(rename = "outputFile")]
    pub output_file: String,
}

//! Registry of supported banks and their input requirements.
//!
//! The registry is built once and shared read-only (`Arc<BankRegistry>`)
//! for the lifetime of a session. A deployment either uses the built-in
//! list or supplies its own as JSON.

use crate::error::ConverterError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A bank whose statements the backend can convert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    /// Identifier sent to the backend as the `bank` field. Unique in a registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Statements from this bank are password protected.
    #[serde(default)]
    pub requires_credential: bool,
}

impl Bank {
    pub fn new(id: impl Into<String>, name: impl Into<String>, requires_credential: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            requires_credential,
        }
    }
}

/// Ordered, immutable set of [`Bank`]s.
#[derive(Debug, Clone)]
pub struct BankRegistry {
    banks: Vec<Bank>,
}

impl BankRegistry {
    /// Build a registry, rejecting empty lists, blank ids and duplicate ids.
    pub fn new(banks: Vec<Bank>) -> Result<Self, ConverterError> {
        if banks.is_empty() {
            return Err(ConverterError::InvalidConfig(
                "bank registry must contain at least one bank".into(),
            ));
        }
        let mut seen = HashSet::new();
        for bank in &banks {
            if bank.id.trim().is_empty() {
                return Err(ConverterError::InvalidConfig(
                    "bank id must not be blank".into(),
                ));
            }
            if !seen.insert(bank.id.clone()) {
                return Err(ConverterError::InvalidConfig(format!(
                    "duplicate bank id '{}'",
                    bank.id
                )));
            }
        }
        Ok(Self { banks })
    }

    /// The banks supported by the reference backend.
    pub fn builtin() -> Self {
        Self {
            banks: vec![
                Bank::new("C6", "C6 Bank", true),
                Bank::new("Itau", "Itaú", false),
                Bank::new("XP", "XP Investimentos", false),
                Bank::new("Avenue", "Avenue", false),
                Bank::new("Clear", "Clear Corretora", false),
            ],
        }
    }

    /// Parse a JSON array of banks, e.g. one served by the backend.
    pub fn from_json(json: &str) -> Result<Self, ConverterError> {
        let banks: Vec<Bank> = serde_json::from_str(json)
            .map_err(|e| ConverterError::InvalidConfig(format!("bank list: {e}")))?;
        Self::new(banks)
    }

    /// All banks, in registration order.
    pub fn list_banks(&self) -> &[Bank] {
        &self.banks
    }

    /// Look a bank up by id.
    pub fn get(&self, id: &str) -> Result<&Bank, ConverterError> {
        self.banks
            .iter()
            .find(|b| b.id == id)
            .ok_or_else(|| ConverterError::UnknownBank { id: id.to_string() })
    }

    pub fn requires_credential(&self, id: &str) -> Result<bool, ConverterError> {
        self.get(id).map(|b| b.requires_credential)
    }
}

impl Default for BankRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

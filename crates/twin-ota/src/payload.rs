//! Device-twin payload handling
//!
//! A twin update carries the firmware settings either at the top level
//! (`firmware.url`, `firmware.pem`) for a partial patch, or below
//! `desired` for a complete document. Only the fields present in the
//! payload are applied.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::descriptor::UpdateDescriptor;
use crate::error::UpdateError;

/// Addressing mode of a twin payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinScope {
    /// Desired-property patch: settings live under `firmware`
    #[default]
    Partial,
    /// Full twin document: settings live under `desired.firmware`
    Complete,
}

impl TwinScope {
    /// JSON pointer of the firmware object for this scope.
    pub fn firmware_pointer(self) -> &'static str {
        match self {
            TwinScope::Partial => "/firmware",
            TwinScope::Complete => "/desired/firmware",
        }
    }
}

impl FromStr for TwinScope {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "partial" => Ok(TwinScope::Partial),
            "complete" => Ok(TwinScope::Complete),
            other => Err(UpdateError::invalid_argument(format!(
                "unknown twin scope '{other}', expected 'partial' or 'complete'"
            ))),
        }
    }
}

/// Which descriptor fields a payload replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadChanges {
    /// The source URL was replaced
    pub source_updated: bool,
    /// The trust material was replaced
    pub trust_updated: bool,
}

impl PayloadChanges {
    /// Whether anything changed.
    pub fn any(&self) -> bool {
        self.source_updated || self.trust_updated
    }
}

impl UpdateDescriptor {
    /// Parse a twin payload and apply the firmware fields it carries.
    ///
    /// Fields that are absent are left untouched. A field that is present
    /// but not a non-empty string is skipped with a warning; the other
    /// field is still applied.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `payload` is not JSON.
    pub fn apply_update_from_payload(
        &mut self,
        payload: &str,
        scope: TwinScope,
    ) -> Result<PayloadChanges, UpdateError> {
        let root: Value = serde_json::from_str(payload)
            .map_err(|e| UpdateError::invalid_argument(format!("malformed twin payload: {e}")))?;
        Ok(self.apply_update_from_value(&root, scope))
    }

    /// Apply the firmware fields of an already parsed twin document.
    pub fn apply_update_from_value(&mut self, root: &Value, scope: TwinScope) -> PayloadChanges {
        let mut changes = PayloadChanges::default();
        let Some(firmware) = root.pointer(scope.firmware_pointer()) else {
            debug!(?scope, "Twin payload carries no firmware settings");
            return changes;
        };

        if let Some(url) = firmware.get("url") {
            match url.as_str().map(|url| self.set_source(url)) {
                Some(Ok(())) => changes.source_updated = true,
                Some(Err(e)) => warn!("Ignoring firmware url from twin: {e}"),
                None => warn!("Ignoring firmware url from twin: not a string"),
            }
        }
        if let Some(pem) = firmware.get("pem") {
            match pem.as_str().map(|pem| self.set_trust(pem)) {
                Some(Ok(())) => changes.trust_updated = true,
                Some(Err(e)) => warn!("Ignoring firmware pem from twin: {e}"),
                None => warn!("Ignoring firmware pem from twin: not a string"),
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_scope_applies_both_fields() -> Result<(), UpdateError> {
        let mut descriptor = UpdateDescriptor::new();
        let changes = descriptor.apply_update_from_payload(
            r#"{"firmware": {"url": "https://fw.example/app.bin", "pem": "CERT"}, "$version": 4}"#,
            TwinScope::Partial,
        )?;
        assert!(changes.source_updated && changes.trust_updated);
        assert_eq!(descriptor.source_url(), Some("https://fw.example/app.bin"));
        assert_eq!(descriptor.trust_material().map(|t| t.as_str()), Some("CERT"));
        Ok(())
    }

    #[test]
    fn test_complete_scope_reads_desired_section() -> Result<(), UpdateError> {
        let mut descriptor = UpdateDescriptor::new();
        let payload = r#"{
            "desired": {"firmware": {"url": "https://fw.example/desired.bin"}},
            "reported": {"firmware": {"url": "https://fw.example/reported.bin"}}
        }"#;
        let changes = descriptor.apply_update_from_payload(payload, TwinScope::Complete)?;
        assert!(changes.source_updated);
        assert!(!changes.trust_updated);
        assert_eq!(descriptor.source_url(), Some("https://fw.example/desired.bin"));
        Ok(())
    }

    #[test]
    fn test_scope_mismatch_changes_nothing() -> Result<(), UpdateError> {
        let mut descriptor = UpdateDescriptor::new();
        let changes = descriptor.apply_update_from_payload(
            r#"{"desired": {"firmware": {"url": "https://fw.example/a.bin"}}}"#,
            TwinScope::Partial,
        )?;
        assert!(!changes.any());
        assert!(descriptor.source_url().is_none());
        Ok(())
    }

    #[test]
    fn test_partial_payload_keeps_existing_trust() -> Result<(), UpdateError> {
        let mut descriptor = UpdateDescriptor::new();
        descriptor.set_trust("CERT-A")?;
        descriptor.apply_update_from_payload(r#"{"firmware": {"url": "X"}}"#, TwinScope::Partial)?;
        assert_eq!(descriptor.source_url(), Some("X"));
        assert_eq!(descriptor.trust_material().map(|t| t.as_str()), Some("CERT-A"));
        Ok(())
    }

    #[test]
    fn test_non_string_field_is_skipped() -> Result<(), UpdateError> {
        let mut descriptor = UpdateDescriptor::new();
        let changes = descriptor.apply_update_from_payload(
            r#"{"firmware": {"url": 42, "pem": "CERT"}}"#,
            TwinScope::Partial,
        )?;
        assert!(!changes.source_updated);
        assert!(changes.trust_updated);
        assert!(descriptor.source_url().is_none());
        Ok(())
    }

    #[test]
    fn test_empty_string_field_is_skipped() -> Result<(), UpdateError> {
        let mut descriptor = UpdateDescriptor::new();
        descriptor.set_source("https://fw.example/kept.bin")?;
        let changes = descriptor
            .apply_update_from_payload(r#"{"firmware": {"url": ""}}"#, TwinScope::Partial)?;
        assert!(!changes.any());
        assert_eq!(descriptor.source_url(), Some("https://fw.example/kept.bin"));
        Ok(())
    }

    #[test]
    fn test_malformed_payload_is_invalid_argument() {
        let mut descriptor = UpdateDescriptor::new();
        let result = descriptor.apply_update_from_payload("{firmware", TwinScope::Partial);
        assert!(matches!(result, Err(UpdateError::InvalidArgument(_))));
    }

    #[test]
    fn test_scope_from_str() -> Result<(), UpdateError> {
        assert_eq!("partial".parse::<TwinScope>()?, TwinScope::Partial);
        assert_eq!("Complete".parse::<TwinScope>()?, TwinScope::Complete);
        assert!(matches!("reported".parse::<TwinScope>(), Err(_)));
        Ok(())
    }
}

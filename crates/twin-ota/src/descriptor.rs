//! Update descriptor
//!
//! Holds where to fetch the next image from, the trust anchor for that
//! connection and the cached "already on the latest version" verdict. The
//! descriptor is an explicitly owned context object: it is created once,
//! mutated by a single writer and handed to the driver by reference.

use core::fmt;

use tracing::{debug, info};

use crate::error::UpdateError;

/// Certificate material (PEM) used to authenticate the update server
#[derive(Clone, PartialEq, Eq)]
pub struct TrustMaterial(String);

impl TrustMaterial {
    /// Wrap PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `pem` is empty.
    pub fn new(pem: impl Into<String>) -> Result<Self, UpdateError> {
        let pem = pem.into();
        if pem.is_empty() {
            return Err(UpdateError::invalid_argument("trust material is empty"));
        }
        Ok(Self(pem))
    }

    /// PEM text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// PEM bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Certificates stay out of logs.
impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrustMaterial({} bytes)", self.0.len())
    }
}

/// Where and how to fetch the next firmware image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateDescriptor {
    source_url: Option<String>,
    trust_material: Option<TrustMaterial>,
    up_to_date: bool,
}

impl UpdateDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty state. Idempotent.
    pub fn initialize(&mut self) {
        *self = Self::default();
    }

    /// Replace the source URL.
    ///
    /// Clears the cached up-to-date verdict, even when the URL is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `url` is empty.
    pub fn set_source(&mut self, url: &str) -> Result<(), UpdateError> {
        if url.is_empty() {
            return Err(UpdateError::invalid_argument("source url is empty"));
        }
        self.source_url = Some(url.to_string());
        self.up_to_date = false;
        info!(url, len = url.len(), "Setting firmware url");
        Ok(())
    }

    /// Replace the trust material.
    ///
    /// Clears the cached up-to-date verdict, even when the material is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `pem` is empty.
    pub fn set_trust(&mut self, pem: &str) -> Result<(), UpdateError> {
        let material = TrustMaterial::new(pem)?;
        debug!(len = material.len(), "Setting firmware trust material");
        self.trust_material = Some(material);
        self.up_to_date = false;
        Ok(())
    }

    /// Configured source URL.
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    /// Configured trust material.
    pub fn trust_material(&self) -> Option<&TrustMaterial> {
        self.trust_material.as_ref()
    }

    /// Whether both the URL and the trust material are present.
    pub fn is_configured(&self) -> bool {
        self.source_url.is_some() && self.trust_material.is_some()
    }

    /// Cached verdict, logged for operators.
    pub fn is_latest_known(&self) -> bool {
        if self.up_to_date {
            info!("Firmware version is up to date");
        } else {
            info!("Firmware update is required");
        }
        self.up_to_date
    }

    /// Cached verdict, without side effects.
    pub fn is_latest(&self) -> bool {
        self.up_to_date
    }

    pub(crate) fn mark_up_to_date(&mut self) {
        self.up_to_date = true;
    }

    /// Both transfer parameters, or the name of the first missing one.
    pub(crate) fn require_config(&self) -> Result<(String, TrustMaterial), UpdateError> {
        let url = self
            .source_url
            .clone()
            .ok_or(UpdateError::MissingConfig("source_url"))?;
        let trust = self
            .trust_material
            .clone()
            .ok_or(UpdateError::MissingConfig("trust_material"))?;
        Ok((url, trust))
    }
}

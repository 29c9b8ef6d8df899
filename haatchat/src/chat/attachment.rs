//! Turns media-picker responses into validated image payloads.
//!
//! The resolver is the only place the core touches the device's image
//! picker. It checks the shape of the returned reference and never opens or
//! reads the file behind it.

use haatchat_proto::message::AttachmentPayload;

/// URI schemes accepted when no explicit allow-list is configured.
pub const DEFAULT_ALLOWED_SCHEMES: [&str; 5] = ["file", "content", "ph", "https", "http"];

/// What the external media picker handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerResponse {
    /// The user dismissed the picker.
    Cancelled,
    /// The picker reported an error.
    Error {
        /// Picker-specific error code (e.g. `"permission"`).
        code: String,
    },
    /// The user picked an asset.
    Picked {
        /// Opaque URI of the picked asset.
        uri: String,
    },
}

impl PickerResponse {
    /// Shorthand for a successful pick.
    pub fn picked(uri: impl Into<String>) -> Self {
        Self::Picked { uri: uri.into() }
    }
}

/// Why an attachment reference was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    /// The user dismissed the picker.
    #[error("image selection was cancelled")]
    Cancelled,

    /// The picker failed.
    #[error("image picker failed: {code}")]
    Picker {
        /// Picker error code.
        code: String,
    },

    /// The picker returned an empty reference.
    #[error("image reference is empty")]
    Empty,

    /// The reference is not a URI.
    #[error("image reference is not a valid URI: {0}")]
    Malformed(String),

    /// The URI scheme is not one the view can render.
    #[error("unsupported image URI scheme {0:?}")]
    UnsupportedScheme(String),
}

/// Validates picker responses against a scheme allow-list.
#[derive(Debug, Clone)]
pub struct AttachmentResolver {
    allowed_schemes: Vec<String>,
}

impl AttachmentResolver {
    /// Creates a resolver accepting the given URI schemes (case-insensitive).
    pub fn new<I, S>(allowed_schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_schemes: allowed_schemes
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Resolves a picker response into a payload for an image message.
    ///
    /// # Errors
    ///
    /// Returns an [`AttachmentError`] for cancelled or failed picks, empty
    /// references, unparseable URIs, and schemes outside the allow-list.
    pub fn resolve(&self, response: PickerResponse) -> Result<AttachmentPayload, AttachmentError> {
        let uri = match response {
            PickerResponse::Cancelled => return Err(AttachmentError::Cancelled),
            PickerResponse::Error { code } => return Err(AttachmentError::Picker { code }),
            PickerResponse::Picked { uri } => uri,
        };

        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(AttachmentError::Empty);
        }

        let parsed = url::Url::parse(trimmed).map_err(|e| AttachmentError::Malformed(e.to_string()))?;
        // `Url` lowercases the scheme on parse.
        if !self.allowed_schemes.iter().any(|s| s == parsed.scheme()) {
            return Err(AttachmentError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        Ok(AttachmentPayload::new(trimmed))
    }
}

impl Default for AttachmentResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_SCHEMES)
    }
}

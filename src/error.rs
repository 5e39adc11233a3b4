//! Error types shared by the codec, request, dispatch and download layers.
//!
//! Request-response failures flow out through [`LwM2mError::to_coap_code`]
//! [`LwM2mError::to_coap_code`]; download failures flow out through
//! [`crate::download::TransferStatus`] instead of this enum's CoAP mapping.

use thiserror::Error;

/// Errors produced anywhere in the LwM2M core.
#[derive(Error, Debug)]
pub enum LwM2mError {
    /// The inbound payload or path did not match what the decoder expected.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A CoAP critical option was present that this core does not recognize
    /// for the request's method.
    #[error("bad option: {0}")]
    BadOption(String),

    /// Output context invariant violated (path outside base, leaf required,
    /// double emission, etc).
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// Requested/target path has no matching object, instance or resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// Action not permitted on the addressed path (read-only resource, etc).
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// No acceptable content format could be produced for the request.
    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    /// Content-Format value has no registered codec.
    #[error("unsupported content format: {0}")]
    UnsupportedContentFormat(u16),

    /// Caller's destination buffer was smaller than the remaining payload.
    /// Not a terminal error: the caller is expected to loop.
    #[error("buffer too short")]
    BufferTooShort,

    /// Composite read/write needs another FETCH/iPATCH payload block.
    #[error("need next payload")]
    NeedNextPayload,

    /// Input context sentinel: no more entries in the stream.
    #[error("end of input")]
    GetPathEnd,

    /// Object/resource handler or transaction failed for reasons with no
    /// more specific classification.
    #[error("internal server error: {0}")]
    Internal(String),

    /// Method handler wasn't implemented by the target object.
    #[error("method not implemented: {0}")]
    MethodNotImplemented(String),

    /// JSON parsing failed below the streaming decoder (config, SenML-JSON
    /// document boundaries).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem or socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transfer driver failure.
    #[error("network error: {0}")]
    Network(String),

    /// TOML configuration failed to parse.
    #[error("config error: {0}")]
    Config(String),
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, LwM2mError>;

impl From<reqwest::Error> for LwM2mError {
    fn from(err: reqwest::Error) -> Self {
        LwM2mError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for LwM2mError {
    fn from(err: toml::de::Error) -> Self {
        LwM2mError::Config(err.to_string())
    }
}

/// A CoAP response code, expressed as `(class, detail)` per RFC 7252 §3,
/// e.g. 4.04 is `(4, 4)`. Kept numeric rather than an enum so the
/// dispatcher can pass a handler's own numeric override
/// through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoapCode {
    pub class: u8,
    pub detail: u8,
}

impl CoapCode {
    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// `true` for 4.xx/5.xx — the dispatcher's "pass through verbatim"
    /// rule the dispatcher applies when relaying a handler's own response code.
    pub fn is_error(&self) -> bool {
        self.class == 4 || self.class == 5
    }
}

impl std::fmt::Display for CoapCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

impl LwM2mError {
    /// Maps a codec/dispatch error to its CoAP response code:
    /// `FormatMismatch`/`MethodNotImplemented` become 4.06 Not Acceptable,
    /// everything else not already a CoAP code becomes 5.00.
    pub fn to_coap_code(&self) -> CoapCode {
        match self {
            LwM2mError::BadRequest(_) => CoapCode::new(4, 0),
            LwM2mError::BadOption(_) => CoapCode::new(4, 2),
            LwM2mError::NotFound(_) => CoapCode::new(4, 4),
            LwM2mError::MethodNotAllowed(_) => CoapCode::new(4, 5),
            LwM2mError::FormatMismatch(_) | LwM2mError::MethodNotImplemented(_) => {
                CoapCode::new(4, 6)
            }
            LwM2mError::NotAcceptable(_) => CoapCode::new(4, 6),
            LwM2mError::UnsupportedContentFormat(_) => CoapCode::new(4, 15),
            _ => CoapCode::new(5, 0),
        }
    }

    /// `true` if retrying the same operation without changing inputs could
    /// plausibly succeed (network-adjacent failures only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, LwM2mError::Network(_) | LwM2mError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_4_00() {
        assert_eq!(
            LwM2mError::BadRequest("x".into()).to_coap_code(),
            CoapCode::new(4, 0)
        );
    }

    #[test]
    fn format_mismatch_maps_to_not_acceptable() {
        assert_eq!(
            LwM2mError::FormatMismatch("x".into()).to_coap_code(),
            CoapCode::new(4, 6)
        );
    }

    #[test]
    fn internal_maps_to_5_00() {
        assert_eq!(
            LwM2mError::Internal("x".into()).to_coap_code(),
            CoapCode::new(5, 0)
        );
    }

    #[test]
    fn coap_code_display() {
        assert_eq!(CoapCode::new(4, 4).to_string(), "4.04");
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(LwM2mError::Network("timeout".into()).is_retryable());
        assert!(!LwM2mError::BadRequest("x".into()).is_retryable());
    }
}

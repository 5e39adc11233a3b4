//! Picks input/output formats for a request, applying the "composite
//! operations are SenML-only" and "no format means pick a sane default"
//! rules the request parser and dispatcher both rely on.

use super::{ContentFormat, InputFormat, OutputFormat};
use crate::error::{LwM2mError, Result};

/// The operation being carried out, independent of transport details —
/// shared between the request parser and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Discover,
    Write,
    WriteUpdate,
    Execute,
    Create,
    Delete,
    ReadComposite,
    WriteComposite,
    WriteAttributes,
    BootstrapFinish,
}

impl Action {
    /// `READ_COMPOSITE`/`WRITE_COMPOSITE` (and Send, handled the same way
    /// one layer up) are restricted to the two SenML representations.
    pub fn is_composite(self) -> bool {
        matches!(self, Action::ReadComposite | Action::WriteComposite)
    }
}

/// Resolves content formats to input/output context constructors for one
/// request, rejecting combinations the action doesn't support.
pub struct Selector;

impl Selector {
    /// Default format used when a request carries no Content-Format (for
    /// writes) or no Accept option (for reads): TLV for single-resource
    /// traffic, SenML-CBOR once the action is composite.
    pub fn default_format(action: Action) -> ContentFormat {
        if action.is_composite() {
            ContentFormat::SenmlCbor
        } else {
            ContentFormat::LwM2mTlv
        }
    }

    pub fn input_format(action: Action, format: ContentFormat) -> Result<InputFormat> {
        if action.is_composite() && !matches!(format, ContentFormat::SenmlCbor | ContentFormat::SenmlJson) {
            return Err(LwM2mError::NotAcceptable(format!(
                "composite write requires SenML-CBOR or SenML-JSON, got {}",
                format.numeric_id()
            )));
        }
        match format {
            ContentFormat::PlainText => Ok(InputFormat::PlainText),
            ContentFormat::OctetStream => Ok(InputFormat::OctetStream),
            ContentFormat::Cbor => Ok(InputFormat::Cbor),
            ContentFormat::SenmlCbor => Ok(InputFormat::SenmlCbor),
            ContentFormat::SenmlJson => Ok(InputFormat::SenmlJson),
            ContentFormat::LwM2mTlv => Ok(InputFormat::LwM2mTlv),
            ContentFormat::LinkFormat | ContentFormat::LwM2mJson => {
                Err(LwM2mError::UnsupportedContentFormat(format.numeric_id()))
            }
        }
    }

    /// Format for a response body. Unlike `input_format`, an unsupported
    /// format here means the request's Accept option can't be satisfied,
    /// which is `NotAcceptable` rather than `UnsupportedContentFormat` —
    /// the latter is reserved for a write the server can't parse.
    pub fn output_format(action: Action, format: ContentFormat) -> Result<OutputFormat> {
        if action.is_composite() && !matches!(format, ContentFormat::SenmlCbor | ContentFormat::SenmlJson) {
            return Err(LwM2mError::NotAcceptable(format!(
                "composite read requires SenML-CBOR or SenML-JSON, got {}",
                format.numeric_id()
            )));
        }
        match format {
            ContentFormat::PlainText => Ok(OutputFormat::PlainText),
            ContentFormat::OctetStream => Ok(OutputFormat::OctetStream),
            ContentFormat::Cbor => Ok(OutputFormat::Cbor),
            ContentFormat::SenmlCbor => Ok(OutputFormat::SenmlCbor),
            ContentFormat::SenmlJson => Ok(OutputFormat::SenmlJson),
            ContentFormat::LwM2mTlv => Ok(OutputFormat::LwM2mTlv),
            ContentFormat::LinkFormat | ContentFormat::LwM2mJson => Err(LwM2mError::NotAcceptable(format!(
                "no output context for content-format {}",
                format.numeric_id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_actions_reject_tlv() {
        assert!(Selector::input_format(Action::ReadComposite, ContentFormat::LwM2mTlv).is_err());
        assert!(Selector::input_format(Action::ReadComposite, ContentFormat::SenmlCbor).is_ok());
    }

    #[test]
    fn default_formats_match_action_shape() {
        assert_eq!(Selector::default_format(Action::Read), ContentFormat::LwM2mTlv);
        assert_eq!(Selector::default_format(Action::ReadComposite), ContentFormat::SenmlCbor);
    }

    #[test]
    fn link_format_is_never_a_body_codec() {
        let err = Selector::output_format(Action::Discover, ContentFormat::LinkFormat).unwrap_err();
        assert_eq!(err.to_coap_code(), crate::error::CoapCode::new(4, 6));
    }

    #[test]
    fn unsupported_accept_on_read_is_not_acceptable_not_4_15() {
        let err = Selector::output_format(Action::Read, ContentFormat::LinkFormat).unwrap_err();
        assert_eq!(err.to_coap_code(), crate::error::CoapCode::new(4, 6));
    }

    #[test]
    fn composite_format_mismatch_is_not_acceptable() {
        let in_err = Selector::input_format(Action::WriteComposite, ContentFormat::LwM2mTlv).unwrap_err();
        assert_eq!(in_err.to_coap_code(), crate::error::CoapCode::new(4, 6));
        let out_err = Selector::output_format(Action::ReadComposite, ContentFormat::LwM2mTlv).unwrap_err();
        assert_eq!(out_err.to_coap_code(), crate::error::CoapCode::new(4, 6));
    }
}

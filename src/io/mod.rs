//! Path-addressable streaming input/output contexts and the dynamic
//! codec selector that picks a context implementation for a given
//! `(content format, action)` pair.
//!
//! Each format is a variant of a closed enum rather than a boxed trait
//! object, so adding a format is a compile-time exhaustiveness check
//! rather than a registration call.

mod input;
mod output;
mod selector;

pub use input::{InputContext, InputFormat, LeafValue};
pub use output::{OutputContext, OutputFormat};
pub use selector::{Action, Selector};

/// Registered LwM2M content formats and their numeric Content-Format ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ContentFormat {
    PlainText,
    LinkFormat,
    OctetStream,
    Cbor,
    SenmlJson,
    SenmlCbor,
    LwM2mTlv,
    LwM2mJson,
}

impl ContentFormat {
    pub const fn numeric_id(self) -> u16 {
        match self {
            ContentFormat::PlainText => 0,
            ContentFormat::LinkFormat => 40,
            ContentFormat::OctetStream => 42,
            ContentFormat::Cbor => 60,
            ContentFormat::SenmlJson => 110,
            ContentFormat::SenmlCbor => 112,
            ContentFormat::LwM2mTlv => 11542,
            ContentFormat::LwM2mJson => 11543,
        }
    }

    pub const fn from_numeric_id(id: u16) -> Option<ContentFormat> {
        match id {
            0 => Some(ContentFormat::PlainText),
            40 => Some(ContentFormat::LinkFormat),
            42 => Some(ContentFormat::OctetStream),
            60 => Some(ContentFormat::Cbor),
            110 => Some(ContentFormat::SenmlJson),
            112 => Some(ContentFormat::SenmlCbor),
            11542 => Some(ContentFormat::LwM2mTlv),
            11543 => Some(ContentFormat::LwM2mJson),
            _ => None,
        }
    }

    pub const fn is_hierarchical(self) -> bool {
        matches!(
            self,
            ContentFormat::SenmlCbor | ContentFormat::SenmlJson | ContentFormat::LwM2mTlv | ContentFormat::LwM2mJson
        )
    }

    pub const ALL: [ContentFormat; 8] = [
        ContentFormat::PlainText,
        ContentFormat::LinkFormat,
        ContentFormat::OctetStream,
        ContentFormat::Cbor,
        ContentFormat::SenmlJson,
        ContentFormat::SenmlCbor,
        ContentFormat::LwM2mTlv,
        ContentFormat::LwM2mJson,
    ];
}

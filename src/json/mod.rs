//! Streaming, character-driven JSON decoder.
//!
//! Used for SenML-JSON and for any config/control-plane JSON this core is
//! handed as an opaque document. Container end is detected the same way as
//! [`crate::cbor::Decoder`]: compare [`Decoder::nesting_level`] before and
//! after `enter_array`/`enter_map` rather than a sentinel "end" type.

mod decoder;

pub use decoder::{Decoder, JsonType};

use super::{
    MajorType, ADDITIONAL_1BYTE, ADDITIONAL_2BYTE, ADDITIONAL_4BYTE, ADDITIONAL_8BYTE,
    FLOAT32, FLOAT64, SIMPLE_FALSE, SIMPLE_TRUE,
};

/// A stateless sink that appends CBOR-encoded values to a byte buffer.
///
/// "Stateless" means the encoder holds no bytes of its own beyond the
/// caller-supplied buffer — every `*_begin`/`*_append`/`*_end` call writes
/// directly, there is no staged re-buffering (SenML-CBOR's definite-array
/// requirement is handled one layer up, in `crate::senml`).
pub struct Encoder<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Encoder { out }
    }

    fn write_head(&mut self, major: MajorType, value: u64) {
        let major_bits = (major as u8) << 5;
        if value < 24 {
            self.out.push(major_bits | value as u8);
        } else if value <= u8::MAX as u64 {
            self.out.push(major_bits | ADDITIONAL_1BYTE);
            self.out.push(value as u8);
        } else if value <= u16::MAX as u64 {
            self.out.push(major_bits | ADDITIONAL_2BYTE);
            self.out.extend_from_slice(&(value as u16).to_be_bytes());
        } else if value <= u32::MAX as u64 {
            self.out.push(major_bits | ADDITIONAL_4BYTE);
            self.out.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.out.push(major_bits | ADDITIONAL_8BYTE);
            self.out.extend_from_slice(&value.to_be_bytes());
        }
    }

    pub fn uint(&mut self, value: u64) {
        self.write_head(MajorType::UnsignedInt, value);
    }

    pub fn int(&mut self, value: i64) {
        if value >= 0 {
            self.uint(value as u64);
        } else {
            // RFC 7049 §2.1: negative ints are encoded as -(n+1).
            let magnitude = (-(value + 1)) as u64;
            self.write_head(MajorType::NegativeInt, magnitude);
        }
    }

    pub fn bool(&mut self, value: bool) {
        let major_bits = (MajorType::FloatOrSimple as u8) << 5;
        self.out
            .push(major_bits | if value { SIMPLE_TRUE } else { SIMPLE_FALSE });
    }

    pub fn float(&mut self, value: f32) {
        let major_bits = (MajorType::FloatOrSimple as u8) << 5;
        self.out.push(major_bits | FLOAT32);
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    /// Auto-downcasts to `float()` when `value` survives an f32 round-trip
    /// exactly, matching the encoder's minimum-width philosophy for numbers.
    pub fn double(&mut self, value: f64) {
        if (value as f32) as f64 == value {
            self.float(value as f32);
            return;
        }
        let major_bits = (MajorType::FloatOrSimple as u8) << 5;
        self.out.push(major_bits | FLOAT64);
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn string(&mut self, value: &str) {
        self.write_head(MajorType::TextString, value.len() as u64);
        self.out.extend_from_slice(value.as_bytes());
    }

    pub fn bytes_begin(&mut self, len: usize) {
        self.write_head(MajorType::ByteString, len as u64);
    }

    pub fn bytes_append(&mut self, chunk: &[u8]) {
        self.out.extend_from_slice(chunk);
    }

    /// No-op: the length was already fixed by `bytes_begin` (definite-length
    /// only — this encoder never emits indefinite byte strings).
    pub fn bytes_end(&mut self) {}

    pub fn map_begin(&mut self, entry_count: usize) {
        self.write_head(MajorType::Map, entry_count as u64);
    }

    pub fn array_begin(&mut self, item_count: usize) {
        self.write_head(MajorType::Array, item_count as u64);
    }

    pub fn tag(&mut self, tag: u64) {
        self.write_head(MajorType::Tag, tag);
    }
}

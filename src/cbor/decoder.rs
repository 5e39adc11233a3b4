use crate::error::{LwM2mError, Result};

use super::{
    MajorType, ADDITIONAL_1BYTE, ADDITIONAL_2BYTE, ADDITIONAL_4BYTE, ADDITIONAL_8BYTE,
    ADDITIONAL_INDEFINITE, BREAK, FLOAT32, FLOAT64, SIMPLE_FALSE, SIMPLE_NULL, SIMPLE_TRUE,
    TAG_DECIMAL_FRACTION,
};

const FLOAT16: u8 = 25;

/// The type the cursor is currently sitting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CborType {
    Null,
    Uint,
    NegativeInt,
    Float,
    Double,
    Bool,
    TextString,
    ByteString,
    Array,
    Map,
    Finished,
    Error,
}

/// A tagged union over the four numeric representations CBOR can carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Number {
    /// Accepts uint <= i64::MAX, negative int, and floats/doubles exactly
    /// representable as i64.
    pub fn as_i64(&self) -> Result<i64> {
        match *self {
            Number::U64(v) if v <= i64::MAX as u64 => Ok(v as i64),
            Number::U64(_) => Err(LwM2mError::BadRequest("uint overflows i64".into())),
            Number::I64(v) => Ok(v),
            Number::F32(v) if (v as i64) as f32 == v => Ok(v as i64),
            Number::F64(v) if (v as i64) as f64 == v => Ok(v as i64),
            _ => Err(LwM2mError::BadRequest(
                "float value not exactly representable as i64".into(),
            )),
        }
    }

    /// Accepts uint and non-negative floats exactly representable.
    pub fn as_u64(&self) -> Result<u64> {
        match *self {
            Number::U64(v) => Ok(v),
            Number::I64(v) if v >= 0 => Ok(v as u64),
            Number::F32(v) if v >= 0.0 && (v as u64) as f32 == v => Ok(v as u64),
            Number::F64(v) if v >= 0.0 && (v as u64) as f64 == v => Ok(v as u64),
            _ => Err(LwM2mError::BadRequest(
                "value not representable as non-negative u64".into(),
            )),
        }
    }

    /// All four variants convert to f64.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::U64(v) => v as f64,
            Number::I64(v) => v as f64,
            Number::F32(v) => v as f64,
            Number::F64(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Length {
    Definite(u64),
    Indefinite,
}

struct Frame {
    is_map: bool,
    remaining: Option<u64>, // None = indefinite
    elements_read: u64,
}

/// A streaming, bounded-nesting cursor over a CBOR byte buffer.
///
/// `max_nesting` is a construction parameter: 1 for raw CBOR, 3 for
/// SenML-CBOR, 5 for LwM2M-CBOR.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    max_nesting: usize,
    frames: Vec<Frame>,
    pending_decimal_fraction: bool,
    errored: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], max_nesting: usize) -> Self {
        Decoder {
            buf,
            pos: 0,
            max_nesting,
            frames: Vec::new(),
            pending_decimal_fraction: false,
            errored: false,
        }
    }

    pub fn nesting_level(&self) -> usize {
        self.frames.len()
    }

    pub fn bytes_consumed(&self) -> usize {
        self.pos
    }

    fn peek_byte(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn read_head(&mut self) -> Option<(u8, u8)> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some((b >> 5, b & 0x1F))
    }

    fn read_length(&mut self, additional: u8) -> Option<Length> {
        match additional {
            0..=23 => Some(Length::Definite(additional as u64)),
            ADDITIONAL_1BYTE => {
                let b = *self.buf.get(self.pos)?;
                self.pos += 1;
                Some(Length::Definite(b as u64))
            }
            ADDITIONAL_2BYTE => {
                let s = self.buf.get(self.pos..self.pos + 2)?;
                let v = u16::from_be_bytes(s.try_into().ok()?);
                self.pos += 2;
                Some(Length::Definite(v as u64))
            }
            ADDITIONAL_4BYTE => {
                let s = self.buf.get(self.pos..self.pos + 4)?;
                let v = u32::from_be_bytes(s.try_into().ok()?);
                self.pos += 4;
                Some(Length::Definite(v as u64))
            }
            ADDITIONAL_8BYTE => {
                let s = self.buf.get(self.pos..self.pos + 8)?;
                let v = u64::from_be_bytes(s.try_into().ok()?);
                self.pos += 8;
                Some(Length::Definite(v as u64))
            }
            ADDITIONAL_INDEFINITE => Some(Length::Indefinite),
            _ => None,
        }
    }

    fn consume_tag(&mut self) -> Option<u64> {
        let (major, additional) = self.read_head()?;
        if major != MajorType::Tag as u8 {
            return None;
        }
        match self.read_length(additional)? {
            Length::Definite(tag) => Some(tag),
            Length::Indefinite => None,
        }
    }

    /// Decrements the enclosing container counter and auto-pops when
    /// drained, recursing into the parent frame.
    fn after_value(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.elements_read += 1;
            if let Some(rem) = frame.remaining.as_mut() {
                if *rem > 0 {
                    *rem -= 1;
                }
                if *rem == 0 {
                    self.frames.pop();
                    self.after_value();
                }
            }
        }
    }

    /// Peeks the upcoming value's type, transparently peeling tags (other
    /// than 4, which is reported as `Double` for eager decimal-fraction
    /// decoding) and closing any indefinite containers sitting on their
    /// break byte.
    pub fn peek_type(&mut self) -> CborType {
        if self.errored {
            return CborType::Error;
        }
        loop {
            if let Some(frame) = self.frames.last() {
                if frame.remaining.is_none() && self.peek_byte() == Some(BREAK) {
                    if frame.is_map && frame.elements_read % 2 != 0 {
                        self.errored = true;
                        return CborType::Error;
                    }
                    self.pos += 1;
                    self.frames.pop();
                    self.after_value();
                    continue;
                }
            }
            break;
        }

        let Some(byte) = self.peek_byte() else {
            return if self.frames.is_empty() {
                CborType::Finished
            } else {
                self.errored = true;
                CborType::Error
            };
        };
        if byte == BREAK {
            self.errored = true;
            return CborType::Error;
        }

        match byte >> 5 {
            0 => CborType::Uint,
            1 => CborType::NegativeInt,
            2 => CborType::ByteString,
            3 => CborType::TextString,
            4 => CborType::Array,
            5 => CborType::Map,
            6 => match self.consume_tag() {
                Some(TAG_DECIMAL_FRACTION) => {
                    self.pending_decimal_fraction = true;
                    CborType::Double
                }
                Some(_) => {
                    if self.peek_byte().is_none() {
                        self.errored = true;
                        return CborType::Error;
                    }
                    self.peek_type()
                }
                None => {
                    self.errored = true;
                    CborType::Error
                }
            },
            7 => {
                let additional = byte & 0x1F;
                match additional {
                    SIMPLE_FALSE | SIMPLE_TRUE => CborType::Bool,
                    SIMPLE_NULL => CborType::Null,
                    FLOAT16 | FLOAT32 => CborType::Float,
                    FLOAT64 => CborType::Double,
                    _ => {
                        self.errored = true;
                        CborType::Error
                    }
                }
            }
            _ => unreachable!("major type is 3 bits"),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        if self.peek_type() != CborType::Bool {
            return Err(LwM2mError::BadRequest("expected CBOR bool".into()));
        }
        let (_, additional) = self
            .read_head()
            .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR bool".into()))?;
        self.after_value();
        Ok(additional == SIMPLE_TRUE)
    }

    pub fn read_null(&mut self) -> Result<()> {
        if self.peek_type() != CborType::Null {
            return Err(LwM2mError::BadRequest("expected CBOR null".into()));
        }
        self.pos += 1;
        self.after_value();
        Ok(())
    }

    fn read_signed_integer(&mut self) -> Result<i64> {
        let (major, additional) = self
            .read_head()
            .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR integer".into()))?;
        let Length::Definite(v) = self
            .read_length(additional)
            .ok_or_else(|| LwM2mError::BadRequest("malformed CBOR length".into()))?
        else {
            return Err(LwM2mError::BadRequest(
                "indefinite length not valid here".into(),
            ));
        };
        if major == MajorType::UnsignedInt as u8 {
            Ok(v as i64)
        } else if major == MajorType::NegativeInt as u8 {
            Ok(-(v as i64) - 1)
        } else {
            Err(LwM2mError::BadRequest("expected CBOR integer".into()))
        }
    }

    /// Tag 4 decimal fraction: `[exponent, mantissa]` evaluated eagerly as
    /// `mantissa * 10^exponent`.
    fn read_decimal_fraction(&mut self) -> Result<f64> {
        let (major, additional) = self
            .read_head()
            .ok_or_else(|| LwM2mError::BadRequest("truncated decimal fraction".into()))?;
        if major != MajorType::Array as u8 {
            return Err(LwM2mError::BadRequest(
                "decimal fraction must be a 2-element array".into(),
            ));
        }
        match self
            .read_length(additional)
            .ok_or_else(|| LwM2mError::BadRequest("malformed decimal fraction".into()))?
        {
            Length::Definite(2) => {}
            _ => {
                return Err(LwM2mError::BadRequest(
                    "decimal fraction array must have exactly 2 elements".into(),
                ))
            }
        }
        let exponent = self.read_signed_integer()?;
        let mantissa = self.read_signed_integer()?;
        Ok(mantissa as f64 * 10f64.powi(exponent as i32))
    }

    pub fn read_number(&mut self) -> Result<Number> {
        let ty = self.peek_type();
        let number = match ty {
            CborType::Uint => {
                let (_, additional) = self
                    .read_head()
                    .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR uint".into()))?;
                let Length::Definite(v) = self
                    .read_length(additional)
                    .ok_or_else(|| LwM2mError::BadRequest("malformed CBOR uint".into()))?
                else {
                    return Err(LwM2mError::BadRequest("indefinite uint".into()));
                };
                Number::U64(v)
            }
            CborType::NegativeInt => {
                let (_, additional) = self
                    .read_head()
                    .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR int".into()))?;
                let Length::Definite(v) = self
                    .read_length(additional)
                    .ok_or_else(|| LwM2mError::BadRequest("malformed CBOR int".into()))?
                else {
                    return Err(LwM2mError::BadRequest("indefinite negative int".into()));
                };
                Number::I64(-(v as i64) - 1)
            }
            CborType::Float => {
                let (_, additional) = self
                    .read_head()
                    .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR float".into()))?;
                match additional {
                    FLOAT32 => {
                        let s = self.buf.get(self.pos..self.pos + 4).ok_or_else(|| {
                            LwM2mError::BadRequest("truncated float32".into())
                        })?;
                        let v = f32::from_be_bytes(s.try_into().unwrap());
                        self.pos += 4;
                        Number::F32(v)
                    }
                    FLOAT16 => {
                        let s = self.buf.get(self.pos..self.pos + 2).ok_or_else(|| {
                            LwM2mError::BadRequest("truncated float16".into())
                        })?;
                        let bits = u16::from_be_bytes(s.try_into().unwrap());
                        self.pos += 2;
                        Number::F32(half_to_f32(bits))
                    }
                    _ => return Err(LwM2mError::BadRequest("malformed CBOR float".into())),
                }
            }
            CborType::Double => {
                if self.pending_decimal_fraction {
                    self.pending_decimal_fraction = false;
                    Number::F64(self.read_decimal_fraction()?)
                } else {
                    let (_, additional) = self.read_head().ok_or_else(|| {
                        LwM2mError::BadRequest("truncated CBOR double".into())
                    })?;
                    if additional != FLOAT64 {
                        return Err(LwM2mError::BadRequest("malformed CBOR double".into()));
                    }
                    let s = self
                        .buf
                        .get(self.pos..self.pos + 8)
                        .ok_or_else(|| LwM2mError::BadRequest("truncated double".into()))?;
                    let v = f64::from_be_bytes(s.try_into().unwrap());
                    self.pos += 8;
                    Number::F64(v)
                }
            }
            _ => return Err(LwM2mError::BadRequest("expected a CBOR number".into())),
        };
        self.after_value();
        Ok(number)
    }

    fn enter_container(&mut self, is_map: bool) -> Result<u64> {
        if self.frames.len() >= self.max_nesting {
            return Err(LwM2mError::BadRequest(
                "maximum CBOR nesting depth exceeded".into(),
            ));
        }
        let expect = if is_map { CborType::Map } else { CborType::Array };
        if self.peek_type() != expect {
            return Err(LwM2mError::BadRequest("expected CBOR container".into()));
        }
        let (_, additional) = self
            .read_head()
            .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR container".into()))?;
        let remaining = match self
            .read_length(additional)
            .ok_or_else(|| LwM2mError::BadRequest("malformed CBOR container length".into()))?
        {
            Length::Definite(n) => Some(if is_map {
                n.checked_mul(2)
                    .ok_or_else(|| LwM2mError::BadRequest("map too large".into()))?
            } else {
                n
            }),
            Length::Indefinite => None,
        };
        let item_count = if is_map {
            remaining.map(|n| n / 2).unwrap_or(u64::MAX)
        } else {
            remaining.unwrap_or(u64::MAX)
        };
        self.frames.push(Frame {
            is_map,
            remaining,
            elements_read: 0,
        });
        Ok(item_count)
    }

    /// Enters an array, returning its item count (`u64::MAX` if indefinite).
    pub fn enter_array(&mut self) -> Result<u64> {
        self.enter_container(false)
    }

    /// Enters a map, returning its entry (key-value pair) count.
    pub fn enter_map(&mut self) -> Result<u64> {
        self.enter_container(true)
    }

    /// Opens a definite- or indefinite-length byte/text string for
    /// chunked reading via [`Decoder::read_some_bytes`].
    pub fn bytes_ctx(&mut self) -> Result<BytesCtx> {
        let ty = self.peek_type();
        if ty != CborType::ByteString && ty != CborType::TextString {
            return Err(LwM2mError::BadRequest("expected CBOR string".into()));
        }
        let (_, additional) = self
            .read_head()
            .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR string".into()))?;
        match self
            .read_length(additional)
            .ok_or_else(|| LwM2mError::BadRequest("malformed CBOR string length".into()))?
        {
            Length::Definite(n) => Ok(BytesCtx {
                indefinite: false,
                remaining_in_chunk: n as usize,
                finished: n == 0,
            }),
            Length::Indefinite => Ok(BytesCtx {
                indefinite: true,
                remaining_in_chunk: 0,
                finished: false,
            }),
        }
    }

    /// Reads up to `buf.len()` bytes of the string opened by `ctx`.
    /// Returns `(bytes_read, message_finished)`.
    pub fn read_some_bytes(&mut self, ctx: &mut BytesCtx, buf: &mut [u8]) -> Result<(usize, bool)> {
        if ctx.finished {
            return Ok((0, true));
        }
        if ctx.indefinite && ctx.remaining_in_chunk == 0 {
            if self.peek_byte() == Some(BREAK) {
                self.pos += 1;
                ctx.finished = true;
                self.after_value();
                return Ok((0, true));
            }
            let (_, additional) = self
                .read_head()
                .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR string chunk".into()))?;
            let Length::Definite(n) = self
                .read_length(additional)
                .ok_or_else(|| LwM2mError::BadRequest("malformed string chunk length".into()))?
            else {
                return Err(LwM2mError::BadRequest(
                    "nested indefinite string chunk".into(),
                ));
            };
            ctx.remaining_in_chunk = n as usize;
            if n == 0 {
                return self.read_some_bytes(ctx, buf);
            }
        }
        let n = buf.len().min(ctx.remaining_in_chunk);
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or_else(|| LwM2mError::BadRequest("truncated CBOR string data".into()))?;
        buf[..n].copy_from_slice(slice);
        self.pos += n;
        ctx.remaining_in_chunk -= n;
        let finished_now = !ctx.indefinite && ctx.remaining_in_chunk == 0;
        if finished_now {
            ctx.finished = true;
            self.after_value();
        }
        Ok((n, finished_now))
    }
}

/// Cursor state for a chunked byte/text string read.
pub struct BytesCtx {
    indefinite: bool,
    remaining_in_chunk: usize,
    finished: bool,
}

impl BytesCtx {
    pub fn is_indefinite(&self) -> bool {
        self.indefinite
    }
}

/// Minimal IEEE-754 half-precision to single-precision conversion.
fn half_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) & 1) as u32;
    let exponent = ((bits >> 10) & 0x1F) as u32;
    let mantissa = (bits & 0x3FF) as u32;
    let f32_bits = if exponent == 0 {
        if mantissa == 0 {
            sign << 31
        } else {
            // Subnormal half -> normalize into f32's range.
            let mut e = -1i32;
            let mut m = mantissa;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            m &= 0x3FF;
            let exp32 = (127 - 15 + e + 1) as u32;
            (sign << 31) | (exp32 << 23) | (m << 13)
        }
    } else if exponent == 0x1F {
        (sign << 31) | (0xFF << 23) | (mantissa << 13)
    } else {
        let exp32 = exponent + (127 - 15);
        (sign << 31) | (exp32 << 23) | (mantissa << 13)
    };
    f32::from_bits(f32_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_type_classifies_small_uint() {
        let mut d = Decoder::new(&[0x0A], 1);
        assert_eq!(d.peek_type(), CborType::Uint);
        assert_eq!(d.read_number().unwrap(), Number::U64(10));
    }

    #[test]
    fn peek_type_reports_finished_at_end_of_buffer() {
        let mut d = Decoder::new(&[], 1);
        assert_eq!(d.peek_type(), CborType::Finished);
    }

    #[test]
    fn decimal_fraction_evaluates_mantissa_times_ten_to_exponent() {
        // C4 82 20 18 2D: tag 4, [-1, 45] -> 45 * 10^-1 = 4.5
        let bytes = [0xC4, 0x82, 0x20, 0x18, 0x2D];
        let mut d = Decoder::new(&bytes, 3);
        assert_eq!(d.peek_type(), CborType::Double);
        let n = d.read_number().unwrap();
        assert_eq!(n.as_f64(), 4.5);
    }

    #[test]
    fn nesting_bound_rejects_fourth_container() {
        // array[array[array[array[0]]]] with max_nesting=3
        let bytes = [0x81, 0x81, 0x81, 0x81, 0x00];
        let mut d = Decoder::new(&bytes, 3);
        d.enter_array().unwrap();
        d.enter_array().unwrap();
        d.enter_array().unwrap();
        assert!(d.enter_array().is_err());
    }

    #[test]
    fn map_entry_count_is_pairs_not_raw_items() {
        // A1 00 01: map{0: 1}
        let bytes = [0xA1, 0x00, 0x01];
        let mut d = Decoder::new(&bytes, 2);
        let pairs = d.enter_map().unwrap();
        assert_eq!(pairs, 1);
        assert_eq!(d.read_number().unwrap(), Number::U64(0));
        assert_eq!(d.read_number().unwrap(), Number::U64(1));
        assert_eq!(d.nesting_level(), 0);
    }

    #[test]
    fn indefinite_byte_string_reads_in_chunks() {
        // 5F 41 'a' 41 'b' FF : indefinite byte string, two 1-byte chunks
        let bytes = [0x5F, 0x41, b'a', 0x41, b'b', 0xFF];
        let mut d = Decoder::new(&bytes, 1);
        assert_eq!(d.peek_type(), CborType::ByteString);
        let mut ctx = d.bytes_ctx().unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let (n, done) = d.read_some_bytes(&mut ctx, &mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
            if done {
                break;
            }
        }
        assert_eq!(out, b"ab");
    }

    #[test]
    fn round_trips_negative_int() {
        let mut buf = Vec::new();
        super::super::Encoder::new(&mut buf).int(-10);
        let mut d = Decoder::new(&buf, 1);
        assert_eq!(d.read_number().unwrap().as_i64().unwrap(), -10);
    }
}

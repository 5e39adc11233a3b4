use crate::error::{LwM2mError, Result};

/// The type of value the cursor is currently sitting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Number,
    String,
    Bool,
    Array,
    Map,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nested {
    ArrayElement,
    MapKey,
    MapValue,
}

/// A character-driven cursor over a JSON byte buffer, bounded to
/// `max_nesting` levels of array/map containers.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    max_nesting: usize,
    frames: Vec<Nested>,
    errored: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], max_nesting: usize) -> Self {
        Decoder {
            buf,
            pos: 0,
            max_nesting,
            frames: Vec::new(),
            errored: false,
        }
    }

    pub fn nesting_level(&self) -> usize {
        self.frames.len()
    }

    fn skip_ws(&mut self) {
        while let Some(&b) = self.buf.get(self.pos) {
            if matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek_byte(&mut self) -> Option<u8> {
        self.skip_ws();
        self.buf.get(self.pos).copied()
    }

    /// Classifies the upcoming value, after skipping whitespace.
    pub fn peek_type(&mut self) -> JsonType {
        if self.errored {
            return JsonType::Error;
        }
        let Some(ch) = self.peek_byte() else {
            return if self.frames.is_empty() {
                JsonType::Finished
            } else {
                self.errored = true;
                JsonType::Error
            };
        };
        if self.frames.last() == Some(&Nested::MapKey) && ch != b'"' && ch != b'}' {
            self.errored = true;
            return JsonType::Error;
        }
        match ch {
            b'-' | b'0'..=b'9' => JsonType::Number,
            b'"' => JsonType::String,
            b'{' => JsonType::Map,
            b'[' => JsonType::Array,
            b't' | b'f' => JsonType::Bool,
            b'n' => JsonType::Null,
            b']' if self.frames.last() == Some(&Nested::ArrayElement) => JsonType::Finished,
            b'}' if matches!(self.frames.last(), Some(&Nested::MapKey)) => JsonType::Finished,
            _ => {
                self.errored = true;
                JsonType::Error
            }
        }
    }

    /// Closes any containers whose terminator is next, propagating the
    /// separator/terminator check up through parent frames, matching the
    /// decoder's post-value bookkeeping.
    fn container_closed(&mut self) -> Result<()> {
        loop {
            let Some(&kind) = self.frames.last() else {
                return Ok(());
            };
            let ch = self
                .peek_byte()
                .ok_or_else(|| LwM2mError::BadRequest("unexpected end of JSON input".into()))?;
            match kind {
                Nested::ArrayElement => {
                    if ch == b',' {
                        self.pos += 1;
                        return Ok(());
                    } else if ch == b']' {
                        self.pos += 1;
                        self.frames.pop();
                        continue;
                    }
                    return Err(LwM2mError::BadRequest(
                        "expected ',' or ']' in JSON array".into(),
                    ));
                }
                Nested::MapValue => {
                    if ch == b',' {
                        self.pos += 1;
                        *self.frames.last_mut().unwrap() = Nested::MapKey;
                        return Ok(());
                    } else if ch == b'}' {
                        self.pos += 1;
                        self.frames.pop();
                        continue;
                    }
                    return Err(LwM2mError::BadRequest(
                        "expected ',' or '}' in JSON object".into(),
                    ));
                }
                Nested::MapKey => unreachable!("container_closed never runs mid-key"),
            }
        }
    }

    pub fn read_null(&mut self) -> Result<()> {
        if self.peek_type() != JsonType::Null {
            return Err(LwM2mError::BadRequest("expected JSON null".into()));
        }
        self.expect_literal("null")?;
        self.container_closed()
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        if self.peek_type() != JsonType::Bool {
            return Err(LwM2mError::BadRequest("expected JSON bool".into()));
        }
        let value = if self.buf[self.pos..].starts_with(b"true") {
            self.expect_literal("true")?;
            true
        } else {
            self.expect_literal("false")?;
            false
        };
        self.container_closed()?;
        Ok(value)
    }

    fn expect_literal(&mut self, lit: &str) -> Result<()> {
        let bytes = lit.as_bytes();
        if self.buf[self.pos..].len() < bytes.len() || &self.buf[self.pos..self.pos + bytes.len()] != bytes {
            self.errored = true;
            return Err(LwM2mError::BadRequest(format!("expected JSON literal {lit}")));
        }
        self.pos += bytes.len();
        Ok(())
    }

    fn is_number_char(ch: u8) -> bool {
        ch.is_ascii_digit() || matches!(ch, b'+' | b'-' | b'.' | b'e' | b'E')
    }

    /// Parses a strict JSON number: no leading decimal point, no leading
    /// zero before a second digit, no bare `+`.
    pub fn read_number(&mut self) -> Result<f64> {
        if self.peek_type() != JsonType::Number {
            return Err(LwM2mError::BadRequest("expected JSON number".into()));
        }
        let start = self.pos;
        while self.buf.get(self.pos).is_some_and(|&b| Self::is_number_char(b)) {
            self.pos += 1;
        }
        let token = std::str::from_utf8(&self.buf[start..self.pos])
            .map_err(|_| LwM2mError::BadRequest("malformed JSON number".into()))?;
        Self::validate_number_grammar(token)?;
        let value: f64 = token
            .parse()
            .map_err(|_| LwM2mError::BadRequest(format!("invalid JSON number: {token}")))?;
        self.container_closed()?;
        Ok(value)
    }

    fn validate_number_grammar(token: &str) -> Result<()> {
        let bytes = token.as_bytes();
        let mut idx = 0;
        if bytes.first() == Some(&b'-') {
            idx += 1;
        }
        if !bytes.get(idx).is_some_and(u8::is_ascii_digit) {
            return Err(LwM2mError::BadRequest(
                "JSON number must have a leading digit".into(),
            ));
        }
        if bytes[idx] == b'0' && bytes.get(idx + 1).is_some_and(u8::is_ascii_digit) {
            return Err(LwM2mError::BadRequest(
                "JSON number has a disallowed leading zero".into(),
            ));
        }
        Ok(())
    }

    /// Parses a JSON string, decoding the six standard escapes and
    /// `\uXXXX` into UTF-8. If the current frame expects a map
    /// key, also consumes the following `:` and advances to `MapValue`.
    pub fn read_string(&mut self) -> Result<String> {
        let at_map_key = self.frames.last() == Some(&Nested::MapKey);
        if self.peek_type() != JsonType::String {
            return Err(LwM2mError::BadRequest("expected JSON string".into()));
        }
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            let ch = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| LwM2mError::BadRequest("unterminated JSON string".into()))?;
            self.pos += 1;
            match ch {
                b'"' => break,
                b'\\' => self.read_escape(&mut out)?,
                c if c < 0x20 => {
                    return Err(LwM2mError::BadRequest(
                        "control character in JSON string".into(),
                    ))
                }
                c => out.push(c as char),
            }
        }
        if at_map_key {
            let colon = self
                .peek_byte()
                .ok_or_else(|| LwM2mError::BadRequest("expected ':' after JSON key".into()))?;
            if colon != b':' {
                return Err(LwM2mError::BadRequest("expected ':' after JSON key".into()));
            }
            self.pos += 1;
            *self.frames.last_mut().unwrap() = Nested::MapValue;
        } else {
            self.container_closed()?;
        }
        Ok(out)
    }

    fn read_escape(&mut self, out: &mut String) -> Result<()> {
        let ch = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| LwM2mError::BadRequest("unterminated escape".into()))?;
        self.pos += 1;
        let literal = match ch {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => return self.read_unicode_escape(out),
            _ => return Err(LwM2mError::BadRequest("invalid JSON escape".into())),
        };
        out.push(literal);
        Ok(())
    }

    fn read_unicode_escape(&mut self, out: &mut String) -> Result<()> {
        let hex = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| LwM2mError::BadRequest("truncated \\u escape".into()))?;
        let hex_str = std::str::from_utf8(hex)
            .map_err(|_| LwM2mError::BadRequest("invalid \\u escape".into()))?;
        let codepoint = u32::from_str_radix(hex_str, 16)
            .map_err(|_| LwM2mError::BadRequest("invalid \\u escape".into()))?;
        self.pos += 4;
        // Surrogate pair handling is not required.
        match char::from_u32(codepoint) {
            Some(c) => out.push(c),
            None => out.push('\u{FFFD}'),
        }
        Ok(())
    }

    fn enter_container(&mut self, open: u8, nested: Nested) -> Result<()> {
        if self.peek_byte() != Some(open) {
            return Err(LwM2mError::BadRequest("expected JSON container".into()));
        }
        if self.frames.len() >= self.max_nesting {
            return Err(LwM2mError::BadRequest(
                "maximum JSON nesting depth exceeded".into(),
            ));
        }
        self.pos += 1;
        self.frames.push(nested);
        Ok(())
    }

    pub fn enter_array(&mut self) -> Result<()> {
        if self.peek_type() != JsonType::Array {
            return Err(LwM2mError::BadRequest("expected JSON array".into()));
        }
        self.enter_container(b'[', Nested::ArrayElement)?;
        if self.peek_byte() == Some(b']') {
            self.pos += 1;
            self.frames.pop();
            self.container_closed()?;
        }
        Ok(())
    }

    pub fn enter_map(&mut self) -> Result<()> {
        if self.peek_type() != JsonType::Map {
            return Err(LwM2mError::BadRequest("expected JSON object".into()));
        }
        self.enter_container(b'{', Nested::MapKey)?;
        if self.peek_byte() == Some(b'}') {
            self.pos += 1;
            self.frames.pop();
            self.container_closed()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_type_classifies_values() {
        assert_eq!(Decoder::new(b"42", 2).peek_type(), JsonType::Number);
        assert_eq!(Decoder::new(b"\"x\"", 2).peek_type(), JsonType::String);
        assert_eq!(Decoder::new(b"[1]", 2).peek_type(), JsonType::Array);
        assert_eq!(Decoder::new(b"{}", 2).peek_type(), JsonType::Map);
        assert_eq!(Decoder::new(b"true", 2).peek_type(), JsonType::Bool);
        assert_eq!(Decoder::new(b"null", 2).peek_type(), JsonType::Null);
    }

    #[test]
    fn rejects_leading_zero() {
        let mut d = Decoder::new(b"012", 2);
        assert!(d.read_number().is_err());
    }

    #[test]
    fn rejects_leading_decimal_point() {
        let mut d = Decoder::new(b".5", 2);
        assert_eq!(d.peek_type(), JsonType::Error);
    }

    #[test]
    fn parses_negative_float() {
        let mut d = Decoder::new(b"-4.5", 2);
        assert_eq!(d.read_number().unwrap(), -4.5);
    }

    #[test]
    fn decodes_basic_escapes_and_unicode_escape() {
        let mut d = Decoder::new(b"\"a\\nb\\u00e9\"", 2);
        assert_eq!(d.read_string().unwrap(), "a\nb\u{e9}");
    }

    #[test]
    fn array_round_trip_with_nesting_level() {
        let mut d = Decoder::new(b"[1,2,3]", 2);
        let base = d.nesting_level();
        d.enter_array().unwrap();
        let mut values = Vec::new();
        while d.nesting_level() > base {
            values.push(d.read_number().unwrap());
        }
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn empty_array_closes_immediately() {
        let mut d = Decoder::new(b"[]", 2);
        let base = d.nesting_level();
        d.enter_array().unwrap();
        assert_eq!(d.nesting_level(), base);
    }

    #[test]
    fn map_requires_string_keys() {
        let mut d = Decoder::new(br#"{"n":"/1/2","v":1}"#, 2);
        let base = d.nesting_level();
        d.enter_map().unwrap();
        let mut pairs = Vec::new();
        while d.nesting_level() > base {
            let key = d.read_string().unwrap();
            let ty = d.peek_type();
            let value = if ty == JsonType::String {
                d.read_string().unwrap()
            } else {
                d.read_number().unwrap().to_string()
            };
            pairs.push((key, value));
        }
        assert_eq!(pairs, vec![("n".into(), "/1/2".into()), ("v".into(), "1".into())]);
    }

    #[test]
    fn nesting_bound_is_enforced() {
        let mut d = Decoder::new(b"[[1]]", 1);
        d.enter_array().unwrap();
        assert!(d.enter_array().is_err());
    }
}

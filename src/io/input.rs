//! Input context: a path-addressable cursor over an inbound payload.
//!
//! Every supported format is parsed eagerly into a flat list of
//! `(path, value)` leaves at construction time. This differs from the
//! CBOR/JSON low-level decoders (which are lazy, single-pass cursors) but
//! keeps the context's own API — `get_path` then a typed getter, repeat —
//! identical across flat and hierarchical formats, since SenML and TLV
//! payloads are small control-plane documents rather than bulk data.

use crate::cbor;
use crate::path::Path;
use crate::senml::ObjectLink;
use crate::tlv::{self, EntryKind};
use crate::error::{LwM2mError, Result};

/// Which wire format an [`InputContext`] was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    PlainText,
    OctetStream,
    Cbor,
    SenmlCbor,
    SenmlJson,
    LwM2mTlv,
}

/// A single decoded leaf value, format-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    ObjLnk(ObjectLink),
}

impl LeafValue {
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            LeafValue::Int(v) => Ok(*v),
            LeafValue::Float(v) if (*v as i64) as f64 == *v => Ok(*v as i64),
            LeafValue::Str(s) => s
                .parse()
                .map_err(|_| LwM2mError::BadRequest("value is not an integer".into())),
            _ => Err(LwM2mError::BadRequest("value is not an integer".into())),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            LeafValue::Int(v) => Ok(*v as f64),
            LeafValue::Float(v) => Ok(*v),
            LeafValue::Str(s) => s
                .parse()
                .map_err(|_| LwM2mError::BadRequest("value is not a float".into())),
            _ => Err(LwM2mError::BadRequest("value is not a float".into())),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            LeafValue::Bool(v) => Ok(*v),
            LeafValue::Int(0) => Ok(false),
            LeafValue::Int(1) => Ok(true),
            LeafValue::Str(s) if s == "0" => Ok(false),
            LeafValue::Str(s) if s == "1" => Ok(true),
            _ => Err(LwM2mError::BadRequest("value is not a bool".into())),
        }
    }

    pub fn as_string(&self) -> Result<String> {
        match self {
            LeafValue::Str(s) => Ok(s.clone()),
            LeafValue::Int(v) => Ok(v.to_string()),
            LeafValue::Float(v) => Ok(v.to_string()),
            _ => Err(LwM2mError::BadRequest("value is not a string".into())),
        }
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        match self {
            LeafValue::Bytes(b) => Ok(b.clone()),
            LeafValue::Str(s) => Ok(s.clone().into_bytes()),
            _ => Err(LwM2mError::BadRequest("value is not a byte string".into())),
        }
    }

    pub fn as_objlnk(&self) -> Result<ObjectLink> {
        match self {
            LeafValue::ObjLnk(link) => Ok(*link),
            LeafValue::Str(s) => ObjectLink::parse(s),
            _ => Err(LwM2mError::BadRequest("value is not an object link".into())),
        }
    }
}

#[derive(Debug)]
pub struct InputContext {
    entries: Vec<(Path, LeafValue)>,
    cursor: usize,
    current: Option<usize>,
}

impl InputContext {
    pub fn new(format: InputFormat, base: Path, payload: &[u8]) -> Result<Self> {
        let entries = match format {
            InputFormat::PlainText => {
                let text = std::str::from_utf8(payload)
                    .map_err(|_| LwM2mError::BadRequest("plain text payload is not UTF-8".into()))?;
                vec![(base, LeafValue::Str(text.to_string()))]
            }
            InputFormat::OctetStream => vec![(base, LeafValue::Bytes(payload.to_vec()))],
            InputFormat::Cbor => vec![(base, decode_single_cbor(payload)?)],
            InputFormat::LwM2mTlv => decode_tlv(base, payload)?,
            InputFormat::SenmlCbor => decode_senml_cbor(base, payload)?,
            InputFormat::SenmlJson => decode_senml_json(base, payload)?,
        };
        Ok(InputContext {
            entries,
            cursor: 0,
            current: None,
        })
    }

    /// Advances to the next leaf, returning its path. Returns
    /// [`LwM2mError::GetPathEnd`] once every leaf has been consumed.
    pub fn get_path(&mut self) -> Result<Path> {
        if self.cursor >= self.entries.len() {
            return Err(LwM2mError::GetPathEnd);
        }
        self.current = Some(self.cursor);
        self.cursor += 1;
        Ok(self.entries[self.current.unwrap()].0)
    }

    fn current_value(&self) -> Result<&LeafValue> {
        let idx = self
            .current
            .ok_or_else(|| LwM2mError::FormatMismatch("get_path was not called before reading a value".into()))?;
        Ok(&self.entries[idx].1)
    }

    pub fn get_i64(&self) -> Result<i64> {
        self.current_value()?.as_i64()
    }

    pub fn get_f64(&self) -> Result<f64> {
        self.current_value()?.as_f64()
    }

    pub fn get_bool(&self) -> Result<bool> {
        self.current_value()?.as_bool()
    }

    pub fn get_string(&self) -> Result<String> {
        self.current_value()?.as_string()
    }

    pub fn get_bytes(&self) -> Result<Vec<u8>> {
        self.current_value()?.as_bytes()
    }

    pub fn get_objlnk(&self) -> Result<ObjectLink> {
        self.current_value()?.as_objlnk()
    }

    /// No teardown is required since parsing happened eagerly; kept so
    /// callers can treat every input format uniformly.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// The path of the next entry without advancing the cursor. Composite
    /// write dispatch uses this to route each entry to its owning object
    /// before that object's own `get_path` call consumes it.
    pub fn peek_path(&self) -> Option<Path> {
        self.entries.get(self.cursor).map(|(p, _)| *p)
    }
}

fn decode_single_cbor(payload: &[u8]) -> Result<LeafValue> {
    let mut dec = cbor::Decoder::new(payload, 1);
    match dec.peek_type() {
        cbor::CborType::TextString => {
            let mut ctx = dec.bytes_ctx()?;
            let mut out = Vec::new();
            let mut buf = [0u8; 256];
            loop {
                let (n, done) = dec.read_some_bytes(&mut ctx, &mut buf)?;
                out.extend_from_slice(&buf[..n]);
                if done {
                    break;
                }
            }
            let text = String::from_utf8(out)
                .map_err(|_| LwM2mError::BadRequest("CBOR text string is not UTF-8".into()))?;
            Ok(LeafValue::Str(text))
        }
        cbor::CborType::ByteString => {
            let mut ctx = dec.bytes_ctx()?;
            let mut out = Vec::new();
            let mut buf = [0u8; 256];
            loop {
                let (n, done) = dec.read_some_bytes(&mut ctx, &mut buf)?;
                out.extend_from_slice(&buf[..n]);
                if done {
                    break;
                }
            }
            Ok(LeafValue::Bytes(out))
        }
        cbor::CborType::Bool => Ok(LeafValue::Bool(dec.read_bool()?)),
        _ => {
            let n = dec.read_number()?;
            match n {
                cbor::Number::F32(_) | cbor::Number::F64(_) => Ok(LeafValue::Float(n.as_f64())),
                _ => Ok(LeafValue::Int(n.as_i64()?)),
            }
        }
    }
}

fn decode_tlv(base: Path, payload: &[u8]) -> Result<Vec<(Path, LeafValue)>> {
    let mut entries = Vec::new();
    collect_tlv(base, payload, &mut entries)?;
    Ok(entries)
}

fn collect_tlv(base: Path, payload: &[u8], out: &mut Vec<(Path, LeafValue)>) -> Result<()> {
    let mut dec = tlv::Decoder::new(payload);
    while let Some(entry) = dec.next_entry()? {
        let path = base
            .push(entry.id)
            .ok_or_else(|| LwM2mError::BadRequest("TLV entry nests past the maximum path depth".into()))?;
        match entry.kind {
            EntryKind::ObjectInstance | EntryKind::MultipleResource => {
                collect_tlv(path, entry.value, out)?;
            }
            EntryKind::Resource | EntryKind::ResourceInstance => {
                let value = if let Ok(text) = std::str::from_utf8(entry.value) {
                    if entry.value.len() <= 8 && tlv::decode_i64(entry.value).is_ok() {
                        LeafValue::Int(tlv::decode_i64(entry.value)?)
                    } else {
                        LeafValue::Str(text.to_string())
                    }
                } else {
                    LeafValue::Bytes(entry.value.to_vec())
                };
                out.push((path, value));
            }
        }
    }
    Ok(())
}

fn senml_leaf_from_cbor_map(dec: &mut cbor::Decoder, pairs: u64) -> Result<(Option<String>, Option<String>, LeafValue)> {
    let mut basename = None;
    let mut name = None;
    let mut value = None;
    for _ in 0..pairs {
        if dec.peek_type() == cbor::CborType::TextString {
            let s = read_cbor_text(dec)?;
            match s.as_str() {
                "vlo" => {
                    let v = read_cbor_text(dec)?;
                    value = Some(LeafValue::ObjLnk(ObjectLink::parse(&v)?));
                }
                _ => {
                    let _ = read_cbor_any_as_string(dec)?;
                }
            }
        } else {
            let label = dec.read_number()?.as_i64()?;
            match label {
                -2 => basename = Some(read_cbor_text(dec)?),
                0 => name = Some(read_cbor_text(dec)?),
                2 => {
                    let n = dec.read_number()?;
                    value = Some(match n {
                        cbor::Number::F32(_) | cbor::Number::F64(_) => LeafValue::Float(n.as_f64()),
                        _ => LeafValue::Int(n.as_i64()?),
                    });
                }
                3 => value = Some(LeafValue::Str(read_cbor_text(dec)?)),
                4 => value = Some(LeafValue::Bool(dec.read_bool()?)),
                6 | -3 => {
                    let _ = dec.read_number()?;
                }
                _ => {
                    let _ = read_cbor_any_as_string(dec);
                }
            }
        }
    }
    // A record with no value field names a path without data — the shape a
    // FETCH body uses to list what to read rather than what to write.
    let value = value.unwrap_or(LeafValue::Str(String::new()));
    Ok((basename, name, value))
}

fn read_cbor_text(dec: &mut cbor::Decoder) -> Result<String> {
    let mut ctx = dec.bytes_ctx()?;
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let (n, done) = dec.read_some_bytes(&mut ctx, &mut buf)?;
        out.extend_from_slice(&buf[..n]);
        if done {
            break;
        }
    }
    String::from_utf8(out).map_err(|_| LwM2mError::BadRequest("SenML string field is not UTF-8".into()))
}

fn read_cbor_any_as_string(dec: &mut cbor::Decoder) -> Result<()> {
    match dec.peek_type() {
        cbor::CborType::TextString | cbor::CborType::ByteString => {
            read_cbor_text(dec).map(|_| ())
        }
        cbor::CborType::Bool => dec.read_bool().map(|_| ()),
        _ => dec.read_number().map(|_| ()),
    }
}

fn decode_senml_cbor(base: Path, payload: &[u8]) -> Result<Vec<(Path, LeafValue)>> {
    let mut dec = cbor::Decoder::new(payload, 3);
    let count = dec.enter_array()?;
    let mut out = Vec::new();
    let mut basename = String::new();
    for _ in 0..count {
        let pairs = dec.enter_map()?;
        let (bn, n, value) = senml_leaf_from_cbor_map(&mut dec, pairs)?;
        if let Some(bn) = bn {
            basename = bn;
        }
        let path = resolve_senml_path(&base, &basename, n.as_deref())?;
        out.push((path, value));
    }
    Ok(out)
}

fn resolve_senml_path(base: &Path, basename: &str, name: Option<&str>) -> Result<Path> {
    let full = format!("{}{}", basename, name.unwrap_or(""));
    let path = if full.is_empty() || full == "/" {
        *base
    } else {
        Path::from_slash_separated(&full)
            .ok_or_else(|| LwM2mError::BadRequest("SenML record name is not a valid path".into()))?
    };
    if !path.within(base) {
        return Err(LwM2mError::BadRequest(
            "SenML record name resolves outside the request's base path".into(),
        ));
    }
    Ok(path)
}

fn decode_senml_json(base: Path, payload: &[u8]) -> Result<Vec<(Path, LeafValue)>> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| LwM2mError::BadRequest(e.to_string()))?;
    let array = value
        .as_array()
        .ok_or_else(|| LwM2mError::BadRequest("SenML-JSON document must be an array".into()))?;
    let mut out = Vec::new();
    let mut basename = String::new();
    for record in array {
        let obj = record
            .as_object()
            .ok_or_else(|| LwM2mError::BadRequest("SenML-JSON record must be an object".into()))?;
        if let Some(bn) = obj.get("bn").and_then(|v| v.as_str()) {
            basename = bn.to_string();
        }
        let name = obj.get("n").and_then(|v| v.as_str());
        let leaf = if let Some(v) = obj.get("v") {
            if let Some(i) = v.as_i64() {
                LeafValue::Int(i)
            } else {
                LeafValue::Float(v.as_f64().unwrap_or(0.0))
            }
        } else if let Some(v) = obj.get("vs").and_then(|v| v.as_str()) {
            LeafValue::Str(v.to_string())
        } else if let Some(v) = obj.get("vb") {
            LeafValue::Bool(v.as_bool().unwrap_or(false))
        } else if let Some(v) = obj.get("vlo").and_then(|v| v.as_str()) {
            LeafValue::ObjLnk(ObjectLink::parse(v)?)
        } else if let Some(v) = obj.get("vd").and_then(|v| v.as_str()) {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(v)
                .map_err(|_| LwM2mError::BadRequest("SenML-JSON vd field is not valid base64".into()))?;
            LeafValue::Bytes(bytes)
        } else {
            // Path-only record, as in a FETCH body listing what to read.
            LeafValue::Str(String::new())
        };
        let path = resolve_senml_path(&base, &basename, name)?;
        out.push((path, leaf));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_round_trips_integer() {
        let base = Path::from_slash_separated("/3/0/9").unwrap();
        let mut ctx = InputContext::new(InputFormat::PlainText, base, b"80").unwrap();
        assert_eq!(ctx.get_path().unwrap(), base);
        assert_eq!(ctx.get_i64().unwrap(), 80);
        assert!(matches!(ctx.get_path(), Err(LwM2mError::GetPathEnd)));
    }

    #[test]
    fn tlv_nested_instance_produces_child_paths() {
        let mut inner = Vec::new();
        tlv::write_entry(&mut inner, EntryKind::Resource, 0, &tlv::encode_i64(1));
        tlv::write_entry(&mut inner, EntryKind::Resource, 9, b"80");
        let mut outer = Vec::new();
        tlv::write_entry(&mut outer, EntryKind::ObjectInstance, 0, &inner);

        let base = Path::from_slash_separated("/3").unwrap();
        let mut ctx = InputContext::new(InputFormat::LwM2mTlv, base, &outer).unwrap();
        let p1 = ctx.get_path().unwrap();
        assert_eq!(p1, Path::from_slash_separated("/3/0/0").unwrap());
        assert_eq!(ctx.get_i64().unwrap(), 1);
        let p2 = ctx.get_path().unwrap();
        assert_eq!(p2, Path::from_slash_separated("/3/0/9").unwrap());
    }

    #[test]
    fn senml_json_resolves_basename_plus_relative_name() {
        let base = Path::from_slash_separated("/3/0").unwrap();
        let payload = br#"[{"bn":"/3/0","n":"9","v":80}]"#;
        let mut ctx = InputContext::new(InputFormat::SenmlJson, base, payload).unwrap();
        let path = ctx.get_path().unwrap();
        assert_eq!(path, Path::from_slash_separated("/3/0/9").unwrap());
        assert_eq!(ctx.get_i64().unwrap(), 80);
    }

    #[test]
    fn senml_json_record_escaping_the_base_path_is_rejected() {
        let base = Path::from_slash_separated("/3/0").unwrap();
        let payload = br#"[{"bn":"/5/0","n":"1","v":80}]"#;
        let err = InputContext::new(InputFormat::SenmlJson, base, payload).unwrap_err();
        assert!(matches!(err, LwM2mError::BadRequest(_)));
    }

    #[test]
    fn senml_cbor_reads_decimal_fraction_values() {
        // array[1] of map{n: "/13/26/1", v: 4.5 as tag-4 decimal fraction}
        let mut out = Vec::new();
        let mut e = cbor::Encoder::new(&mut out);
        e.array_begin(1);
        e.map_begin(2);
        e.int(0);
        e.string("/13/26/1");
        e.int(2);
        e.tag(4);
        e.array_begin(2);
        e.int(-1);
        e.int(45);

        let base = Path::ROOT;
        let mut ctx = InputContext::new(InputFormat::SenmlCbor, base, &out).unwrap();
        let path = ctx.get_path().unwrap();
        assert_eq!(path, Path::from_slash_separated("/13/26/1").unwrap());
        assert_eq!(ctx.get_f64().unwrap(), 4.5);
    }
}

//! SenML-like encoder facade producing SenML-JSON or SenML-CBOR records
//! grounded in `anjay_senml_like_encoder.c`/`anjay_senml_cbor_encoder.c`.
//!
//! SenML-CBOR needs its outer array length to be definite, so elements are
//! buffered in memory and the array header is emitted at [`Encoder::finish`].
//! SenML-JSON has no such requirement, so it streams through `serde_json`.

use crate::cbor;
use crate::error::{LwM2mError, Result};

/// An LwM2M object link (Object ID : Object Instance ID), the typed
/// in-memory form of the wire `"oid:iid"` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLink {
    pub object_id: u16,
    pub object_instance_id: u16,
}

impl ObjectLink {
    pub fn to_wire_string(self) -> String {
        format!("{}:{}", self.object_id, self.object_instance_id)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (oid, iid) = s
            .split_once(':')
            .ok_or_else(|| LwM2mError::BadRequest("object link missing ':'".into()))?;
        // Trailing garbage and numeric overflow are both undistinguished
        // BadRequest per SPEC_FULL.md's Open Question decision.
        let object_id = oid
            .parse()
            .map_err(|_| LwM2mError::BadRequest("invalid object link object id".into()))?;
        let object_instance_id = iid
            .parse()
            .map_err(|_| LwM2mError::BadRequest("invalid object link instance id".into()))?;
        Ok(ObjectLink {
            object_id,
            object_instance_id,
        })
    }
}

/// SenML numeric labels used by the CBOR backend.
mod label {
    pub const BASE_NAME: i64 = -2;
    pub const BASE_TIME: i64 = -3;
    pub const NAME: i64 = 0;
    pub const TIME: i64 = 6;
    pub const VALUE: i64 = 2;
    pub const VALUE_STRING: i64 = 3;
    pub const VALUE_BOOL: i64 = 4;
    pub const VALUE_DATA: i64 = 8;
    pub const VALUE_OBJLNK: &str = "vlo";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Cbor,
    Json,
}

enum Backend {
    Cbor {
        elements: Vec<Vec<u8>>,
        current: Vec<u8>,
        field_count: usize,
    },
    Json {
        elements: Vec<serde_json::Map<String, serde_json::Value>>,
        current: serde_json::Map<String, serde_json::Value>,
    },
}

/// A single-value-per-element SenML record encoder.
pub struct Encoder {
    backend: Backend,
    value_written: bool,
    bytes_remaining: usize,
    bytes_buf: Vec<u8>,
    element_open: bool,
}

impl Encoder {
    pub fn new(format: Format) -> Self {
        let backend = match format {
            Format::Cbor => Backend::Cbor {
                elements: Vec::new(),
                current: Vec::new(),
                field_count: 0,
            },
            Format::Json => Backend::Json {
                elements: Vec::new(),
                current: serde_json::Map::new(),
            },
        };
        Encoder {
            backend,
            value_written: false,
            bytes_remaining: 0,
            bytes_buf: Vec::new(),
            element_open: false,
        }
    }

    /// Opens a new element. `basename`/`name` are omitted if `None`; `time_s`
    /// is omitted if `NaN`.
    pub fn element_begin(&mut self, basename: Option<&str>, name: Option<&str>, time_s: f64) -> Result<()> {
        if self.element_open {
            return Err(LwM2mError::FormatMismatch(
                "previous SenML element was not closed".into(),
            ));
        }
        self.element_open = true;
        self.value_written = false;

        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                current.clear();
                *field_count = 0;
                // Field count (and thus the map header) can't be known until
                // element_end; buffer entries raw and prepend the header then.
                if let Some(bn) = basename {
                    let mut e = cbor::Encoder::new(current);
                    e.int(label::BASE_NAME);
                    e.string(bn);
                    *field_count += 1;
                }
                if let Some(n) = name {
                    let mut e = cbor::Encoder::new(current);
                    e.int(label::NAME);
                    e.string(n);
                    *field_count += 1;
                }
                if !time_s.is_nan() {
                    let mut e = cbor::Encoder::new(current);
                    e.int(label::TIME);
                    e.double(time_s);
                    *field_count += 1;
                }
            }
            Backend::Json { current, .. } => {
                current.clear();
                if let Some(bn) = basename {
                    current.insert("bn".into(), serde_json::Value::String(bn.into()));
                }
                if let Some(n) = name {
                    current.insert("n".into(), serde_json::Value::String(n.into()));
                }
                if !time_s.is_nan() {
                    current.insert(
                        "t".into(),
                        serde_json::Number::from_f64(time_s)
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
            }
        }
        Ok(())
    }

    fn check_single_value(&mut self) -> Result<()> {
        if !self.element_open {
            return Err(LwM2mError::FormatMismatch(
                "SenML value written outside an element".into(),
            ));
        }
        if self.value_written {
            return Err(LwM2mError::FormatMismatch(
                "SenML element may carry only one value field".into(),
            ));
        }
        self.value_written = true;
        Ok(())
    }

    pub fn value_int(&mut self, v: i64) -> Result<()> {
        self.check_single_value()?;
        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                let mut e = cbor::Encoder::new(current);
                e.int(label::VALUE);
                e.int(v);
                *field_count += 1;
            }
            Backend::Json { current, .. } => {
                current.insert("v".into(), serde_json::Value::Number(v.into()));
            }
        }
        Ok(())
    }

    pub fn value_f64(&mut self, v: f64) -> Result<()> {
        self.check_single_value()?;
        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                let mut e = cbor::Encoder::new(current);
                e.int(label::VALUE);
                e.double(v);
                *field_count += 1;
            }
            Backend::Json { current, .. } => {
                let n = serde_json::Number::from_f64(v).unwrap_or_else(|| 0.into());
                current.insert("v".into(), serde_json::Value::Number(n));
            }
        }
        Ok(())
    }

    pub fn value_bool(&mut self, v: bool) -> Result<()> {
        self.check_single_value()?;
        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                let mut e = cbor::Encoder::new(current);
                e.int(label::VALUE_BOOL);
                e.bool(v);
                *field_count += 1;
            }
            Backend::Json { current, .. } => {
                current.insert("vb".into(), serde_json::Value::Bool(v));
            }
        }
        Ok(())
    }

    pub fn value_string(&mut self, v: &str) -> Result<()> {
        self.check_single_value()?;
        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                let mut e = cbor::Encoder::new(current);
                e.int(label::VALUE_STRING);
                e.string(v);
                *field_count += 1;
            }
            Backend::Json { current, .. } => {
                current.insert("vs".into(), serde_json::Value::String(v.into()));
            }
        }
        Ok(())
    }

    pub fn value_objlnk(&mut self, link: ObjectLink) -> Result<()> {
        self.check_single_value()?;
        let wire = link.to_wire_string();
        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                let mut e = cbor::Encoder::new(current);
                e.string(label::VALUE_OBJLNK);
                e.string(&wire);
                *field_count += 1;
            }
            Backend::Json { current, .. } => {
                current.insert("vlo".into(), serde_json::Value::String(wire));
            }
        }
        Ok(())
    }

    pub fn bytes_begin(&mut self, len: usize) -> Result<()> {
        self.check_single_value()?;
        self.bytes_remaining = len;
        self.bytes_buf = Vec::with_capacity(len);
        Ok(())
    }

    pub fn bytes_append(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > self.bytes_remaining {
            return Err(LwM2mError::FormatMismatch(
                "more bytes appended than declared in bytes_begin".into(),
            ));
        }
        self.bytes_remaining -= chunk.len();
        self.bytes_buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn bytes_end(&mut self) -> Result<()> {
        if self.bytes_remaining != 0 {
            return Err(LwM2mError::FormatMismatch(
                "not all declared bytes were written".into(),
            ));
        }
        match &mut self.backend {
            Backend::Cbor {
                current,
                field_count,
                ..
            } => {
                let mut e = cbor::Encoder::new(current);
                e.int(label::VALUE_DATA);
                e.bytes_begin(self.bytes_buf.len());
                e.bytes_append(&self.bytes_buf);
                e.bytes_end();
                *field_count += 1;
            }
            Backend::Json { current, .. } => {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes_buf);
                current.insert("vd".into(), serde_json::Value::String(encoded));
            }
        }
        Ok(())
    }

    pub fn element_end(&mut self) -> Result<()> {
        if !self.element_open {
            return Err(LwM2mError::FormatMismatch("no SenML element is open".into()));
        }
        if !self.value_written {
            return Err(LwM2mError::FormatMismatch(
                "SenML element requires exactly one value field".into(),
            ));
        }
        self.element_open = false;
        match &mut self.backend {
            Backend::Cbor {
                elements,
                current,
                field_count,
            } => {
                let mut sealed = Vec::new();
                let mut e = cbor::Encoder::new(&mut sealed);
                e.map_begin(*field_count);
                sealed.extend_from_slice(current);
                elements.push(sealed);
            }
            Backend::Json { elements, current } => {
                elements.push(std::mem::take(current));
            }
        }
        Ok(())
    }

    /// Emits the complete SenML document: the definite-length array header
    /// plus every buffered element (CBOR), or the serialized JSON array.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.element_open {
            return Err(LwM2mError::FormatMismatch(
                "SenML document finished with an open element".into(),
            ));
        }
        match self.backend {
            Backend::Cbor { elements, .. } => {
                let mut out = Vec::new();
                let mut e = cbor::Encoder::new(&mut out);
                e.array_begin(elements.len());
                for element in elements {
                    out.extend_from_slice(&element);
                }
                Ok(out)
            }
            Backend::Json { elements, .. } => {
                let value = serde_json::Value::Array(
                    elements.into_iter().map(serde_json::Value::Object).collect(),
                );
                serde_json::to_vec(&value).map_err(LwM2mError::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_write_composite_matches_worked_example_shape() {
        // array[1] of map{n=/13/26/1, v=42}
        let mut enc = Encoder::new(Format::Cbor);
        enc.element_begin(None, Some("/13/26/1"), f64::NAN).unwrap();
        enc.value_int(42).unwrap();
        enc.element_end().unwrap();
        let bytes = enc.finish().unwrap();
        assert_eq!(bytes[0], 0x81); // array(1)
        assert_eq!(bytes[1], 0xA2); // map(2): n, v
    }

    #[test]
    fn json_backend_serializes_name_and_value() {
        let mut enc = Encoder::new(Format::Json);
        enc.element_begin(Some("/13/26"), Some("1"), f64::NAN).unwrap();
        enc.value_int(42).unwrap();
        enc.element_end().unwrap();
        let bytes = enc.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"bn\":\"/13/26\""));
        assert!(text.contains("\"n\":\"1\""));
        assert!(text.contains("\"v\":42"));
    }

    #[test]
    fn rejects_two_value_fields_in_one_element() {
        let mut enc = Encoder::new(Format::Json);
        enc.element_begin(None, Some("1"), f64::NAN).unwrap();
        enc.value_int(1).unwrap();
        assert!(enc.value_bool(true).is_err());
    }

    #[test]
    fn rejects_element_end_without_value() {
        let mut enc = Encoder::new(Format::Json);
        enc.element_begin(None, Some("1"), f64::NAN).unwrap();
        assert!(enc.element_end().is_err());
    }

    #[test]
    fn object_link_round_trips_through_wire_string() {
        let link = ObjectLink {
            object_id: 13,
            object_instance_id: 26,
        };
        assert_eq!(ObjectLink::parse(&link.to_wire_string()).unwrap(), link);
    }

    #[test]
    fn object_link_rejects_missing_colon() {
        assert!(ObjectLink::parse("1326").is_err());
    }
}

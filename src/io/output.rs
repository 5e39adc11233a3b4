//! Output context: the write-side counterpart of [`super::InputContext`].
//!
//! A handler calls `set_path` once per value it wants to emit, writes
//! exactly one value through a `ret_*`/`bytes_*` call, and finishes with
//! `close`. Flat formats (plain text, octet stream, raw CBOR) accept only
//! one such path; hierarchical formats (SenML, TLV) accept many, each
//! relative to the base path the context was opened with.

use crate::cbor;
use crate::path::Path;
use crate::senml;
use crate::tlv::{self, EntryKind};
use crate::error::{LwM2mError, Result};

/// Which wire format an [`OutputContext`] serializes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    PlainText,
    OctetStream,
    Cbor,
    SenmlCbor,
    SenmlJson,
    LwM2mTlv,
}

enum Backend {
    /// Plain text and octet stream both carry exactly one scalar value,
    /// written as UTF-8 text or raw bytes respectively.
    Scalar { text: bool, buf: Vec<u8> },
    Cbor { buf: Vec<u8> },
    Senml { enc: senml::Encoder, basename: Option<String> },
    Tlv { entries: Vec<(EntryKind, u16, Vec<u8>)> },
}

/// A streaming, path-addressable sink a data-model handler writes
/// resource values into.
pub struct OutputContext {
    base: Path,
    current: Option<Path>,
    value_written: bool,
    scalar_used: bool,
    backend: Backend,
}

impl OutputContext {
    pub fn new(format: OutputFormat, base: Path) -> Self {
        let backend = match format {
            OutputFormat::PlainText => Backend::Scalar {
                text: true,
                buf: Vec::new(),
            },
            OutputFormat::OctetStream => Backend::Scalar {
                text: false,
                buf: Vec::new(),
            },
            OutputFormat::Cbor => Backend::Cbor { buf: Vec::new() },
            OutputFormat::SenmlCbor => Backend::Senml {
                enc: senml::Encoder::new(senml::Format::Cbor),
                basename: None,
            },
            OutputFormat::SenmlJson => Backend::Senml {
                enc: senml::Encoder::new(senml::Format::Json),
                basename: None,
            },
            OutputFormat::LwM2mTlv => Backend::Tlv { entries: Vec::new() },
        };
        OutputContext {
            base,
            current: None,
            value_written: false,
            scalar_used: false,
            backend,
        }
    }

    /// Declares which path the next value belongs to. `path` must fall
    /// within the context's base path. Calling this a second time on a
    /// flat-format context is a [`LwM2mError::FormatMismatch`].
    pub fn set_path(&mut self, path: Path) -> Result<()> {
        if !path.within(&self.base) {
            return Err(LwM2mError::FormatMismatch(
                "output path outside base path".into(),
            ));
        }
        if matches!(self.backend, Backend::Scalar { .. } | Backend::Cbor { .. }) && self.scalar_used {
            return Err(LwM2mError::FormatMismatch(
                "flat output format accepts only one value".into(),
            ));
        }
        if let Some(cur) = self.current {
            if cur != path && !self.value_written {
                return Err(LwM2mError::FormatMismatch(
                    "set_path called again before a value was written".into(),
                ));
            }
        }
        self.current = Some(path);
        self.value_written = false;

        if let Backend::Senml { basename, .. } = &mut self.backend {
            if basename.is_none() {
                *basename = Some(self.base.to_string());
            }
        }
        Ok(())
    }

    /// Clears the current path without requiring a value — used by
    /// handlers that enumerate a range and find some entries absent.
    pub fn clear_path(&mut self) {
        self.current = None;
        self.value_written = false;
    }

    fn relative_name(&self, path: &Path) -> String {
        let base_len = self.base.len();
        let ids = path.raw();
        let mut name = String::new();
        for i in base_len..path.len() {
            if !name.is_empty() {
                name.push('/');
            }
            name.push_str(&ids[i].to_string());
        }
        name
    }

    fn require_current(&mut self) -> Result<Path> {
        self.current
            .ok_or_else(|| LwM2mError::FormatMismatch("no path set before writing a value".into()))
    }

    fn senml_begin(&mut self, path: Path) -> Result<()> {
        let name = self.relative_name(&path);
        if let Backend::Senml { enc, basename } = &mut self.backend {
            let name = if name.is_empty() { None } else { Some(name.as_str()) };
            enc.element_begin(basename.as_deref(), name, f64::NAN)?;
        }
        Ok(())
    }

    pub fn ret_i64(&mut self, value: i64) -> Result<()> {
        let path = self.require_current()?;
        if matches!(self.backend, Backend::Senml { .. }) {
            self.senml_begin_then(path, |e| e.value_int(value))?;
            return self.finish_value();
        }
        match &mut self.backend {
            Backend::Scalar { text, buf } => {
                if *text {
                    buf.extend_from_slice(value.to_string().as_bytes());
                } else {
                    return Err(LwM2mError::FormatMismatch(
                        "octet stream cannot carry an integer value".into(),
                    ));
                }
            }
            Backend::Cbor { buf } => cbor::Encoder::new(buf).int(value),
            Backend::Senml { .. } => unreachable!(),
            Backend::Tlv { .. } => {
                let id = self.tlv_id(&path)?;
                let bytes = tlv::encode_i64(value);
                if let Backend::Tlv { entries } = &mut self.backend {
                    entries.push((EntryKind::Resource, id, bytes));
                }
            }
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    pub fn ret_f64(&mut self, value: f64) -> Result<()> {
        let path = self.require_current()?;
        if matches!(self.backend, Backend::Senml { .. }) {
            self.senml_begin_then(path, |e| e.value_f64(value))?;
            return self.finish_value();
        }
        match &mut self.backend {
            Backend::Scalar { text, buf } => {
                if *text {
                    buf.extend_from_slice(value.to_string().as_bytes());
                } else {
                    return Err(LwM2mError::FormatMismatch(
                        "octet stream cannot carry a float value".into(),
                    ));
                }
            }
            Backend::Cbor { buf } => cbor::Encoder::new(buf).double(value),
            Backend::Senml { .. } => unreachable!(),
            Backend::Tlv { .. } => {
                let id = self.tlv_id(&path)?;
                let bits = value.to_be_bytes().to_vec();
                if let Backend::Tlv { entries } = &mut self.backend {
                    entries.push((EntryKind::Resource, id, bits));
                }
            }
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    pub fn ret_bool(&mut self, value: bool) -> Result<()> {
        let path = self.require_current()?;
        if matches!(self.backend, Backend::Senml { .. }) {
            self.senml_begin_then(path, |e| e.value_bool(value))?;
            return self.finish_value();
        }
        match &mut self.backend {
            Backend::Scalar { text, buf } => {
                if *text {
                    buf.extend_from_slice(if value { b"1" } else { b"0" });
                } else {
                    return Err(LwM2mError::FormatMismatch(
                        "octet stream cannot carry a bool value".into(),
                    ));
                }
            }
            Backend::Cbor { buf } => cbor::Encoder::new(buf).bool(value),
            Backend::Senml { .. } => unreachable!(),
            Backend::Tlv { .. } => {
                let id = self.tlv_id(&path)?;
                if let Backend::Tlv { entries } = &mut self.backend {
                    entries.push((EntryKind::Resource, id, vec![value as u8]));
                }
            }
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    pub fn ret_string(&mut self, value: &str) -> Result<()> {
        let path = self.require_current()?;
        if matches!(self.backend, Backend::Senml { .. }) {
            self.senml_begin_then(path, |e| e.value_string(value))?;
            return self.finish_value();
        }
        match &mut self.backend {
            Backend::Scalar { buf, .. } => buf.extend_from_slice(value.as_bytes()),
            Backend::Cbor { buf } => cbor::Encoder::new(buf).string(value),
            Backend::Senml { .. } => unreachable!(),
            Backend::Tlv { .. } => {
                let id = self.tlv_id(&path)?;
                if let Backend::Tlv { entries } = &mut self.backend {
                    entries.push((EntryKind::Resource, id, value.as_bytes().to_vec()));
                }
            }
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    pub fn ret_objlnk(&mut self, link: senml::ObjectLink) -> Result<()> {
        let path = self.require_current()?;
        match &self.backend {
            Backend::Senml { .. } => {}
            Backend::Tlv { .. } => {}
            _ => return Err(LwM2mError::FormatMismatch("object links need a hierarchical format".into())),
        }
        if matches!(self.backend, Backend::Senml { .. }) {
            self.senml_begin_then(path, |e| e.value_objlnk(link))?;
            return self.finish_value();
        }
        let id = self.tlv_id(&path)?;
        let wire = link.to_wire_string();
        if let Backend::Tlv { entries } = &mut self.backend {
            entries.push((EntryKind::Resource, id, wire.into_bytes()));
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    fn senml_begin_then(&mut self, path: Path, write: impl FnOnce(&mut senml::Encoder) -> Result<()>) -> Result<()> {
        self.senml_begin(path)?;
        if let Backend::Senml { enc, .. } = &mut self.backend {
            write(enc)?;
        }
        Ok(())
    }

    fn finish_value(&mut self) -> Result<()> {
        if let Backend::Senml { enc, .. } = &mut self.backend {
            enc.element_end()?;
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    fn tlv_id(&self, path: &Path) -> Result<u16> {
        let base_len = self.base.len();
        path.raw()
            .get(base_len)
            .copied()
            .filter(|&id| id != crate::path::INVALID)
            .ok_or_else(|| LwM2mError::FormatMismatch("TLV output path has no id past the base".into()))
    }

    pub fn bytes_begin(&mut self, len: usize) -> Result<()> {
        let path = self.require_current()?;
        if matches!(self.backend, Backend::Tlv { .. }) {
            return Err(LwM2mError::FormatMismatch(
                "chunked byte append not supported for TLV; use ret_string".into(),
            ));
        }
        if matches!(self.backend, Backend::Senml { .. }) {
            return self.senml_begin_then(path, |e| e.bytes_begin(len));
        }
        if let Backend::Cbor { buf } = &mut self.backend {
            cbor::Encoder::new(buf).bytes_begin(len);
        }
        Ok(())
    }

    pub fn bytes_append(&mut self, chunk: &[u8]) -> Result<()> {
        match &mut self.backend {
            Backend::Scalar { buf, .. } => buf.extend_from_slice(chunk),
            Backend::Cbor { buf } => cbor::Encoder::new(buf).bytes_append(chunk),
            Backend::Senml { enc, .. } => enc.bytes_append(chunk)?,
            Backend::Tlv { .. } => {
                return Err(LwM2mError::FormatMismatch(
                    "chunked byte append not supported for TLV; use ret_string".into(),
                ))
            }
        }
        Ok(())
    }

    pub fn bytes_end(&mut self) -> Result<()> {
        self.require_current()?;
        if let Backend::Senml { enc, .. } = &mut self.backend {
            enc.bytes_end()?;
            enc.element_end()?;
        }
        self.scalar_used = true;
        self.value_written = true;
        Ok(())
    }

    /// Finalizes the document. Errors if a path was set without a
    /// matching value (mirrors `AnjayRetNotCalled`-style close checks).
    pub fn close(self) -> Result<Vec<u8>> {
        if self.current.is_some() && !self.value_written {
            return Err(LwM2mError::FormatMismatch(
                "output context closed with an unwritten path".into(),
            ));
        }
        match self.backend {
            Backend::Scalar { buf, .. } => Ok(buf),
            Backend::Cbor { buf } => Ok(buf),
            Backend::Senml { enc, .. } => enc.finish(),
            Backend::Tlv { entries } => {
                let mut out = Vec::new();
                for (kind, id, value) in entries {
                    tlv::write_entry(&mut out, kind, id, &value);
                }
                Ok(out)
            }
        }
    }
}

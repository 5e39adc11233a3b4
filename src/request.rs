//! Turns a CoAP header (method + option list) into an [`Action`] and a
//! fully-parsed [`Request`], or a `BadOption`/`BadRequest` error describing
//! why the request is malformed.
//!
//! Deliberately decoupled from any particular CoAP library's wire types:
//! the caller translates a `coap_lite::Packet` (or any other transport's
//! representation) into [`RawOptions`] once, at the edge. Everything past
//! that boundary is pure parsing, and is exercised directly by this
//! module's tests without needing a real socket or packet codec.

use crate::io::{Action, ContentFormat};
use crate::path::Path;
use crate::error::{LwM2mError, Result};

/// RFC 7252 option numbers this parser looks at.
pub mod option_number {
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const OBSERVE: u16 = 6;
    pub const BLOCK1: u16 = 27;
    pub const BLOCK2: u16 = 23;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Fetch,
    IPatch,
}

/// A CoAP request's options as `(number, raw value)` pairs in wire order,
/// already stripped of transport framing (message id, token, payload).
#[derive(Debug, Clone)]
pub struct RawOptions<'a> {
    pub method: Method,
    pub options: Vec<(u16, &'a [u8])>,
    pub has_observe: bool,
    /// The CoAP message token, carried through so an Observe request's
    /// response can be matched back to its subscription later. Empty for
    /// transports that don't hand us a token (e.g. tests).
    pub token: Vec<u8>,
}

/// Sentinel content format meaning "the option was absent".
pub const FORMAT_NONE: u16 = u16::MAX;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteAttributes {
    pub pmin: Option<u64>,
    pub pmax: Option<u64>,
    pub epmin: Option<u64>,
    pub epmax: Option<u64>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
    pub con: Option<bool>,
}

impl WriteAttributes {
    fn is_empty(&self) -> bool {
        self == &WriteAttributes::default()
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub action: Action,
    pub path: Path,
    pub is_bootstrap: bool,
    pub attributes: WriteAttributes,
    pub content_format: Option<ContentFormat>,
    pub accept: Option<ContentFormat>,
    pub observe: bool,
    /// The opaque observation token carried by an Observe request, so the
    /// eventual notification can be matched back to it. `None` unless
    /// `observe` is set.
    pub observe_token: Option<Vec<u8>>,
}

/// Parses one request. `content_format_id`/`accept_id` are the raw Content-
/// Format/Accept option values already decoded from their variable-length
/// CoAP integer encoding, or `FORMAT_NONE` if the option was absent.
pub fn parse(raw: &RawOptions, content_format_id: u16, accept_id: u16) -> Result<Request> {
    validate_critical_options(raw)?;

    let (path, is_bootstrap) = parse_uri_path(raw)?;
    let attributes = parse_uri_query(raw)?;
    let content_format = parse_format_option(content_format_id)?;
    let accept = parse_format_option(accept_id)?;

    let action = derive_action(raw.method, &path, is_bootstrap, accept, content_format)?;

    if action != Action::WriteAttributes && !attributes.is_empty() {
        return Err(LwM2mError::BadOption(
            "notification attributes are only valid on a WriteAttributes request".into(),
        ));
    }

    let observe_token = raw.has_observe.then(|| raw.token.clone());

    Ok(Request {
        action,
        path,
        is_bootstrap,
        attributes,
        content_format,
        accept,
        observe: raw.has_observe,
        observe_token,
    })
}

fn validate_critical_options(raw: &RawOptions) -> Result<()> {
    use option_number::*;
    for (number, _) in &raw.options {
        match *number {
            URI_PATH | URI_QUERY | ACCEPT | CONTENT_FORMAT | BLOCK1 | BLOCK2 | OBSERVE => {}
            other => {
                return Err(LwM2mError::BadOption(format!(
                    "unrecognized critical option {other}"
                )))
            }
        }
    }
    Ok(())
}

fn parse_uri_path(raw: &RawOptions) -> Result<(Path, bool)> {
    let segments: Vec<&str> = raw
        .options
        .iter()
        .filter(|(n, _)| *n == option_number::URI_PATH)
        .map(|(_, v)| std::str::from_utf8(v).map_err(|_| LwM2mError::BadOption("Uri-Path is not UTF-8".into())))
        .collect::<Result<_>>()?;

    if segments.len() == 1 && segments[0] == "bs" {
        return Ok((Path::ROOT, true));
    }
    if segments.is_empty() || (segments.len() == 1 && segments[0].is_empty()) {
        return Ok((Path::ROOT, false));
    }
    if segments.len() > 4 {
        return Err(LwM2mError::BadOption("Uri-Path has too many segments".into()));
    }
    let mut ids = Vec::with_capacity(segments.len());
    for seg in segments {
        let id: u32 = seg
            .parse()
            .map_err(|_| LwM2mError::BadOption("Uri-Path segment is not a 16-bit id".into()))?;
        if id >= crate::path::INVALID as u32 {
            return Err(LwM2mError::BadOption("Uri-Path id out of range".into()));
        }
        ids.push(id as u16);
    }
    let path = Path::try_new(&ids).ok_or_else(|| LwM2mError::BadOption("malformed Uri-Path".into()))?;
    Ok((path, false))
}

fn parse_uri_query(raw: &RawOptions) -> Result<WriteAttributes> {
    let mut attrs = WriteAttributes::default();
    let mut seen = std::collections::HashSet::new();

    for (number, value) in &raw.options {
        if *number != option_number::URI_QUERY {
            continue;
        }
        let text = std::str::from_utf8(value).map_err(|_| LwM2mError::BadOption("Uri-Query is not UTF-8".into()))?;
        let (key, val) = text.split_once('=').unwrap_or((text, ""));
        if !seen.insert(key.to_string()) {
            return Err(LwM2mError::BadOption(format!("duplicate query key {key}")));
        }
        match key {
            "pmin" => attrs.pmin = parse_nonneg_nullable(val)?,
            "pmax" => attrs.pmax = parse_nonneg_nullable(val)?,
            "epmin" => attrs.epmin = parse_nonneg_nullable(val)?,
            "epmax" => attrs.epmax = parse_nonneg_nullable(val)?,
            "gt" => attrs.gt = Some(parse_finite(val)?),
            "lt" => attrs.lt = Some(parse_finite(val)?),
            "st" => attrs.st = Some(parse_finite(val)?),
            "con" => {
                attrs.con = Some(match val {
                    "0" => false,
                    "1" => true,
                    _ => return Err(LwM2mError::BadOption("con must be 0 or 1".into())),
                })
            }
            other => return Err(LwM2mError::BadOption(format!("unrecognized query key {other}"))),
        }
    }
    Ok(attrs)
}

fn parse_nonneg(s: &str) -> Result<u64> {
    s.parse().map_err(|_| LwM2mError::BadOption("expected a non-negative integer".into()))
}

/// `pmin`/`pmax`/`epmin`/`epmax` are absent-nullable: a bare key with no
/// `=value` is the explicit clear form a server uses to remove a
/// previously written attribute, not a parse error.
fn parse_nonneg_nullable(s: &str) -> Result<Option<u64>> {
    if s.is_empty() {
        return Ok(None);
    }
    parse_nonneg(s).map(Some)
}

fn parse_finite(s: &str) -> Result<f64> {
    let v: f64 = s.parse().map_err(|_| LwM2mError::BadOption("expected a number".into()))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(LwM2mError::BadOption("expected a finite number".into()))
    }
}

fn parse_format_option(id: u16) -> Result<Option<ContentFormat>> {
    if id == FORMAT_NONE {
        return Ok(None);
    }
    ContentFormat::from_numeric_id(id)
        .map(Some)
        .ok_or(LwM2mError::UnsupportedContentFormat(id))
}

fn derive_action(
    method: Method,
    path: &Path,
    is_bootstrap: bool,
    accept: Option<ContentFormat>,
    content_format: Option<ContentFormat>,
) -> Result<Action> {
    match method {
        Method::Get => {
            if accept == Some(ContentFormat::LinkFormat) {
                Ok(Action::Discover)
            } else {
                Ok(Action::Read)
            }
        }
        Method::Post if is_bootstrap => Ok(Action::BootstrapFinish),
        Method::Post => match path.len() {
            2 => Ok(Action::WriteUpdate),
            3 => Ok(Action::Execute),
            4 => Ok(Action::Write),
            0 | 1 => Ok(Action::Create),
            _ => Err(LwM2mError::BadOption("path too deep for POST".into())),
        },
        Method::Put => {
            if content_format.is_some() {
                Ok(Action::Write)
            } else {
                Ok(Action::WriteAttributes)
            }
        }
        Method::Delete => Ok(Action::Delete),
        Method::Fetch => Ok(Action::ReadComposite),
        Method::IPatch => Ok(Action::WriteComposite),
    }
}

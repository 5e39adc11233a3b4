//! The handler trait an application implements once per LwM2M Object.

use crate::io::{InputContext, OutputContext};
use crate::path::Path;
use crate::error::Result;
use crate::request::WriteAttributes;

/// One parsed Execute argument: `id` plus an optional string value, from
/// a comma-delimited `id[=value]` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteArg {
    pub id: u8,
    pub value: Option<String>,
}

/// Parses an Execute payload into its argument list. Empty payload yields
/// an empty list, not an error — Execute may take no arguments.
pub fn parse_execute_args(payload: &[u8]) -> Result<Vec<ExecuteArg>> {
    use crate::error::LwM2mError;

    let text = std::str::from_utf8(payload)
        .map_err(|_| LwM2mError::BadRequest("Execute payload is not UTF-8".into()))?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|part| {
            let (id_str, value) = match part.split_once('=') {
                Some((id, v)) => (id, Some(v.trim_matches('\'').to_string())),
                None => (part, None),
            };
            let id: u8 = id_str
                .parse()
                .map_err(|_| LwM2mError::BadRequest("Execute argument id is not numeric".into()))?;
            Ok(ExecuteArg { id, value })
        })
        .collect()
}

/// Implemented once per LwM2M Object by the embedding application. All
/// methods receive a path already validated against this object's id.
pub trait ObjectHandler {
    fn object_id(&self) -> u16;

    fn read(&self, path: &Path, out: &mut OutputContext) -> Result<()>;

    fn discover(&self, path: &Path, out: &mut OutputContext) -> Result<()> {
        self.read(path, out)
    }

    /// `partial = false` is a full Write (replace every present resource
    /// on the target instance); `partial = true` is a WriteUpdate.
    fn write(&mut self, path: &Path, input: &mut InputContext, partial: bool) -> Result<()>;

    fn execute(&mut self, path: &Path, args: &[ExecuteArg]) -> Result<()>;

    /// `instance_id = None` lets the object allocate; `Some(id)` requires
    /// `id` to be currently absent.
    fn create(&mut self, instance_id: Option<u16>, input: &mut InputContext) -> Result<u16>;

    fn delete(&mut self, path: &Path) -> Result<()>;

    /// Returns whatever write attributes are currently stored at `path`.
    /// Default: none stored, for objects that don't back notification
    /// attributes with their own persistence.
    fn read_attributes(&self, _path: &Path) -> Result<WriteAttributes> {
        Ok(WriteAttributes::default())
    }

    /// Applies a WriteAttributes record at `path`. `attrs` may carry
    /// explicit nulls (see [`crate::request::parse`]'s absent-nullable
    /// handling) meaning "clear this attribute here". Default: no-op, for
    /// objects that don't persist notification attributes themselves.
    fn write_attributes(&mut self, _path: &Path, _attrs: &WriteAttributes) -> Result<()> {
        Ok(())
    }

    /// Rolls back a write that this object accepted but the dispatcher's
    /// transaction ultimately had to abandon (e.g. a sibling object in the
    /// same composite write failed). Default: no-op, for objects whose
    /// writes are already atomic per-call.
    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Validates a parsed request's path against a registered object, wraps
//! writes in a rollback-on-failure transaction, and turns handler results
//! into CoAP response codes.

mod object;

pub use object::{parse_execute_args, ExecuteArg, ObjectHandler};

use crate::error::{CoapCode, LwM2mError, Result};
use crate::io::{Action, InputContext, OutputContext};
use crate::path::Path;
use crate::request::Request;

/// What the dispatcher produced for a successfully handled request.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A body is ready, already serialized by the output context passed in.
    Responded(Vec<u8>),
    /// Success with an empty body (Write, Delete, Execute, WriteAttributes).
    NoContent,
    /// `path` is where a Create allocated its new instance.
    Created(Path),
    /// Bootstrap requests are not handled here; the caller routes to the
    /// external bootstrap state machine that owns that state.
    Bootstrap,
}

/// Notified once after every successfully dispatched non-bootstrap
/// request, so an observe/notify scheduler can re-evaluate pending
/// subscriptions against the data that may have just changed.
pub trait ObserveQueue {
    fn schedule_flush(&mut self);
}

pub struct Dispatcher {
    objects: Vec<Box<dyn ObjectHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher { objects: Vec::new() }
    }

    pub fn register(&mut self, handler: Box<dyn ObjectHandler>) {
        self.objects.push(handler);
    }

    fn find_mut(&mut self, object_id: u16) -> Result<&mut Box<dyn ObjectHandler>> {
        self.objects
            .iter_mut()
            .find(|o| o.object_id() == object_id)
            .ok_or_else(|| LwM2mError::NotFound(format!("no object {object_id} registered")))
    }

    fn find(&self, object_id: u16) -> Result<&dyn ObjectHandler> {
        self.objects
            .iter()
            .find(|o| o.object_id() == object_id)
            .map(|b| b.as_ref())
            .ok_or_else(|| LwM2mError::NotFound(format!("no object {object_id} registered")))
    }

    /// Dispatches one already-parsed request. `input`/`out` must already be
    /// constructed (by the codec selector) and base-pathed to `req.path`
    /// for single-target actions, or to the composite request's shared
    /// base for `ReadComposite`/`WriteComposite`.
    pub fn dispatch(
        &mut self,
        req: &Request,
        input: Option<InputContext>,
        out: Option<OutputContext>,
        queue: &mut dyn ObserveQueue,
    ) -> std::result::Result<DispatchOutcome, CoapCode> {
        if req.is_bootstrap {
            return Ok(DispatchOutcome::Bootstrap);
        }
        let outcome = self.dispatch_inner(req, input, out);
        if outcome.is_ok() {
            queue.schedule_flush();
        }
        outcome.map_err(|e| e.to_coap_code())
    }

    fn dispatch_inner(
        &mut self,
        req: &Request,
        input: Option<InputContext>,
        out: Option<OutputContext>,
    ) -> Result<DispatchOutcome> {
        match req.action {
            Action::Read | Action::Discover => {
                let object_id = req
                    .path
                    .object_id()
                    .ok_or_else(|| LwM2mError::BadRequest("Read/Discover needs an object-scoped path".into()))?;
                let handler = self.find(object_id)?;
                let mut out = out.ok_or_else(|| LwM2mError::Internal("Read dispatched without an output context".into()))?;
                if req.action == Action::Discover {
                    handler.discover(&req.path, &mut out)?;
                } else {
                    handler.read(&req.path, &mut out)?;
                }
                Ok(DispatchOutcome::Responded(out.close()?))
            }
            Action::Write | Action::WriteUpdate => {
                let object_id = req
                    .path
                    .object_id()
                    .ok_or_else(|| LwM2mError::BadRequest("Write needs an object-scoped path".into()))?;
                let mut input = input.ok_or_else(|| LwM2mError::Internal("Write dispatched without an input context".into()))?;
                let partial = req.action == Action::WriteUpdate;
                let handler = self.find_mut(object_id)?;
                if let Err(e) = handler.write(&req.path, &mut input, partial) {
                    let _ = handler.rollback();
                    return Err(e);
                }
                Ok(DispatchOutcome::NoContent)
            }
            Action::Execute => {
                let object_id = req
                    .path
                    .object_id()
                    .ok_or_else(|| LwM2mError::BadRequest("Execute needs a resource path".into()))?;
                let args = match input {
                    Some(mut ctx) => {
                        let _ = ctx.get_path();
                        let raw = ctx.get_string().unwrap_or_default();
                        parse_execute_args(raw.as_bytes())?
                    }
                    None => Vec::new(),
                };
                let handler = self.find_mut(object_id)?;
                handler.execute(&req.path, &args)?;
                Ok(DispatchOutcome::NoContent)
            }
            Action::Create => {
                let object_id = req
                    .path
                    .object_id()
                    .ok_or_else(|| LwM2mError::BadRequest("Create needs at least an object id".into()))?;
                let mut input = input.ok_or_else(|| LwM2mError::Internal("Create dispatched without an input context".into()))?;
                let requested_instance = req.path.instance_id();
                let handler = self.find_mut(object_id)?;
                let new_id = handler.create(requested_instance, &mut input)?;
                let path = Path::new(&[object_id, new_id]);
                Ok(DispatchOutcome::Created(path))
            }
            Action::Delete => {
                let object_id = req
                    .path
                    .object_id()
                    .ok_or_else(|| LwM2mError::BadRequest("Delete needs an object-scoped path".into()))?;
                let handler = self.find_mut(object_id)?;
                handler.delete(&req.path)?;
                Ok(DispatchOutcome::NoContent)
            }
            Action::WriteAttributes => {
                let object_id = req
                    .path
                    .object_id()
                    .ok_or_else(|| LwM2mError::BadRequest("WriteAttributes needs an object-scoped path".into()))?;
                let handler = self.find_mut(object_id)?;
                handler.write_attributes(&req.path, &req.attributes)?;
                Ok(DispatchOutcome::NoContent)
            }
            Action::WriteComposite => {
                let mut input = input.ok_or_else(|| LwM2mError::Internal("WriteComposite dispatched without an input context".into()))?;
                let mut touched = Vec::new();
                while let Some(path) = input.peek_path() {
                    let object_id = path
                        .object_id()
                        .ok_or_else(|| LwM2mError::BadRequest("composite write entry has no object id".into()))?;
                    if !touched.contains(&object_id) {
                        touched.push(object_id);
                    }
                    let handler = self.find_mut(object_id)?;
                    if let Err(e) = handler.write(&path, &mut input, true) {
                        for id in &touched {
                            if let Ok(h) = self.find_mut(*id) {
                                let _ = h.rollback();
                            }
                        }
                        return Err(e);
                    }
                }
                Ok(DispatchOutcome::NoContent)
            }
            Action::ReadComposite => {
                let mut out = out.ok_or_else(|| LwM2mError::Internal("ReadComposite dispatched without an output context".into()))?;
                let targets = input
                    .map(|ctx| composite_read_targets(ctx))
                    .transpose()?
                    .unwrap_or_default();
                for path in targets {
                    let Some(object_id) = path.object_id() else { continue };
                    let handler = self.find(object_id)?;
                    handler.read(&path, &mut out)?;
                }
                Ok(DispatchOutcome::Responded(out.close()?))
            }
            Action::BootstrapFinish => Ok(DispatchOutcome::Bootstrap),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the target path list from a FETCH body: a SenML document whose
/// records carry `bn`/`n` but no value field (listing what to read, not
/// what to write).
fn composite_read_targets(mut ctx: InputContext) -> Result<Vec<Path>> {
    let mut paths = Vec::new();
    loop {
        match ctx.get_path() {
            Ok(p) => paths.push(p),
            Err(LwM2mError::GetPathEnd) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ContentFormat, InputFormat, OutputFormat};

    struct CounterObject {
        id: u16,
        value: i64,
        deleted: bool,
    }

    impl ObjectHandler for CounterObject {
        fn object_id(&self) -> u16 {
            self.id
        }

        fn read(&self, path: &Path, out: &mut OutputContext) -> Result<()> {
            out.set_path(*path)?;
            out.ret_i64(self.value)
        }

        fn write(&mut self, path: &Path, input: &mut InputContext, _partial: bool) -> Result<()> {
            let _ = input.get_path();
            self.value = input.get_i64()?;
            let _ = path;
            Ok(())
        }

        fn execute(&mut self, _path: &Path, _args: &[ExecuteArg]) -> Result<()> {
            self.value = 0;
            Ok(())
        }

        fn create(&mut self, instance_id: Option<u16>, _input: &mut InputContext) -> Result<u16> {
            Ok(instance_id.unwrap_or(0))
        }

        fn delete(&mut self, _path: &Path) -> Result<()> {
            self.deleted = true;
            Ok(())
        }
    }

    struct NoopQueue {
        flushed: bool,
    }
    impl ObserveQueue for NoopQueue {
        fn schedule_flush(&mut self) {
            self.flushed = true;
        }
    }

    fn read_request(path: Path) -> Request {
        Request {
            action: Action::Read,
            path,
            is_bootstrap: false,
            attributes: Default::default(),
            content_format: None,
            accept: None,
            observe: false,
            observe_token: None,
        }
    }

    #[test]
    fn read_dispatches_to_registered_object() {
        let mut d = Dispatcher::new();
        d.register(Box::new(CounterObject {
            id: 3,
            value: 42,
            deleted: false,
        }));
        let path = Path::from_slash_separated("/3/0/1").unwrap();
        let req = read_request(path);
        let out = OutputContext::new(OutputFormat::PlainText, path);
        let mut queue = NoopQueue { flushed: false };
        let outcome = d.dispatch(&req, None, Some(out), &mut queue).unwrap();
        match outcome {
            DispatchOutcome::Responded(bytes) => assert_eq!(bytes, b"42"),
            _ => panic!("expected a response body"),
        }
        assert!(queue.flushed);
    }

    #[test]
    fn read_on_unregistered_object_is_not_found() {
        let mut d = Dispatcher::new();
        let path = Path::from_slash_separated("/99/0/1").unwrap();
        let req = read_request(path);
        let out = OutputContext::new(OutputFormat::PlainText, path);
        let mut queue = NoopQueue { flushed: false };
        let err = d.dispatch(&req, None, Some(out), &mut queue).unwrap_err();
        assert_eq!(err, CoapCode::new(4, 4));
    }

    #[test]
    fn write_failure_triggers_rollback_and_error_mapping() {
        struct FailingWrite(u16);
        impl ObjectHandler for FailingWrite {
            fn object_id(&self) -> u16 {
                self.0
            }
            fn read(&self, _p: &Path, _o: &mut OutputContext) -> Result<()> {
                Ok(())
            }
            fn write(&mut self, _p: &Path, _i: &mut InputContext, _partial: bool) -> Result<()> {
                Err(LwM2mError::BadRequest("nope".into()))
            }
            fn execute(&mut self, _p: &Path, _a: &[ExecuteArg]) -> Result<()> {
                Ok(())
            }
            fn create(&mut self, _i: Option<u16>, _in: &mut InputContext) -> Result<u16> {
                Ok(0)
            }
            fn delete(&mut self, _p: &Path) -> Result<()> {
                Ok(())
            }
        }

        let mut d = Dispatcher::new();
        d.register(Box::new(FailingWrite(3)));
        let path = Path::from_slash_separated("/3/0/1").unwrap();
        let req = Request {
            action: Action::Write,
            path,
            is_bootstrap: false,
            attributes: Default::default(),
            content_format: Some(ContentFormat::PlainText),
            accept: None,
            observe: false,
            observe_token: None,
        };
        let input = InputContext::new(InputFormat::PlainText, path, b"1").unwrap();
        let mut queue = NoopQueue { flushed: false };
        let err = d.dispatch(&req, Some(input), None, &mut queue).unwrap_err();
        assert_eq!(err, CoapCode::new(4, 0));
        assert!(!queue.flushed);
    }

    #[test]
    fn write_attributes_on_unregistered_object_is_not_found() {
        let mut d = Dispatcher::new();
        let path = Path::from_slash_separated("/99/0/1").unwrap();
        let req = Request {
            action: Action::WriteAttributes,
            path,
            is_bootstrap: false,
            attributes: crate::request::WriteAttributes {
                pmin: Some(10),
                ..Default::default()
            },
            content_format: None,
            accept: None,
            observe: false,
            observe_token: None,
        };
        let mut queue = NoopQueue { flushed: false };
        let err = d.dispatch(&req, None, None, &mut queue).unwrap_err();
        assert_eq!(err, CoapCode::new(4, 4));
    }

    #[test]
    fn write_attributes_routes_to_the_registered_object() {
        struct AttrObject {
            id: u16,
            seen: std::cell::RefCell<Option<crate::request::WriteAttributes>>,
        }
        impl ObjectHandler for AttrObject {
            fn object_id(&self) -> u16 {
                self.id
            }
            fn read(&self, _p: &Path, _o: &mut OutputContext) -> Result<()> {
                Ok(())
            }
            fn write(&mut self, _p: &Path, _i: &mut InputContext, _partial: bool) -> Result<()> {
                Ok(())
            }
            fn execute(&mut self, _p: &Path, _a: &[ExecuteArg]) -> Result<()> {
                Ok(())
            }
            fn create(&mut self, _i: Option<u16>, _in: &mut InputContext) -> Result<u16> {
                Ok(0)
            }
            fn delete(&mut self, _p: &Path) -> Result<()> {
                Ok(())
            }
            fn write_attributes(&mut self, _p: &Path, attrs: &crate::request::WriteAttributes) -> Result<()> {
                *self.seen.borrow_mut() = Some(attrs.clone());
                Ok(())
            }
        }

        let mut d = Dispatcher::new();
        d.register(Box::new(AttrObject {
            id: 3,
            seen: std::cell::RefCell::new(None),
        }));
        let path = Path::from_slash_separated("/3/0/1").unwrap();
        let req = Request {
            action: Action::WriteAttributes,
            path,
            is_bootstrap: false,
            attributes: crate::request::WriteAttributes {
                pmin: Some(10),
                ..Default::default()
            },
            content_format: None,
            accept: None,
            observe: false,
            observe_token: None,
        };
        let mut queue = NoopQueue { flushed: false };
        assert!(matches!(d.dispatch(&req, None, None, &mut queue), Ok(DispatchOutcome::NoContent)));
        assert!(queue.flushed);
    }

    #[test]
    fn bootstrap_requests_are_deferred() {
        let mut d = Dispatcher::new();
        let req = Request {
            action: Action::BootstrapFinish,
            path: Path::ROOT,
            is_bootstrap: true,
            attributes: Default::default(),
            content_format: None,
            accept: None,
            observe: false,
            observe_token: None,
        };
        let mut queue = NoopQueue { flushed: false };
        assert!(matches!(d.dispatch(&req, None, None, &mut queue), Ok(DispatchOutcome::Bootstrap)));
        assert!(!queue.flushed);
    }
}

//! Request-to-response scenarios exercised through the public surface:
//! `request::parse` -> `io::Selector` -> `dispatch::Dispatcher`, the way a
//! CoAP transport adapter would drive this crate.

use lwm2m_core::dispatch::{ExecuteArg, ObjectHandler};
use lwm2m_core::io::{Action, ContentFormat, InputContext, InputFormat, OutputContext, OutputFormat, Selector};
use lwm2m_core::request::{self, option_number, Method, RawOptions};
use lwm2m_core::{tlv, DispatchOutcome, Dispatcher, ObserveQueue, Path, Result};

struct NoopQueue;
impl ObserveQueue for NoopQueue {
    fn schedule_flush(&mut self) {}
}

/// A device object whose one resource holds a scalar the tests can read
/// and write back, plus a second read-only string resource used by the
/// TLV scenario.
struct DeviceObject {
    object_id: u16,
    scalar: i64,
    label: &'static str,
}

impl ObjectHandler for DeviceObject {
    fn object_id(&self) -> u16 {
        self.object_id
    }

    fn read(&self, path: &Path, out: &mut OutputContext) -> Result<()> {
        match path.resource_id() {
            Some(1) => {
                out.set_path(*path)?;
                out.ret_i64(self.scalar)
            }
            Some(9) => {
                out.set_path(*path)?;
                out.ret_string(self.label)
            }
            _ => {
                let instance = Path::new(&[self.object_id, path.instance_id().unwrap_or(0)]);
                out.set_path(instance.push(1).unwrap())?;
                out.ret_i64(self.scalar)?;
                out.set_path(instance.push(9).unwrap())?;
                out.ret_string(self.label)
            }
        }
    }

    fn write(&mut self, path: &Path, input: &mut InputContext, _partial: bool) -> Result<()> {
        let _ = input.get_path();
        self.scalar = input.get_i64()?;
        let _ = path;
        Ok(())
    }

    fn execute(&mut self, _path: &Path, _args: &[ExecuteArg]) -> Result<()> {
        Ok(())
    }

    fn create(&mut self, instance_id: Option<u16>, _input: &mut InputContext) -> Result<u16> {
        Ok(instance_id.unwrap_or(0))
    }

    fn delete(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

fn raw<'a>(method: Method, options: Vec<(u16, &'a [u8])>) -> RawOptions<'a> {
    RawOptions {
        method,
        options,
        has_observe: false,
        token: Vec::new(),
    }
}

#[test]
fn read_scalar_resource_as_plain_text() {
    let r = raw(
        Method::Get,
        vec![
            (option_number::URI_PATH, b"13"),
            (option_number::URI_PATH, b"26"),
            (option_number::URI_PATH, b"1"),
        ],
    );
    let req = request::parse(&r, request::FORMAT_NONE, ContentFormat::PlainText.numeric_id()).unwrap();
    assert_eq!(req.action, Action::Read);

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Box::new(DeviceObject {
        object_id: 13,
        scalar: 42,
        label: "Hello, world!",
    }));

    let format = Selector::output_format(req.action, req.accept.unwrap()).unwrap();
    let out = OutputContext::new(format, req.path);
    let mut queue = NoopQueue;
    let outcome = dispatcher.dispatch(&req, None, Some(out), &mut queue).unwrap();
    match outcome {
        DispatchOutcome::Responded(body) => assert_eq!(body, b"42"),
        _ => panic!("expected a response body"),
    }
}

#[test]
fn read_instance_as_tlv() {
    let r = raw(Method::Get, vec![(option_number::URI_PATH, b"0"), (option_number::URI_PATH, b"0")]);
    let req = request::parse(&r, request::FORMAT_NONE, ContentFormat::LwM2mTlv.numeric_id()).unwrap();

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Box::new(DeviceObject {
        object_id: 0,
        scalar: 42,
        label: "Hello, world!",
    }));

    let format = Selector::output_format(req.action, req.accept.unwrap()).unwrap();
    let out = OutputContext::new(format, req.path);
    let mut queue = NoopQueue;
    let outcome = dispatcher.dispatch(&req, None, Some(out), &mut queue).unwrap();
    let body = match outcome {
        DispatchOutcome::Responded(body) => body,
        _ => panic!("expected a response body"),
    };

    let mut dec = tlv::Decoder::new(&body);
    let first = dec.next_entry().unwrap().unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(tlv::decode_i64(first.value).unwrap(), 42);
    let second = dec.next_entry().unwrap().unwrap();
    assert_eq!(second.id, 9);
    assert_eq!(std::str::from_utf8(second.value).unwrap(), "Hello, world!");
    assert!(dec.next_entry().unwrap().is_none());
}

#[test]
fn write_composite_in_senml_cbor() {
    // `[{0: "/13/26/1", 2: 42}]` — array of one record naming the full
    // path and an integer value, matching the SenML-CBOR write shape.
    let payload: Vec<u8> = vec![0x81, 0xA2, 0x00, 0x68, b'/', b'1', b'3', b'/', b'2', b'6', b'/', b'1', 0x02, 0x18, 0x2A];

    let r = raw(Method::IPatch, vec![]);
    let req = request::parse(&r, ContentFormat::SenmlCbor.numeric_id(), request::FORMAT_NONE).unwrap();
    assert_eq!(req.action, Action::WriteComposite);

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Box::new(DeviceObject {
        object_id: 13,
        scalar: 0,
        label: "",
    }));

    let input_format = Selector::input_format(req.action, req.content_format.unwrap()).unwrap();
    let input = InputContext::new(input_format, req.path, &payload).unwrap();
    let mut queue = NoopQueue;
    let outcome = dispatcher.dispatch(&req, Some(input), None, &mut queue).unwrap();
    assert!(matches!(outcome, DispatchOutcome::NoContent));
}

#[test]
fn write_attributes_with_bad_query_value_is_rejected() {
    let r = raw(
        Method::Put,
        vec![
            (option_number::URI_PATH, b"13"),
            (option_number::URI_PATH, b"26"),
            (option_number::URI_PATH, b"1"),
            (option_number::URI_QUERY, b"pmin=10"),
            (option_number::URI_QUERY, b"pmax=abc"),
        ],
    );
    let err = request::parse(&r, request::FORMAT_NONE, request::FORMAT_NONE).unwrap_err();
    assert!(err.to_coap_code().is_error());
    assert_eq!(err.to_coap_code().class, 4);
}

#[test]
fn cbor_decimal_fraction_decodes_as_double() {
    // C4 82 20 18 2D: tag 4, [-1, 45] -> 45 * 10^-1 = 4.5
    let payload = [0xC4, 0x82, 0x20, 0x18, 0x2D];
    let base = Path::from_slash_separated("/13/26/1").unwrap();
    let mut input = InputContext::new(InputFormat::Cbor, base, &payload).unwrap();
    let path = input.get_path().unwrap();
    assert_eq!(path, base);
    assert_eq!(input.get_f64().unwrap(), 4.5);
}

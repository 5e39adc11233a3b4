//! # lwm2m-core — LwM2M device-management client core
//!
//! A transport-agnostic implementation of the data-model plumbing an LwM2M
//! client needs once a CoAP request has already been parsed off the wire:
//! content-format codecs, a path-addressable object/instance/resource
//! model, request dispatch, write-attribute resolution, and the block-wise
//! download engine LwM2M's Firmware Update and Software Management objects
//! drive. The CoAP transport itself, the registration/bootstrap state
//! machines, and the object instance storage for a specific device are all
//! external collaborators this core is built to plug into, not to own.
//!
//! ## Architecture
//!
//! ```text
//!            CoAP request (path, method, options, payload)
//!                             |
//!                             v
//!                    request::parse  ->  Request { action, path, .. }
//!                             |
//!                             v
//!                  io::Selector  ->  InputContext / OutputContext
//!                             |
//!                             v
//!                     dispatch::Dispatcher
//!                     /       |        \
//!                    v        v         v
//!             ObjectHandler  attributes  download::DownloadEngine
//!             (per object)   ::resolve   (Firmware Update, etc.)
//! ```
//!
//! ## Content formats
//!
//! [`io::ContentFormat`] is a closed enum over every format the dispatcher
//! and download engine need to understand: plain text and opaque bytes for
//! single-resource Read/Write, LwM2M TLV ([`tlv`]) and SenML-JSON/-CBOR
//! ([`senml`], [`json`], [`cbor`]) for hierarchical reads, writes, and
//! composite operations. [`io::Selector`] maps a `(Content-Format, Accept,
//! action)` triple onto a concrete context rather than every caller
//! switching on the numeric id itself.
//!
//! ## Modules
//!
//! - [`path`]: the `/object/instance/resource/resource-instance` path
//!   model every other module addresses data by.
//! - [`cbor`]: low-level CBOR encoder/decoder (major types, indefinite
//!   maps, decimal fractions).
//! - [`json`]: streaming JSON decoder used by the SenML-JSON context.
//! - [`tlv`]: LwM2M TLV entry encoding/decoding.
//! - [`senml`]: the SenML-like record model shared by the JSON and CBOR
//!   hierarchical contexts.
//! - [`io`]: [`io::InputContext`]/[`io::OutputContext`] and the format
//!   selector that picks between them.
//! - [`request`]: CoAP request parsing into a content-format-independent
//!   [`request::Request`].
//! - [`attributes`]: write-attribute (`pmin`/`pmax`/`gt`/`lt`/`st`/`epmin`/
//!   `epmax`) inheritance and validation.
//! - [`dispatch`]: routes a parsed request to the object implementing its
//!   target path and turns the result into a CoAP response shape.
//! - [`download`]: the handle-keyed transfer registry plus the HTTP and
//!   CoAP block-wise GET drivers backing it.
//! - [`scheduler`]: the cooperative, single-threaded job queue every timed
//!   operation above (observe flushes, reconnects, idle timeouts) runs on.
//! - [`config`]: buffer sizing, default content-format preferences, and
//!   download driver defaults, loadable from TOML or environment.
//! - [`error`]: the error taxonomy and its mapping onto CoAP response
//!   codes.

pub mod attributes;
pub mod cbor;
pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod io;
pub mod json;
pub mod path;
pub mod request;
pub mod scheduler;
pub mod senml;
pub mod tlv;

pub use attributes::{resolve as resolve_attributes, AttributeStore, EffectiveAttributes};
pub use config::Config;
pub use dispatch::{DispatchOutcome, Dispatcher, ObjectHandler, ObserveQueue};
pub use download::{DownloadConfig, DownloadEngine, DownloadHandle, Transfer, TransferStatus, UrlScheme};
pub use error::{CoapCode, LwM2mError, Result};
pub use io::{Action, ContentFormat, InputContext, OutputContext, Selector};
pub use path::Path;
pub use request::{Method, Request};
pub use scheduler::{Scheduler, SchedulerHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

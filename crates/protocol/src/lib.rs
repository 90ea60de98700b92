//! Tether protocol: method catalogs, typed invocation and dispatch.
//!
//! A protocol is two catalogs, one per [`Role`]. Each catalog lists methods
//! in declaration order; the index of an entry is its wire identifier.
//!
//! Wire message layout (one frame, framing itself belongs to the transport):
//!
//! ```text
//! varint(method id) | arg 0 | arg 1 | ... | arg n-1
//! ```
//!
//! Arguments are postcard-encoded in declared order with no padding, so the
//! argument count and types are fixed entirely by the catalog entry.

pub mod catalog;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod invoker;
pub mod types;

pub use {
    catalog::{CatalogBuilder, CatalogEntry, DecodedCall, MethodCatalog, MethodId, Role},
    dispatch::{Dispatcher, HandlerTable},
    error::{DispatchError, InvokeError, ProtocolError, SchemaError},
    invoker::{CallBuilder, Invoker},
    types::{ArgKind, Args, Method, Signature, WireType},
};

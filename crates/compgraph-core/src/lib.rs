//! compgraph core - object model, descriptor conversion, node naming, errors

pub mod descriptor;
pub mod duration;
pub mod error;
pub mod naming;
pub mod types;

pub use descriptor::{
    convert, ComponentDescriptor, ComponentReference, ComponentSpec, ConversionError,
    DescriptorSignature, DigestSpec, RawDescriptor, SchemaVersion, SignatureSpec,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use naming::compute_key;
pub use types::*;

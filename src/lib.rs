#![deny(/*missing_docs,*/unsafe_code,
    unstable_features,
    unused_import_braces, unused_qualifications)]

#[macro_use]
extern crate log;

mod rparser;
mod probe;
pub use probe::*;
pub use rparser::*;

mod variant;
pub use variant::*;

mod buffer;
pub use buffer::*;

mod tree;
pub use tree::*;

pub mod logger;

pub mod bitmap;
pub mod fhandle;
pub mod rpc;
pub mod xdr;

pub mod nfs;
pub mod nfs3;
pub mod nfs4;
pub mod nfs_snoop;
pub mod nfs_types;

pub mod pcp;
pub mod pcp_types;

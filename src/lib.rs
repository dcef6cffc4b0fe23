//! tsn-coreconf: schema-driven YAML/CBOR codec for TSN switch management
//!
//! TSN switches managed over CoAP/CBOR (CORECONF) speak RFC 9254: YANG data
//! encoded as nested CBOR maps keyed by Delta-SIDs. This crate ingests a
//! directory of YANG modules and their SID files, merges them into a pair of
//! cross-referenced schema tables, and translates operator-facing YAML to
//! and from the compact wire form the device expects, bit for bit.
//!
//! # Key Features
//!
//! - **Schema tables**: path ↔ SID bijections, identity bijections, and
//!   parent/delta records merged from all `.sid` and `.yang` files, with a
//!   versioned on-disk cache
//! - **Type-aware encoding**: enumerations, identityrefs, decimal64,
//!   unions, bits and binary encoded per RFC 9254
//! - **Delta-SID compression**: child map keys relative to their schema
//!   parent, falling back to absolute SIDs across augmentation boundaries
//! - **Fetch queries**: SID-array query form for the device's fetch verb
//!
//! # Example
//!
//! ```ignore
//! use tsn_coreconf::{build_schema_tables, encode_yaml_to_cbor, BuildOptions, EncodeOptions};
//!
//! let tables = build_schema_tables("catalog/", &BuildOptions::default())?;
//! let cbor = encode_yaml_to_cbor(
//!     "- /ietf-interfaces:interfaces/interface[name='sw0']/enabled: true\n",
//!     &tables,
//!     &EncodeOptions::default(),
//! )?;
//! ```

mod builder;
mod codec;
mod decoder;
mod encoder;
mod error;
mod instance_id;
mod resolver;
mod schema;
mod sid_file;
mod value_codec;
mod yang;

pub use builder::{build_schema_tables, BuildOptions, CACHE_VERSION};
pub use codec::{
    decode_cbor_to_yaml, encode_yaml_to_cbor, extract_sid_queries, DecodeOptions, EncodeOptions,
};
pub use decoder::{decode_bytes, decode_tree, OutputFormat};
pub use encoder::{
    encode_entries, encode_to_bytes, queries_to_bytes, sid_queries, Entry, SidQuery, SortMode,
};
pub use error::{Error, Result};
pub use instance_id::{parse_instance_id, Segment};
pub use resolver::{resolve_segments, resolve_to_path};
pub use schema::{
    IdentityInfo, NodeInfo, SchemaTables, Sid, SidTree, TypeInfo, TypeTable, YangType,
};
pub use sid_file::{load_sid_file, parse_sid_file, SidItem};
pub use value_codec::{
    decode_value, encode_value, TAG_DECIMAL_FRACTION, TAG_UNION_ENUM, TAG_UNION_IDENTITYREF,
};
pub use yang::{load_yang_module, parse_yang_module, Statement};

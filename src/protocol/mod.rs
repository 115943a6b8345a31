//! The UDP request/response wire protocol spoken by Xinu backend servers.
//!
//! This module is pure: no sockets, no clocks, just byte-exact
//! encode/decode. See [`codec`] for the functions themselves.

mod codec;
mod error;
mod types;

pub use codec::{
    decode_list_response, decode_session_response, encode_list_response, encode_request,
    read_c_string, RequestKind, REQUEST_SIZE, RESPONSE_HEADER_SIZE,
};
pub use error::{DecodeError, EncodingError};
pub use types::{BackendRecord, Holder};

/// UDP port the backend servers listen on.
pub const BACKEND_PORT: u16 = 2025;

//! Byte-exact encode/decode for the UDP request/response protocol.
//!
//! The offsets here are a fixed contract with the remote backend server and
//! cannot be renegotiated, so this module is a pure transform with no I/O:
//! every function takes bytes in, gives structured values (or bytes) out.

use std::str;

use super::error::{DecodeError, EncodingError};
use super::types::{BackendRecord, Holder};

/// Total size of a request datagram.
pub const REQUEST_SIZE: usize = 50;

/// Minimum size of a response datagram (header with zero trailer records).
pub const RESPONSE_HEADER_SIZE: usize = 76;

const FIELD_WIDTH: usize = 16;
const USER_OFFSET: usize = 2;
const SERVER_OFFSET: usize = 18;
const CLASS_OFFSET: usize = 34;

const NAME_OFFSET: usize = 2;
const NAME_WIDTH: usize = 63;
const COUNT_OFFSET: usize = 66;
const COUNT_WIDTH: usize = 9;
const TRAILER_OFFSET: usize = 76;

/// The two request commands the backend server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Enumerate backends known to this server.
    List,
    /// Request an ephemeral TCP port for a named service.
    Connect,
}

impl RequestKind {
    fn command_byte(self) -> u8 {
        match self {
            RequestKind::List => 0x04,
            RequestKind::Connect => 0x09,
        }
    }
}

fn write_field(buf: &mut [u8; REQUEST_SIZE], offset: usize, value: &str) -> Result<(), EncodingError> {
    let bytes = value.as_bytes();
    if bytes.len() > FIELD_WIDTH {
        return Err(EncodingError::FieldTooLong);
    }

    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Encodes a 50-byte request datagram. Each of `user`, `server`, and `class`
/// must be at most 16 bytes of UTF-8, left-justified and null-padded into
/// its slot.
pub fn encode_request(
    kind: RequestKind,
    user: &str,
    server: &str,
    class: &str,
) -> Result<[u8; REQUEST_SIZE], EncodingError> {
    let mut buf = [0u8; REQUEST_SIZE];
    buf[0] = b'C';
    buf[1] = kind.command_byte();

    write_field(&mut buf, USER_OFFSET, user)?;
    write_field(&mut buf, SERVER_OFFSET, server)?;
    write_field(&mut buf, CLASS_OFFSET, class)?;

    Ok(buf)
}

/// Scans forward from `offset` for the first NUL byte, returning the
/// preceding bytes decoded as UTF-8 and the total number of bytes consumed
/// (including the terminator, if any). Running out of buffer before finding
/// a NUL is not an error: the remaining bytes are returned as-is, with the
/// advance equal to however much buffer was left.
pub fn read_c_string(bytes: &[u8], offset: usize) -> Result<(String, usize), DecodeError> {
    let rest = bytes.get(offset..).ok_or(DecodeError::Truncated)?;
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());

    let text = str::from_utf8(&rest[..end]).map_err(|_| DecodeError::Truncated)?.to_owned();

    Ok((text, end + usize::from(end < rest.len())))
}

fn strip_nuls(bytes: &[u8]) -> Result<String, DecodeError> {
    let filtered: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
    str::from_utf8(&filtered)
        .map(str::to_owned)
        .map_err(|_| DecodeError::Truncated)
}

/// Parses a LIST response into the server's name and its backend records.
pub fn decode_list_response(bytes: &[u8]) -> Result<(String, Vec<BackendRecord>), DecodeError> {
    if bytes.len() < RESPONSE_HEADER_SIZE {
        return Err(DecodeError::BadSize);
    }
    if bytes[0] != b'C' {
        return Err(DecodeError::BadVersion);
    }

    let server_name = strip_nuls(&bytes[NAME_OFFSET..NAME_OFFSET + NAME_WIDTH])?;

    let count_field = &bytes[COUNT_OFFSET..COUNT_OFFSET + COUNT_WIDTH];
    let count_text: String = count_field
        .iter()
        .copied()
        .filter(|&b| b != 0)
        .map(|b| b as char)
        .collect();
    let count: usize = count_text
        .trim()
        .parse()
        .map_err(|_| DecodeError::BadCount)?;

    let mut records = Vec::with_capacity(count);
    let mut cursor = TRAILER_OFFSET;

    for _ in 0..count {
        let (name, advance) = read_c_string(bytes, cursor)?;
        cursor += advance;

        let (kind, advance) = read_c_string(bytes, cursor)?;
        cursor += advance;

        let sentinel = *bytes.get(cursor).ok_or(DecodeError::Truncated)?;
        cursor += 1;

        let holder = if sentinel == 0 {
            None
        } else {
            let (user, advance) = read_c_string(bytes, cursor)?;
            cursor += advance;

            let (since, advance) = read_c_string(bytes, cursor)?;
            cursor += advance;

            Some(Holder { user, since })
        };

        records.push(BackendRecord { name, kind, holder });
    }

    if records.len() != count {
        return Err(DecodeError::Truncated);
    }

    Ok((server_name, records))
}

/// Parses a CONNECT response, returning the allocated TCP port.
pub fn decode_session_response(bytes: &[u8]) -> Result<u16, DecodeError> {
    if bytes.is_empty() || bytes[0] != b'C' {
        return Err(DecodeError::BadVersion);
    }

    let payload = bytes.get(TRAILER_OFFSET..).unwrap_or(&[]);
    let text = str::from_utf8(payload).map_err(|_| DecodeError::BadPort)?;
    let token = text.split_whitespace().next().ok_or(DecodeError::BadPort)?;

    let port: u32 = token.parse().map_err(|_| DecodeError::BadPort)?;
    if port == 0 || port > u16::MAX as u32 {
        return Err(DecodeError::BadPort);
    }

    Ok(port as u16)
}

/// Encodes a LIST response for a server name and its backend records.
///
/// This is the inverse of [`decode_list_response`], used by property tests
/// and by any future server-side tooling that speaks this protocol.
pub fn encode_list_response(server_name: &str, records: &[BackendRecord]) -> Vec<u8> {
    let mut buf = vec![0u8; RESPONSE_HEADER_SIZE];
    buf[0] = b'C';

    let name_bytes = server_name.as_bytes();
    let name_len = name_bytes.len().min(NAME_WIDTH);
    buf[NAME_OFFSET..NAME_OFFSET + name_len].copy_from_slice(&name_bytes[..name_len]);

    let count_text = records.len().to_string();
    let count_bytes = count_text.as_bytes();
    buf[COUNT_OFFSET..COUNT_OFFSET + count_bytes.len()].copy_from_slice(count_bytes);

    for record in records {
        buf.extend_from_slice(record.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(record.kind.as_bytes());
        buf.push(0);

        match &record.holder {
            None => buf.push(0),
            Some(holder) => {
                buf.push(1);
                buf.extend_from_slice(holder.user.as_bytes());
                buf.push(0);
                buf.extend_from_slice(holder.since.as_bytes());
                buf.push(0);
            }
        }
    }

    buf
}

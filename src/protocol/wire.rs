//! Wire format
//!
//! Every datagram starts with a one-byte tag. All integers are little-endian.
//!
//! | Request                                       | Response                               |
//! |-----------------------------------------------|----------------------------------------|
//! | `'L'`                                         | `'L', nameLen(1), name, size(4)`       |
//! | `'G', nameLen(1), name, start(4), end(4)`     | `'G', start(4), end(4), content slice` |

use super::errors::ProtocolError;

/// Size of the fixed receive and send buffers
pub const MAX_DATAGRAM_SIZE: usize = 2500;

pub const TAG_LIST_LATEST: u8 = b'L';
pub const TAG_GET_RANGE: u8 = b'G';

/// Tag plus the echoed start/end pair
pub const RANGE_HEADER_LEN: usize = 9;

/// Largest content slice a single Get-range response can carry
pub const MAX_RANGE_PAYLOAD: usize = MAX_DATAGRAM_SIZE - RANGE_HEADER_LEN;

/// Requests sent by clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask for the most recent advertised file
    ListLatest,
    /// Ask for bytes `[start, end)` of a file
    GetRange { name: String, start: u32, end: u32 },
}

/// Responses sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Latest { name: String, size: u32 },
    Range { start: u32, end: u32, data: Vec<u8> },
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn name_len(name: &str) -> Result<u8, ProtocolError> {
    u8::try_from(name.len()).map_err(|_| ProtocolError::NameTooLong(name.len()))
}

fn check_size(buf: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge(buf.len()));
    }
    Ok(buf)
}

/// Parse a request datagram
///
/// Bytes after a complete Get-range request are ignored.
pub fn parse_request(data: &[u8]) -> Result<Request, ProtocolError> {
    let (&tag, rest) = data.split_first().ok_or(ProtocolError::Empty)?;
    match tag {
        TAG_LIST_LATEST => Ok(Request::ListLatest),
        TAG_GET_RANGE => {
            ProtocolError::check_len(2, data.len())?;
            let len = rest[0] as usize;
            ProtocolError::check_len(2 + len + 8, data.len())?;

            let name = std::str::from_utf8(&data[2..2 + len])
                .map_err(|_| ProtocolError::InvalidName)?
                .to_string();
            let start = read_u32(data, 2 + len);
            let end = read_u32(data, 6 + len);
            Ok(Request::GetRange { name, start, end })
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

/// Serialize a request datagram
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    match request {
        Request::ListLatest => Ok(vec![TAG_LIST_LATEST]),
        Request::GetRange { name, start, end } => {
            let len = name_len(name)?;
            let mut buf = Vec::with_capacity(2 + name.len() + 8);
            buf.push(TAG_GET_RANGE);
            buf.push(len);
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&end.to_le_bytes());
            check_size(buf)
        }
    }
}

/// Serialize a List-latest response
pub fn encode_latest(name: &str, size: u32) -> Result<Vec<u8>, ProtocolError> {
    let len = name_len(name)?;
    let mut buf = Vec::with_capacity(2 + name.len() + 4);
    buf.push(TAG_LIST_LATEST);
    buf.push(len);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    check_size(buf)
}

/// Serialize a Get-range response carrying `data`
pub fn encode_range(start: u32, end: u32, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = RANGE_HEADER_LEN + data.len();
    if total > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(TAG_GET_RANGE);
    buf.extend_from_slice(&start.to_le_bytes());
    buf.extend_from_slice(&end.to_le_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Parse a response datagram
pub fn parse_response(data: &[u8]) -> Result<Response, ProtocolError> {
    let (&tag, rest) = data.split_first().ok_or(ProtocolError::Empty)?;
    match tag {
        TAG_LIST_LATEST => {
            ProtocolError::check_len(2, data.len())?;
            let len = rest[0] as usize;
            ProtocolError::check_len(2 + len + 4, data.len())?;

            let name = std::str::from_utf8(&data[2..2 + len])
                .map_err(|_| ProtocolError::InvalidName)?
                .to_string();
            let size = read_u32(data, 2 + len);
            Ok(Response::Latest { name, size })
        }
        TAG_GET_RANGE => {
            ProtocolError::check_len(RANGE_HEADER_LEN, data.len())?;
            Ok(Response::Range {
                start: read_u32(data, 1),
                end: read_u32(data, 5),
                data: data[RANGE_HEADER_LEN..].to_vec(),
            })
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_request(name: &str, start: u32, end: u32) -> Vec<u8> {
        encode_request(&Request::GetRange {
            name: name.to_string(),
            start,
            end,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_list_latest() {
        assert_eq!(parse_request(b"L").unwrap(), Request::ListLatest);
        // Trailing bytes do not matter for List-latest
        assert_eq!(parse_request(b"Lxyz").unwrap(), Request::ListLatest);
    }

    #[test]
    fn test_parse_get_range() {
        let mut data = vec![b'G', 5];
        data.extend_from_slice(b"a.jpg");
        data.extend_from_slice(&[10, 0, 0, 0, 0, 1, 0, 0]);

        let request = parse_request(&data).unwrap();
        assert_eq!(
            request,
            Request::GetRange {
                name: "a.jpg".to_string(),
                start: 10,
                end: 256,
            }
        );
        assert_eq!(data.len(), 10 + 5);
    }

    #[test]
    fn test_encode_get_range_layout() {
        let data = get_request("b.jpg", 1, 0x0102_0304);
        assert_eq!(data[0], b'G');
        assert_eq!(data[1], 5);
        assert_eq!(&data[2..7], b"b.jpg");
        assert_eq!(&data[7..11], &[1, 0, 0, 0]);
        assert_eq!(&data[11..15], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_request(&[]), Err(ProtocolError::Empty));
        assert_eq!(parse_request(b"X"), Err(ProtocolError::UnknownTag(b'X')));
        assert_eq!(
            parse_request(b"G"),
            Err(ProtocolError::Truncated { needed: 2, got: 1 })
        );

        let data = get_request("a.jpg", 0, 4);
        assert_eq!(
            parse_request(&data[..data.len() - 1]),
            Err(ProtocolError::Truncated {
                needed: 15,
                got: 14
            })
        );

        let mut bad_name = vec![b'G', 2, 0xff, 0xfe];
        bad_name.extend_from_slice(&[0; 8]);
        assert_eq!(parse_request(&bad_name), Err(ProtocolError::InvalidName));
    }

    #[test]
    fn test_encode_latest_layout() {
        let data = encode_latest("a.jpg", 100).unwrap();
        assert_eq!(data, vec![b'L', 5, b'a', b'.', b'j', b'p', b'g', 100, 0, 0, 0]);
        assert_eq!(
            parse_response(&data).unwrap(),
            Response::Latest {
                name: "a.jpg".to_string(),
                size: 100,
            }
        );
    }

    #[test]
    fn test_encode_range_layout() {
        let data = encode_range(2, 5, &[7, 8, 9]).unwrap();
        assert_eq!(data, vec![b'G', 2, 0, 0, 0, 5, 0, 0, 0, 7, 8, 9]);
    }

    #[test]
    fn test_encode_range_size_limit() {
        let payload = vec![0u8; MAX_RANGE_PAYLOAD];
        assert_eq!(
            encode_range(0, MAX_RANGE_PAYLOAD as u32, &payload)
                .unwrap()
                .len(),
            MAX_DATAGRAM_SIZE
        );

        let payload = vec![0u8; MAX_RANGE_PAYLOAD + 1];
        assert_eq!(
            encode_range(0, payload.len() as u32, &payload),
            Err(ProtocolError::TooLarge(MAX_DATAGRAM_SIZE + 1))
        );
    }

    #[test]
    fn test_name_too_long() {
        let name = "a".repeat(256);
        assert_eq!(encode_latest(&name, 1), Err(ProtocolError::NameTooLong(256)));
    }

    #[test]
    fn test_parse_response_truncated() {
        assert_eq!(
            parse_response(&[b'L', 5, b'a']),
            Err(ProtocolError::Truncated { needed: 11, got: 3 })
        );
        assert_eq!(
            parse_response(&[b'G', 0, 0]),
            Err(ProtocolError::Truncated { needed: 9, got: 3 })
        );
    }
}

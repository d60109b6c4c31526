/// Message framing for the header protocol.
///
/// Every message is a 24-byte header followed by its payload:
/// `magic [4] | command [12], NUL padded | length u32 LE | checksum [4]`,
/// where the checksum is the first four bytes of sha256d(payload).
use containers::{sha256d, BlockHeader, Bytes32, DecodeError, HEADER_SIZE};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::OutboundRequest;

pub const MESSAGE_HEADER_SIZE: usize = 24;
pub const COMMAND_SIZE: usize = 12;
pub const CHECKSUM_SIZE: usize = 4;
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;
pub const MAX_LOCATOR_SIZE: usize = 101;
pub const PROTOCOL_VERSION: u32 = 1;

pub const GETHEADERS_COMMAND: &str = "getheaders";
pub const HEADERS_COMMAND: &str = "headers";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected network magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("payload of {0} bytes exceeds the message size limit")]
    Oversized(usize),
    #[error("malformed command name")]
    BadCommand,
    #[error("checksum mismatch on {0} message")]
    BadChecksum(String),
    #[error("malformed {command} payload: {reason}")]
    Malformed {
        command: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    Header(#[from] DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    GetHeaders {
        version: u32,
        locator: Vec<Bytes32>,
        stop: Bytes32,
    },
    Headers(Vec<BlockHeader>),
    /// Anything this node does not speak; read and ignored.
    Other { command: String, payload: Vec<u8> },
}

impl From<OutboundRequest> for Message {
    fn from(request: OutboundRequest) -> Self {
        match request {
            OutboundRequest::GetHeaders { locator, stop } => Message::GetHeaders {
                version: PROTOCOL_VERSION,
                locator,
                stop,
            },
            OutboundRequest::Headers(headers) => Message::Headers(headers),
        }
    }
}

impl Message {
    pub fn command(&self) -> &str {
        match self {
            Message::GetHeaders { .. } => GETHEADERS_COMMAND,
            Message::Headers(_) => HEADERS_COMMAND,
            Message::Other { command, .. } => command,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::GetHeaders {
                version,
                locator,
                stop,
            } => {
                let mut payload = Vec::with_capacity(4 + 9 + 32 * (locator.len() + 1));
                payload.extend_from_slice(&version.to_le_bytes());
                write_compact_size(&mut payload, locator.len() as u64);
                for hash in locator {
                    payload.extend_from_slice(hash.as_bytes());
                }
                payload.extend_from_slice(stop.as_bytes());
                payload
            }
            Message::Headers(headers) => {
                let mut payload = Vec::with_capacity(9 + HEADER_SIZE * headers.len());
                write_compact_size(&mut payload, headers.len() as u64);
                for header in headers {
                    payload.extend_from_slice(&header.to_bytes());
                }
                payload
            }
            Message::Other { payload, .. } => payload.clone(),
        }
    }

    pub fn decode(command: &str, payload: &[u8]) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(payload);
        let message = match command {
            GETHEADERS_COMMAND => {
                let version = reader.read_u32(GETHEADERS_COMMAND)?;
                let count = reader.read_compact_size(GETHEADERS_COMMAND)?;
                if count > MAX_LOCATOR_SIZE as u64 {
                    return Err(WireError::Malformed {
                        command: GETHEADERS_COMMAND,
                        reason: "locator too long",
                    });
                }
                let locator = (0..count)
                    .map(|_| reader.read_hash(GETHEADERS_COMMAND))
                    .collect::<Result<Vec<_>, _>>()?;
                let stop = reader.read_hash(GETHEADERS_COMMAND)?;
                reader.finish(GETHEADERS_COMMAND)?;
                Message::GetHeaders {
                    version,
                    locator,
                    stop,
                }
            }
            HEADERS_COMMAND => {
                let count = reader.read_compact_size(HEADERS_COMMAND)?;
                // The count must be backed by bytes before anything is allocated.
                if count > (reader.remaining() / HEADER_SIZE) as u64 {
                    return Err(WireError::Malformed {
                        command: HEADERS_COMMAND,
                        reason: "count exceeds payload",
                    });
                }
                let headers = (0..count)
                    .map(|_| {
                        let bytes = reader.read_bytes(HEADER_SIZE, HEADERS_COMMAND)?;
                        Ok(BlockHeader::from_bytes(bytes)?)
                    })
                    .collect::<Result<Vec<_>, WireError>>()?;
                reader.finish(HEADERS_COMMAND)?;
                Message::Headers(headers)
            }
            other => {
                return Ok(Message::Other {
                    command: other.to_string(),
                    payload: payload.to_vec(),
                });
            }
        };
        Ok(message)
    }
}

/// Frames `message` for the network identified by `magic`.
pub fn encode_frame(magic: [u8; 4], message: &Message) -> Result<Vec<u8>, WireError> {
    let command = message.command();
    if command.is_empty() || command.len() > COMMAND_SIZE || !command.is_ascii() {
        return Err(WireError::BadCommand);
    }
    let payload = message.encode_payload();
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::Oversized(payload.len()));
    }

    let mut frame = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&magic);
    let mut name = [0u8; COMMAND_SIZE];
    name[..command.len()].copy_from_slice(command.as_bytes());
    frame.extend_from_slice(&name);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&payload));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub async fn write_message<W>(writer: &mut W, magic: [u8; 4], message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(magic, message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message. Not cancel safe: a partially read frame is lost
/// if the future is dropped.
pub async fn read_message<R>(reader: &mut R, magic: [u8; 4]) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MESSAGE_HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let mut received_magic = [0u8; 4];
    received_magic.copy_from_slice(&header[..4]);
    if received_magic != magic {
        return Err(WireError::BadMagic(received_magic));
    }

    let command = parse_command(&header[4..4 + COMMAND_SIZE])?;
    let mut length = [0u8; 4];
    length.copy_from_slice(&header[16..20]);
    let length = u32::from_le_bytes(length) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(WireError::Oversized(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    if checksum(&payload)[..] != header[20..24] {
        return Err(WireError::BadChecksum(command));
    }

    Message::decode(&command, &payload)
}

fn parse_command(bytes: &[u8]) -> Result<String, WireError> {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    let (name, padding) = bytes.split_at(end);
    if name.is_empty()
        || !name.iter().all(|byte| byte.is_ascii_graphic())
        || padding.iter().any(|byte| *byte != 0)
    {
        return Err(WireError::BadCommand);
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = sha256d(payload);
    let mut checksum = [0u8; CHECKSUM_SIZE];
    checksum.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    checksum
}

pub fn write_compact_size(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn finish(&self, command: &'static str) -> Result<(), WireError> {
        if self.remaining() != 0 {
            return Err(WireError::Malformed {
                command,
                reason: "trailing bytes",
            });
        }
        Ok(())
    }

    fn read_bytes(&mut self, len: usize, command: &'static str) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Malformed {
                command,
                reason: "truncated",
            });
        }
        let bytes = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self, command: &'static str) -> Result<[u8; N], WireError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N, command)?);
        Ok(array)
    }

    fn read_u32(&mut self, command: &'static str) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.read_array(command)?))
    }

    fn read_hash(&mut self, command: &'static str) -> Result<Bytes32, WireError> {
        Ok(Bytes32::from(self.read_array::<32>(command)?))
    }

    /// Rejects non-canonical encodings.
    fn read_compact_size(&mut self, command: &'static str) -> Result<u64, WireError> {
        let non_canonical = WireError::Malformed {
            command,
            reason: "non-canonical compact size",
        };
        let [prefix] = self.read_array::<1>(command)?;
        let value = match prefix {
            0xfd => {
                let value = u64::from(u16::from_le_bytes(self.read_array(command)?));
                if value < 0xfd {
                    return Err(non_canonical);
                }
                value
            }
            0xfe => {
                let value = u64::from(u32::from_le_bytes(self.read_array(command)?));
                if value <= 0xffff {
                    return Err(non_canonical);
                }
                value
            }
            0xff => {
                let value = u64::from_le_bytes(self.read_array(command)?);
                if value <= 0xffff_ffff {
                    return Err(non_canonical);
                }
                value
            }
            small => u64::from(small),
        };
        Ok(value)
    }
}

//! Envelope header codec.
//!
//! # Wire Layout
//! ```text
//! +---------+----------+-----------+--------+---------+------+------+---------+
//! | version | identity | addon len | addons | command | port | atyp | address |
//! |    1    |    16    |     1     |   N    |    1    | 2 BE |  1   |   var   |
//! +---------+----------+-----------+--------+---------+------+------+---------+
//!
//! atyp 1 → 4 bytes IPv4
//! atyp 2 → 1 byte length + domain (UTF-8)
//! atyp 3 → 16 bytes IPv6
//! ```
//!
//! # Design Decisions
//! - Decoding is all-or-nothing: an error never carries a partial header
//! - The identity is checked before any later field is inspected
//! - IPv6 hosts are rendered as eight lower-hex groups, no zero compression

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

/// Length of the caller identity in bytes.
pub const IDENTITY_LEN: usize = 16;

pub const CMD_STREAM: u8 = 0x01;
pub const CMD_DATAGRAM: u8 = 0x02;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x02;
pub const ATYP_IPV6: u8 = 0x03;

/// The only port a datagram envelope may target.
pub const DNS_PORT: u16 = 53;

/// Status byte of the acknowledgment.
pub const STATUS_OK: u8 = 0x00;

/// Errors produced while decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("envelope truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("identity mismatch (received {received})")]
    IdentityMismatch { received: String },
    #[error("unsupported command {0}")]
    UnsupportedCommand(u8),
    #[error("unsupported address family {0}")]
    UnsupportedAddressFamily(u8),
    #[error("datagram only allowed to port 53, got {0}")]
    UnsupportedDatagramTarget(u16),
    #[error("domain is not valid utf-8")]
    InvalidDomain,
}

/// Errors produced while encoding an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("addons exceed 255 bytes")]
    AddonsTooLong,
    #[error("domain exceeds 255 bytes")]
    DomainTooLong,
}

/// Relay mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ordinary TCP-like byte stream.
    Stream,
    /// UDP payload, accepted for DNS only.
    DatagramDns,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        match self {
            Command::Stream => CMD_STREAM,
            Command::DatagramDns => CMD_DATAGRAM,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            CMD_STREAM => Ok(Command::Stream),
            CMD_DATAGRAM => Ok(Command::DatagramDns),
            other => Err(HeaderError::UnsupportedCommand(other)),
        }
    }
}

/// A dialable endpoint: hostname (or IP literal) and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Result of decoding the first frame of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    /// Echoed verbatim in the acknowledgment.
    pub version: u8,
    pub command: Command,
    pub destination: Destination,
    /// Offset of the first payload byte; everything from here on is forwarded.
    pub payload_offset: usize,
}

/// Bounds-checked reader over the first frame.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HeaderError> {
        let end = self.pos + n;
        let bytes = self.buf.get(self.pos..end).ok_or(HeaderError::Truncated {
            needed: end,
            available: self.buf.len(),
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], HeaderError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, HeaderError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, HeaderError> {
        Ok(u16::from_be_bytes(self.array::<2>()?))
    }
}

/// Decode and validate the envelope at the start of `buf`.
///
/// `expected_identity` is compared verbatim against the lowercase hyphenated
/// form of the 16 identity bytes.
pub fn decode(buf: &[u8], expected_identity: &str) -> Result<ParsedHeader, HeaderError> {
    let mut cursor = Cursor::new(buf);

    let version = cursor.u8()?;

    let identity = format_identity(cursor.array::<IDENTITY_LEN>()?);
    if identity != expected_identity {
        return Err(HeaderError::IdentityMismatch { received: identity });
    }

    // Addons are reserved; skipped unread.
    let addons_len = cursor.u8()? as usize;
    cursor.take(addons_len)?;

    let command = Command::try_from(cursor.u8()?)?;
    let port = cursor.u16()?;

    let host = match cursor.u8()? {
        ATYP_IPV4 => Ipv4Addr::from(cursor.array::<4>()?).to_string(),
        ATYP_DOMAIN => {
            let len = cursor.u8()? as usize;
            let raw = cursor.take(len)?;
            std::str::from_utf8(raw)
                .map_err(|_| HeaderError::InvalidDomain)?
                .to_owned()
        }
        ATYP_IPV6 => format_ipv6(&Ipv6Addr::from(cursor.array::<16>()?)),
        other => return Err(HeaderError::UnsupportedAddressFamily(other)),
    };

    if command == Command::DatagramDns && port != DNS_PORT {
        return Err(HeaderError::UnsupportedDatagramTarget(port));
    }

    Ok(ParsedHeader {
        version,
        command,
        destination: Destination::new(host, port),
        payload_offset: cursor.pos,
    })
}

/// The two-byte acknowledgment sent ahead of the first response chunk.
pub fn acknowledgment(version: u8) -> [u8; 2] {
    [version, STATUS_OK]
}

fn format_identity(bytes: [u8; IDENTITY_LEN]) -> String {
    Uuid::from_bytes(bytes).hyphenated().to_string()
}

fn format_ipv6(addr: &Ipv6Addr) -> String {
    addr.segments()
        .iter()
        .map(|group| format!("{:x}", group))
        .collect::<Vec<_>>()
        .join(":")
}

/// Target address as written by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    /// Classify a host string; bracketed or bare IPv6 literals are accepted.
    pub fn from_host(host: &str) -> Self {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<Ipv4Addr>() {
            Address::Ipv4(ip)
        } else if let Ok(ip) = bare.parse::<Ipv6Addr>() {
            Address::Ipv6(ip)
        } else {
            Address::Domain(host.to_string())
        }
    }
}

/// Caller-side envelope, used by the probe client and in tests.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub version: u8,
    pub identity: Uuid,
    pub addons: Vec<u8>,
    pub command: Command,
    pub port: u16,
    pub address: Address,
}

impl RequestHeader {
    /// A stream request with version 0 and no addons.
    pub fn stream(identity: Uuid, address: Address, port: u16) -> Self {
        Self {
            version: 0,
            identity,
            addons: Vec::new(),
            command: Command::Stream,
            port,
            address,
        }
    }

    /// Serialize the envelope; the caller appends any payload.
    pub fn encode(&self) -> Result<BytesMut, EncodeError> {
        let addons_len = u8::try_from(self.addons.len()).map_err(|_| EncodeError::AddonsTooLong)?;

        let mut buf = BytesMut::with_capacity(1 + IDENTITY_LEN + 1 + self.addons.len() + 4 + 17);
        buf.put_u8(self.version);
        buf.put_slice(self.identity.as_bytes());
        buf.put_u8(addons_len);
        buf.put_slice(&self.addons);
        buf.put_u8(self.command.as_byte());
        buf.put_u16(self.port);

        match &self.address {
            Address::Ipv4(ip) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&ip.octets());
            }
            Address::Domain(domain) => {
                let len = u8::try_from(domain.len()).map_err(|_| EncodeError::DomainTooLong)?;
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(len);
                buf.put_slice(domain.as_bytes());
            }
            Address::Ipv6(ip) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&ip.octets());
            }
        }

        Ok(buf)
    }
}

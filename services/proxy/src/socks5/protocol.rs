//! SOCKS5 wire format (RFC 1928), server side.
//!
//! Only what the proxy serves is modelled:
//! - method negotiation, with "no authentication required" as the only method
//! - requests for any command (non-CONNECT ones get a rejection reply)
//! - IPv4, IPv6 and domain name targets

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::{BufMut, BytesMut};
use socktun_transport::{join_host_port, TransportError};
use socktun_tunnel::DialError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::Socks5Error;

/// Protocol version byte.
pub const VERSION: u8 = 0x05;

/// "No authentication required" method.
pub const METHOD_NO_AUTH: u8 = 0x00;

/// "No acceptable methods" selection.
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Command::Connect,
            0x02 => Command::Bind,
            0x03 => Command::UdpAssociate,
            other => Command::Unknown(other),
        }
    }
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Connect => 0x01,
            Command::Bind => 0x02,
            Command::UdpAssociate => 0x03,
            Command::Unknown(code) => *code,
        }
    }
}

/// Destination of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IPv4 or IPv6 address.
    Ip(SocketAddr),
    /// Domain name, resolved remotely unless configured otherwise.
    Domain(String, u16),
}

impl TargetAddr {
    /// `host:port` form accepted by the dialer.
    pub fn to_address(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.to_string(),
            TargetAddr::Domain(host, port) => join_host_port(host, *port),
        }
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub target: TargetAddr,
}

/// Reply field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl From<&DialError> for ReplyCode {
    fn from(err: &DialError) -> Self {
        match err.transport_error() {
            Some(TransportError::ConnectionRefused(_)) => ReplyCode::ConnectionRefused,
            Some(TransportError::HostUnreachable(_)) | Some(TransportError::ConnectFailed(_)) => {
                ReplyCode::HostUnreachable
            }
            Some(TransportError::NetworkUnreachable(_)) => ReplyCode::NetworkUnreachable,
            Some(TransportError::Prohibited(_)) => ReplyCode::NotAllowed,
            Some(TransportError::TimedOut) => ReplyCode::TtlExpired,
            Some(TransportError::UnsupportedNetwork(_)) => ReplyCode::CommandNotSupported,
            Some(TransportError::InvalidAddress(_)) => ReplyCode::AddressTypeNotSupported,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

/// Read the client greeting and return the offered methods.
pub async fn read_greeting<R>(reader: &mut R) -> Result<Vec<u8>, Socks5Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(Socks5Error::UnsupportedVersion(header[0]));
    }

    let mut methods = vec![0u8; header[1] as usize];
    reader.read_exact(&mut methods).await?;
    Ok(methods)
}

/// Send the method selection.
pub async fn write_method<W>(writer: &mut W, method: u8) -> Result<(), Socks5Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[VERSION, method]).await?;
    Ok(())
}

/// Read a request.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, Socks5Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(Socks5Error::UnsupportedVersion(header[0]));
    }
    let command = Command::from(header[1]);

    let target = match header[3] {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            reader.read_exact(&mut buf).await?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            TargetAddr::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            reader.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            let ip = Ipv6Addr::from(octets);
            TargetAddr::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)))
        }
        ATYP_DOMAIN => {
            let len = reader.read_u8().await? as usize;
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf).await?;
            let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
            buf.truncate(len);
            let host = String::from_utf8(buf).map_err(|_| Socks5Error::InvalidDomain)?;
            if host.is_empty() {
                return Err(Socks5Error::InvalidDomain);
            }
            TargetAddr::Domain(host, port)
        }
        other => return Err(Socks5Error::UnsupportedAddressType(other)),
    };

    Ok(Request { command, target })
}

/// Encode a reply. The bound address is always reported as `0.0.0.0:0`;
/// the real one lives on the far side of the tunnel.
pub fn encode_reply(code: ReplyCode) -> BytesMut {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(VERSION);
    buf.put_u8(code as u8);
    buf.put_u8(0x00);
    buf.put_u8(ATYP_IPV4);
    buf.put_slice(&Ipv4Addr::UNSPECIFIED.octets());
    buf.put_u16(0);
    buf
}

/// Send a reply.
pub async fn write_reply<W>(writer: &mut W, code: ReplyCode) -> Result<(), Socks5Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_reply(code)).await?;
    Ok(())
}

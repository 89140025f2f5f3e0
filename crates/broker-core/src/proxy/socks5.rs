//! SOCKS5 client handshake (RFC 1928, with RFC 1929 username/password auth).
//!
//! Host names are sent as domain addresses so the proxy performs the DNS
//! lookup. Only IP literals are sent as IPv4/IPv6 addresses.

use std::io;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use zeroize::Zeroize;

// SOCKS5 protocol constants
pub const SOCKS5_VERSION: u8 = 0x05;
pub const SOCKS5_AUTH_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_PASSWORD: u8 = 0x02;
pub const SOCKS5_AUTH_NO_ACCEPTABLE: u8 = 0xFF;
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;
pub const SOCKS5_ATYP_IPV4: u8 = 0x01;
pub const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
pub const SOCKS5_ATYP_IPV6: u8 = 0x04;
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;

/// Version byte of the username/password sub-negotiation
const PASSWORD_AUTH_VERSION: u8 = 0x01;

fn protocol_error(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Human-readable text for a SOCKS5 reply code
fn reply_error(code: u8) -> io::Error {
    let (kind, text) = match code {
        0x01 => (io::ErrorKind::Other, "general SOCKS server failure"),
        0x02 => (io::ErrorKind::PermissionDenied, "connection not allowed by ruleset"),
        0x03 => (io::ErrorKind::Other, "network unreachable"),
        0x04 => (io::ErrorKind::Other, "host unreachable"),
        0x05 => (io::ErrorKind::ConnectionRefused, "connection refused"),
        0x06 => (io::ErrorKind::TimedOut, "TTL expired"),
        0x07 => (io::ErrorKind::Unsupported, "command not supported"),
        0x08 => (io::ErrorKind::Unsupported, "address type not supported"),
        _ => (io::ErrorKind::Other, "unknown reply code"),
    };
    io::Error::new(kind, format!("SOCKS5 proxy: {} (0x{:02x})", text, code))
}

/// SOCKS5 client handshake, generic over any async stream.
pub struct Socks5Client<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Socks5Client<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Run the whole handshake and return the tunneled stream.
    pub async fn handshake(
        mut self,
        credentials: Option<(&str, &str)>,
        host: &str,
        port: u16,
    ) -> io::Result<S> {
        self.negotiate_auth(credentials).await?;
        self.connect(host, port).await?;
        Ok(self.stream)
    }

    /// Step 1: Offer authentication methods and authenticate if asked to.
    pub async fn negotiate_auth(&mut self, credentials: Option<(&str, &str)>) -> io::Result<()> {
        let greeting: &[u8] = if credentials.is_some() {
            &[SOCKS5_VERSION, 2, SOCKS5_AUTH_NONE, SOCKS5_AUTH_PASSWORD]
        } else {
            &[SOCKS5_VERSION, 1, SOCKS5_AUTH_NONE]
        };
        self.stream.write_all(greeting).await?;

        let mut reply = [0u8; 2];
        self.stream.read_exact(&mut reply).await?;

        if reply[0] != SOCKS5_VERSION {
            return Err(protocol_error(format!(
                "SOCKS5 proxy answered with version {}",
                reply[0]
            )));
        }

        match (reply[1], credentials) {
            (SOCKS5_AUTH_NONE, _) => Ok(()),
            (SOCKS5_AUTH_PASSWORD, Some((username, password))) => {
                self.authenticate(username, password).await
            }
            (SOCKS5_AUTH_PASSWORD, None) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "SOCKS5 proxy requires username/password authentication",
            )),
            (SOCKS5_AUTH_NO_ACCEPTABLE, _) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "SOCKS5 proxy accepted none of the offered authentication methods",
            )),
            (method, _) => Err(protocol_error(format!(
                "SOCKS5 proxy selected unoffered method 0x{:02x}",
                method
            ))),
        }
    }

    /// RFC 1929 username/password sub-negotiation.
    async fn authenticate(&mut self, username: &str, password: &str) -> io::Result<()> {
        let (user, pass) = (username.as_bytes(), password.as_bytes());
        if user.is_empty() || user.len() > 255 || pass.is_empty() || pass.len() > 255 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "SOCKS5 username and password must be 1-255 bytes",
            ));
        }

        let mut request = Vec::with_capacity(3 + user.len() + pass.len());
        request.push(PASSWORD_AUTH_VERSION);
        request.push(user.len() as u8);
        request.extend_from_slice(user);
        request.push(pass.len() as u8);
        request.extend_from_slice(pass);

        let written = self.stream.write_all(&request).await;
        request.zeroize();
        written?;

        let mut reply = [0u8; 2];
        self.stream.read_exact(&mut reply).await?;

        if reply[1] != 0x00 {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("SOCKS5 proxy rejected credentials (status 0x{:02x})", reply[1]),
            ));
        }

        debug!("Authenticated to SOCKS5 proxy as {}", username);
        Ok(())
    }

    /// Step 2: Ask the proxy to connect to `host:port` and read its reply.
    pub async fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let mut request = vec![SOCKS5_VERSION, SOCKS5_CMD_CONNECT, 0x00];

        match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                request.push(SOCKS5_ATYP_IPV4);
                request.extend_from_slice(&ip.octets());
            }
            Ok(IpAddr::V6(ip)) => {
                request.push(SOCKS5_ATYP_IPV6);
                request.extend_from_slice(&ip.octets());
            }
            Err(_) => {
                if host.is_empty() || host.len() > 255 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("host name length {} not encodable in SOCKS5", host.len()),
                    ));
                }
                request.push(SOCKS5_ATYP_DOMAIN);
                request.push(host.len() as u8);
                request.extend_from_slice(host.as_bytes());
            }
        }
        request.extend_from_slice(&port.to_be_bytes());

        self.stream.write_all(&request).await?;

        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await?;

        let version = header[0];
        let reply = header[1];
        let addr_type = header[3];

        if version != SOCKS5_VERSION {
            return Err(protocol_error(format!(
                "SOCKS5 proxy replied with version {}",
                version
            )));
        }
        if reply != SOCKS5_REPLY_SUCCEEDED {
            return Err(reply_error(reply));
        }

        // Skip the bound address and port
        let remaining = match addr_type {
            SOCKS5_ATYP_IPV4 => 4 + 2,
            SOCKS5_ATYP_IPV6 => 16 + 2,
            SOCKS5_ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                self.stream.read_exact(&mut len).await?;
                len[0] as usize + 2
            }
            other => {
                return Err(protocol_error(format!(
                    "SOCKS5 proxy replied with address type {}",
                    other
                )))
            }
        };
        let mut bound = vec![0u8; remaining];
        self.stream.read_exact(&mut bound).await?;

        debug!("SOCKS5 tunnel established to {}:{}", host, port);
        Ok(())
    }
}

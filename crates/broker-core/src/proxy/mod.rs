//! Optional SOCKS5 tunneling for cluster and control-plane traffic
//!
//! This module provides:
//! - `ProxyConfig`: proxy address and optional credentials
//! - `Socks5Client<S>`: SOCKS5 client handshake over any async stream
//! - `Socks5Dialer` and the `CancelAware` adapter handed to database drivers

mod config;
mod dialer;
mod socks5;

pub use config::ProxyConfig;
pub use dialer::{CancelAware, ContextDialer, Dialer, Socks5Dialer};
pub use socks5::{
    Socks5Client, SOCKS5_ATYP_DOMAIN, SOCKS5_ATYP_IPV4, SOCKS5_ATYP_IPV6, SOCKS5_AUTH_NONE,
    SOCKS5_AUTH_PASSWORD, SOCKS5_CMD_CONNECT, SOCKS5_VERSION,
};

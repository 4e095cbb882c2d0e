//! socktun proxy service.
//!
//! - [`socks5`]: the SOCKS5 front-end, generic over any dialer
//! - [`config`]: command line and environment configuration

pub mod config;
pub mod socks5;

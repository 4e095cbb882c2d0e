//! SOCKS5 front-end.
//!
//! Accepts local clients and forwards each CONNECT through a [`Dial`]
//! implementation. Authentication, BIND and UDP ASSOCIATE are not served.
//!
//! [`Dial`]: socktun_tunnel::Dial

mod error;
mod listener;
mod protocol;
mod relay;

pub use error::Socks5Error;
pub use listener::{ListenerConfig, ListenerStats, Socks5Listener, DEFAULT_MAX_CONNECTIONS};
pub use protocol::{encode_reply, Command, ReplyCode, Request, TargetAddr};
pub use relay::{relay, RelayStats};

//! Transport to the detection service.
//!
//! - `endpoint`: `ws(s)://host:port/ws` resolution and the derived API base.
//! - `ws`: the `Connector`/`Link` seam and the tungstenite implementation.
//! - `session`: connection state machine, backoff and the single-flight gate.

pub mod endpoint;
pub mod session;
pub mod ws;

pub use endpoint::{scheme_is_secure, WsEndpoint};
pub use session::{
    ConnectionState, ReconnectPolicy, SendOutcome, SessionEvent, TransportSession,
};
pub use ws::{Connector, Link, LinkEvent, LinkEventKind, WsConnector, WsLink};

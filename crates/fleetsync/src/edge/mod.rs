//! Edge-aware transport: reaches an environment over direct HTTP or over
//! the agent's outbound tunnel, under an explicit deadline.

pub mod dispatch;
pub mod error;
pub mod tunnel;

pub use dispatch::{DispatchRequest, DispatchResponse, EdgeDispatcher};
pub use error::{Result, TransportError};
pub use tunnel::{TunnelEnvelope, TunnelHandle, TunnelHub, TunnelRegistry, TunnelRequest, TunnelResponse};

//! Gateway session management.
//!
//! One [`GatewaySession`] owns one websocket and one heartbeat clock. The
//! client runs two concurrently (user and bot identity); both publish the
//! message events they receive into the shared observer.

mod payload;
mod session;

pub use payload::{
    DeletedMessage, GatewayEvent, GatewayPayload, Opcode, Ready, DEFAULT_GATEWAY_URL, INTENTS,
};
pub use session::{GatewayHandle, GatewaySession, SessionConfig, SessionState};

//! Gateway wire protocol payloads.
//!
//! JSON frames carry `op` (opcode), `d` (payload), `s` (sequence) and `t`
//! (dispatch event name). Dispatch payloads decode into the tagged
//! [`GatewayEvent`]; unknown opcodes and event names are logged and
//! dropped rather than guessed at.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, GatewayErrorKind};
use crate::model::Message;
use crate::snowflake::Snowflake;

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Intents mask: GUILDS | GUILD_MESSAGES.
pub const INTENTS: u64 = 513;

/// Gateway opcodes this client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Server event dispatch
    Dispatch,
    /// Heartbeat (either direction)
    Heartbeat,
    /// Client identification
    Identify,
    /// Session resumption
    Resume,
    /// Server requests reconnect
    Reconnect,
    /// Server invalidated the session
    InvalidSession,
    /// Server hello with heartbeat interval
    Hello,
    /// Server acknowledged a heartbeat
    HeartbeatAck,
}

impl Opcode {
    /// Decode a numeric opcode; `None` for codes this client ignores.
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// A raw gateway frame.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayload {
    /// Numeric opcode
    pub op: u8,
    /// Opcode-specific payload
    #[serde(default)]
    pub d: Value,
    /// Sequence number, present on dispatches
    #[serde(default)]
    pub s: Option<u64>,
    /// Dispatch event name
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text)
            .map_err(|e| GatewayError::new(GatewayErrorKind::Decode(e.to_string())))
    }
}

/// HELLO payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Interval at which the client must heartbeat, in milliseconds
    pub heartbeat_interval: u64,
}

/// READY payload fields this client records.
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    /// Opaque session id required on interaction requests
    pub session_id: String,
    /// URL to resume on, when the server advertises one
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// MESSAGE_DELETE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedMessage {
    /// Id of the deleted message
    pub id: Snowflake,
    /// Channel it was deleted from
    pub channel_id: Snowflake,
}

/// Decoded dispatch events.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A new message appeared
    MessageCreate(Message),
    /// A message was edited
    MessageUpdate(Message),
    /// A message was deleted
    MessageDelete(DeletedMessage),
    /// Session became ready
    Ready(Ready),
    /// Session resumed successfully
    Resumed,
}

impl GatewayEvent {
    /// Decode a dispatch by event name. Unknown names return `Ok(None)`
    /// and are dropped by the caller.
    pub fn decode(t: &str, d: Value) -> Result<Option<Self>, GatewayError> {
        let event = match t {
            "MESSAGE_CREATE" => Some(Self::MessageCreate(decode(d)?)),
            "MESSAGE_UPDATE" => Some(Self::MessageUpdate(decode(d)?)),
            "MESSAGE_DELETE" => Some(Self::MessageDelete(decode(d)?)),
            "READY" => Some(Self::Ready(decode(d)?)),
            "RESUMED" => Some(Self::Resumed),
            other => {
                debug!(event = other, "Dropping unhandled dispatch event");
                None
            }
        };
        Ok(event)
    }
}

fn decode<T: serde::de::DeserializeOwned>(d: Value) -> Result<T, GatewayError> {
    serde_json::from_value(d)
        .map_err(|e| GatewayError::new(GatewayErrorKind::Decode(e.to_string())))
}

#[derive(Serialize)]
struct Outgoing<T: Serialize> {
    op: u8,
    d: T,
}

#[derive(Serialize)]
struct IdentifyProperties {
    os: &'static str,
    browser: &'static str,
    device: &'static str,
}

#[derive(Serialize)]
struct Identify<'a> {
    token: &'a str,
    intents: u64,
    properties: IdentifyProperties,
    compress: bool,
}

#[derive(Serialize)]
struct Resume<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

/// Serialize an IDENTIFY frame.
pub fn identify_frame(token: &str) -> String {
    let frame = Outgoing {
        op: 2,
        d: Identify {
            token,
            intents: INTENTS,
            properties: IdentifyProperties {
                os: std::env::consts::OS,
                browser: "vermeer",
                device: "vermeer",
            },
            compress: false,
        },
    };
    serde_json::to_string(&frame).expect("identify frame serializes")
}

/// Serialize a RESUME frame.
pub fn resume_frame(token: &str, session_id: &str, seq: u64) -> String {
    let frame = Outgoing {
        op: 6,
        d: Resume {
            token,
            session_id,
            seq,
        },
    };
    serde_json::to_string(&frame).expect("resume frame serializes")
}

/// Serialize a HEARTBEAT frame carrying the last seen sequence.
pub fn heartbeat_frame(seq: Option<u64>) -> String {
    let frame = Outgoing { op: 1, d: seq };
    serde_json::to_string(&frame).expect("heartbeat frame serializes")
}

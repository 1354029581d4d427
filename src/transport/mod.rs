//! Interaction transport.
//!
//! Slash commands and button clicks go through the provider's typed
//! interactions endpoint over HTTPS; plaintext chat commands are not a
//! supported surface and are never emitted. The [`InteractionTransport`]
//! trait is the seam tests replace with a deterministic in-memory
//! implementation.

mod interaction;

pub use interaction::{CommandOption, DiscordTransport, InteractionTransport};

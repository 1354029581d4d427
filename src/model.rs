//! Message payload types and public result types.
//!
//! The gateway and HTTP API both deliver messages as loosely-shaped JSON;
//! the types here are the explicit decoders the rest of the crate works
//! against. Unknown fields are ignored, absent fields default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::snowflake::Snowflake;

/// Application id of the Midjourney bot. The bot authors all provider
/// replies, so this doubles as the author filter.
pub const MIDJOURNEY_APPLICATION_ID: u64 = 936_929_561_302_675_456;

/// Known-good `/imagine` command version, used when command refresh fails.
pub const IMAGINE_COMMAND_VERSION: &str = "1166847114203123795";

/// Known-good `/imagine` command id, used when command refresh fails.
pub const IMAGINE_COMMAND_ID: &str = "938956540159881230";

/// A chat message as delivered by the gateway or the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message snowflake id
    pub id: Snowflake,
    /// Channel the message belongs to
    pub channel_id: Snowflake,
    /// Author, absent on some partial update payloads
    #[serde(default)]
    pub author: Option<Author>,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// ISO timestamp as sent on the wire; ordering uses the snowflake
    #[serde(default)]
    pub timestamp: String,
    /// Image attachments
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Component rows (buttons)
    #[serde(default)]
    pub components: Vec<ComponentRow>,
    /// Message flags bitfield
    #[serde(default)]
    pub flags: Option<u64>,
    /// Reference to the message this one replies to
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
}

impl Message {
    /// Whether the message was authored by the provider bot.
    pub fn from_provider(&self) -> bool {
        self.author
            .as_ref()
            .map(|a| a.id.value() == MIDJOURNEY_APPLICATION_ID)
            .unwrap_or(false)
    }

    /// URL of the first attachment, if any.
    pub fn first_attachment_url(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.url.as_str())
    }

    /// Id of the referenced (replied-to) message, if any.
    pub fn referenced_message_id(&self) -> Option<Snowflake> {
        self.message_reference.as_ref().and_then(|r| r.message_id)
    }
}

/// Message author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    /// Author snowflake id
    pub id: Snowflake,
    /// Username
    #[serde(default)]
    pub username: String,
    /// Whether the author is a bot account
    #[serde(default)]
    pub bot: bool,
}

/// A file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// CDN URL of the attachment
    pub url: String,
    /// Original filename
    #[serde(default)]
    pub filename: String,
    /// MIME type when the API provides one
    #[serde(default)]
    pub content_type: Option<String>,
}

/// A row of interactive components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRow {
    /// Component type discriminator (1 = action row)
    #[serde(rename = "type")]
    pub component_type: u8,
    /// Components inside the row
    #[serde(default)]
    pub components: Vec<Component>,
}

/// A single interactive component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Component type discriminator (2 = button)
    #[serde(rename = "type")]
    pub component_type: u8,
    /// Button label, e.g. `U1`
    #[serde(default)]
    pub label: Option<String>,
    /// Opaque component id used when clicking
    #[serde(default)]
    pub custom_id: Option<String>,
}

/// Reference to another message (reply linkage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReference {
    /// Referenced message id
    #[serde(default)]
    pub message_id: Option<Snowflake>,
}

/// An upscale button extracted from a grid message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleButton {
    /// Grid message the button belongs to
    pub message_id: Snowflake,
    /// Component id to post back when clicking
    pub custom_id: String,
    /// Button label, `U1`..`U4`
    pub label: String,
    /// Zero-based variant index (0..=3)
    pub variant_index: u8,
}

/// Extract the upscale buttons (`U1`..`U4`) from a message.
///
/// A button qualifies when its label is `U<n>` for n in 1..=4 and its
/// component id carries the provider's upsample job marker. Returned in
/// label order regardless of row layout.
pub fn upscale_buttons(message: &Message) -> Vec<UpscaleButton> {
    let mut buttons = Vec::new();
    for row in &message.components {
        for component in &row.components {
            if component.component_type != 2 {
                continue;
            }
            let (Some(label), Some(custom_id)) = (&component.label, &component.custom_id) else {
                continue;
            };
            let Some(rest) = label.strip_prefix('U') else {
                continue;
            };
            let Ok(n) = rest.parse::<u8>() else { continue };
            if !(1..=4).contains(&n) || !custom_id.contains("MJ::JOB::upsample::") {
                continue;
            }
            buttons.push(UpscaleButton {
                message_id: message.id,
                custom_id: custom_id.clone(),
                label: label.clone(),
                variant_index: n - 1,
            });
        }
    }
    buttons.sort_by_key(|b| b.variant_index);
    buttons
}

/// Whether a message is a completed grid: an attachment plus all four
/// upscale buttons.
pub fn is_complete_grid(message: &Message) -> bool {
    !message.attachments.is_empty() && upscale_buttons(message).len() == 4
}

/// What kind of artifact a stored image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The 2×2 grid composite
    #[display("grid")]
    Grid,
    /// A single upscaled variant
    #[display("upscale")]
    Upscale,
}

/// A downloaded image plus the metadata that proves its provenance.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Raw image bytes
    pub bytes: Vec<u8>,
    /// Grid or upscale
    pub kind: ArtifactKind,
    /// Zero-based variant index for upscales
    pub variant_index: Option<u8>,
    /// The grid message this artifact belongs to
    pub grid_message_id: Snowflake,
    /// The submitted prompt
    pub prompt: String,
    /// When the artifact was produced
    pub timestamp: DateTime<Utc>,
    /// CDN URL the bytes came from
    pub source_url: String,
    /// MIME type reported by the CDN
    pub mime: String,
}

/// Result of a [`generate`](crate::MidjourneyClient::generate) call.
#[derive(Debug)]
pub struct GenerationResult {
    /// Id of the completed grid message, when generation succeeded
    pub grid_message_id: Option<Snowflake>,
    /// CDN URL of the grid image
    pub image_url: Option<String>,
    /// The prompt as submitted (flags included)
    pub prompt: String,
    /// Terminal error, when generation failed
    pub error: Option<GenerationError>,
}

impl GenerationResult {
    /// Whether generation reached a complete grid.
    pub fn ok(&self) -> bool {
        self.error.is_none() && self.grid_message_id.is_some()
    }
}

/// Per-variant result of an [`upscale_all`](crate::MidjourneyClient::upscale_all) call.
#[derive(Debug)]
pub struct UpscaleResult {
    /// Zero-based variant index (0..=3)
    pub variant_index: u8,
    /// Grid the variant belongs to
    pub grid_message_id: Snowflake,
    /// Id of the upscale reply message
    pub message_id: Option<Snowflake>,
    /// CDN URL of the upscaled image
    pub image_url: Option<String>,
    /// Per-variant error; siblings are unaffected
    pub error: Option<GenerationError>,
}

impl UpscaleResult {
    /// Whether this variant resolved with an image.
    pub fn ok(&self) -> bool {
        self.error.is_none() && self.image_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_message(labels: &[&str]) -> Message {
        let components = vec![ComponentRow {
            component_type: 1,
            components: labels
                .iter()
                .enumerate()
                .map(|(i, label)| Component {
                    component_type: 2,
                    label: Some((*label).to_string()),
                    custom_id: Some(format!("MJ::JOB::upsample::{}::abcd", i + 1)),
                })
                .collect(),
        }];
        Message {
            id: Snowflake::from(1u64),
            channel_id: Snowflake::from(2u64),
            author: None,
            content: String::new(),
            timestamp: String::new(),
            attachments: vec![Attachment {
                url: "https://cdn.discordapp.com/attachments/1/2/grid.png".into(),
                filename: "grid.png".into(),
                content_type: Some("image/png".into()),
            }],
            components,
            flags: None,
            message_reference: None,
        }
    }

    #[test]
    fn extracts_four_upscale_buttons_in_order() {
        let msg = grid_message(&["U1", "U2", "U3", "U4"]);
        let buttons = upscale_buttons(&msg);
        assert_eq!(buttons.len(), 4);
        assert_eq!(
            buttons.iter().map(|b| b.variant_index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(is_complete_grid(&msg));
    }

    #[test]
    fn ignores_non_upscale_buttons() {
        let msg = grid_message(&["U1", "V1", "Redo", "U9"]);
        let buttons = upscale_buttons(&msg);
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].label, "U1");
        assert!(!is_complete_grid(&msg));
    }

    #[test]
    fn message_decodes_with_missing_fields() {
        let json = r#"{"id": "175928847299117063", "channel_id": "12"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.content.is_empty());
        assert!(msg.attachments.is_empty());
        assert!(!msg.from_provider());
    }
}

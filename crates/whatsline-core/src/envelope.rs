//! Decoding of raw transport envelopes into an explicit tagged content model.
//!
//! The wire format is a union of dozens of optional fields used as a
//! discriminated payload. This module converts it into the closed
//! [`MessageContent`] variant set with a total classification: unrecognized
//! wire variants become `Unknown` carrying the raw payload, never an error.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ClientError, ErrorCategory},
    types::MessageKind,
};

/// Addressing triple identifying one message on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeKey {
    /// Chat the message belongs to (may be device-scoped before resolution).
    pub chat_id: String,
    /// Wire message id.
    pub id: String,
    /// Whether this client originated the message.
    pub from_me: bool,
    /// Sending participant for group/broadcast chats.
    pub participant: Option<String>,
}

/// Quote linkage carried in a context block.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotedRef {
    /// Id of the quoted message.
    pub id: String,
    /// Participant credited as the quoted message's sender.
    pub participant: Option<String>,
    /// Raw content union of the quoted message.
    pub message: Value,
}

/// Context metadata shared by most content variants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContext {
    pub quoted: Option<QuotedRef>,
    pub mentions: Vec<String>,
    pub forwarded: bool,
}

/// Common fields of the media content variants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaContent {
    pub caption: Option<String>,
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
    pub duration_secs: Option<u32>,
    pub view_once: bool,
    /// Opaque wire blob the transport needs to download the attachment.
    pub fetch_ref: Value,
}

/// Closed tagged decoding of the wire content union.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image(MediaContent),
    Video(MediaContent),
    Audio(MediaContent),
    Document(MediaContent),
    Sticker(MediaContent),
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    ContactCard {
        display_name: Option<String>,
        vcard: Option<String>,
    },
    /// Button, list, or template reply; only the display text matters here.
    InteractiveReply {
        text: String,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
    PollCreation {
        name: String,
        options: Vec<String>,
        /// Poll encryption secret from the envelope's message context.
        secret: Option<Vec<u8>>,
    },
    PollUpdate {
        creation: EnvelopeKey,
        enc_payload: Vec<u8>,
        enc_iv: Vec<u8>,
    },
    /// Edit-of-message wrapper around replacement content.
    Edit {
        target_id: String,
        inner: Box<MessageContent>,
    },
    /// Pure protocol/control payload with nothing user-visible.
    Control,
    /// Unrecognized wire variant, carried raw.
    Unknown(Value),
}

/// One raw event's message payload, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub key: EnvelopeKey,
    /// Sender's advertised display name.
    pub push_name: Option<String>,
    pub timestamp_ms: u64,
    pub content: MessageContent,
    pub context: MessageContext,
    /// Original wire payload, untouched.
    pub raw: Value,
}

impl RawEnvelope {
    /// Decode a wire message envelope.
    ///
    /// Fails only on a missing/invalid addressing key; unknown content is
    /// still decoded (as `Unknown`) so upstream protocol additions never
    /// break the pipeline.
    pub fn from_wire(value: &Value) -> Result<Self, ClientError> {
        let key = value.get("key").ok_or_else(|| {
            ClientError::new(
                ErrorCategory::Serialization,
                "envelope_missing_key",
                "wire envelope has no key block",
            )
        })?;
        let chat_id = str_field(key, "remoteJid").ok_or_else(|| {
            ClientError::new(
                ErrorCategory::Serialization,
                "envelope_missing_chat",
                "wire envelope key has no remoteJid",
            )
        })?;
        let id = str_field(key, "id").ok_or_else(|| {
            ClientError::new(
                ErrorCategory::Serialization,
                "envelope_missing_id",
                "wire envelope key has no id",
            )
        })?;

        let key = EnvelopeKey {
            chat_id,
            id,
            from_me: key.get("fromMe").and_then(Value::as_bool).unwrap_or(false),
            participant: str_field(key, "participant"),
        };

        let message = value.get("message").unwrap_or(&Value::Null);
        Ok(Self {
            key,
            push_name: str_field(value, "pushName"),
            timestamp_ms: timestamp_ms_of(value),
            content: MessageContent::from_wire(message),
            context: context_of(message),
            raw: value.clone(),
        })
    }

    /// Envelope synthesized from a bare content union, as carried by quote
    /// context blocks. No push name or timestamp exists at this level.
    pub fn synthetic(key: EnvelopeKey, message: &Value) -> Self {
        Self {
            key,
            push_name: None,
            timestamp_ms: 0,
            content: MessageContent::from_wire(message),
            context: context_of(message),
            raw: message.clone(),
        }
    }
}

/// Wire field probe order for content classification.
///
/// This ordering is a contract: the first matching field decides the
/// variant, so a payload carrying both a caption-bearing media field and a
/// plain `conversation` string classifies by whichever comes first here.
const CONTENT_FIELDS: &[&str] = &[
    "protocolMessage",
    "conversation",
    "extendedTextMessage",
    "imageMessage",
    "videoMessage",
    "audioMessage",
    "documentMessage",
    "stickerMessage",
    "locationMessage",
    "liveLocationMessage",
    "contactMessage",
    "buttonsResponseMessage",
    "listResponseMessage",
    "templateButtonReplyMessage",
    "reactionMessage",
    "pollCreationMessage",
    "pollCreationMessageV2",
    "pollCreationMessageV3",
    "pollUpdateMessage",
];

impl MessageContent {
    /// Total classification of the wire content union.
    pub fn from_wire(message: &Value) -> Self {
        let Some(obj) = message.as_object() else {
            return MessageContent::Control;
        };
        if obj.is_empty() {
            return MessageContent::Control;
        }

        for &field in CONTENT_FIELDS {
            let Some(payload) = obj.get(field) else {
                continue;
            };
            if payload.is_null() {
                continue;
            }
            return Self::decode_field(field, payload, message);
        }

        // Fields the decoder has no variant for yet.
        MessageContent::Unknown(message.clone())
    }

    fn decode_field(field: &str, payload: &Value, message: &Value) -> Self {
        match field {
            "protocolMessage" => decode_protocol(payload),
            "conversation" => match payload.as_str() {
                Some(text) => MessageContent::Text { body: text.to_owned() },
                None => MessageContent::Unknown(message.clone()),
            },
            "extendedTextMessage" => MessageContent::Text {
                body: str_field(payload, "text").unwrap_or_default(),
            },
            "imageMessage" => MessageContent::Image(decode_media(payload)),
            "videoMessage" => MessageContent::Video(decode_media(payload)),
            "audioMessage" => MessageContent::Audio(decode_media(payload)),
            "documentMessage" => MessageContent::Document(decode_media(payload)),
            "stickerMessage" => MessageContent::Sticker(decode_media(payload)),
            "locationMessage" | "liveLocationMessage" => MessageContent::Location {
                latitude: f64_field(payload, "degreesLatitude"),
                longitude: f64_field(payload, "degreesLongitude"),
                name: str_field(payload, "name"),
            },
            "contactMessage" => MessageContent::ContactCard {
                display_name: str_field(payload, "displayName"),
                vcard: str_field(payload, "vcard"),
            },
            "buttonsResponseMessage" | "templateButtonReplyMessage" => {
                MessageContent::InteractiveReply {
                    text: str_field(payload, "selectedDisplayText").unwrap_or_default(),
                }
            }
            "listResponseMessage" => MessageContent::InteractiveReply {
                text: str_field(payload, "title").unwrap_or_default(),
            },
            "reactionMessage" => MessageContent::Reaction {
                target_id: payload
                    .get("key")
                    .and_then(|key| str_field(key, "id"))
                    .unwrap_or_default(),
                emoji: str_field(payload, "text").unwrap_or_default(),
            },
            "pollCreationMessage" | "pollCreationMessageV2" | "pollCreationMessageV3" => {
                MessageContent::PollCreation {
                    name: str_field(payload, "name").unwrap_or_default(),
                    options: payload
                        .get("options")
                        .and_then(Value::as_array)
                        .map(|options| {
                            options
                                .iter()
                                .filter_map(|option| str_field(option, "optionName"))
                                .collect()
                        })
                        .unwrap_or_default(),
                    secret: message
                        .get("messageContextInfo")
                        .and_then(|info| bytes_field(info, "messageSecret")),
                }
            }
            "pollUpdateMessage" => {
                let creation = payload.get("pollCreationMessageKey");
                let vote = payload.get("vote").unwrap_or(&Value::Null);
                MessageContent::PollUpdate {
                    creation: EnvelopeKey {
                        chat_id: creation
                            .and_then(|key| str_field(key, "remoteJid"))
                            .unwrap_or_default(),
                        id: creation
                            .and_then(|key| str_field(key, "id"))
                            .unwrap_or_default(),
                        from_me: creation
                            .and_then(|key| key.get("fromMe"))
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        participant: creation.and_then(|key| str_field(key, "participant")),
                    },
                    enc_payload: bytes_field(vote, "encPayload").unwrap_or_default(),
                    enc_iv: bytes_field(vote, "encIv").unwrap_or_default(),
                }
            }
            _ => MessageContent::Unknown(message.clone()),
        }
    }

    /// Semantic kind of this content; `Edit` classifies by its replacement.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageContent::Text { .. } => MessageKind::Text,
            MessageContent::Image(_) => MessageKind::Image,
            MessageContent::Video(_) => MessageKind::Video,
            MessageContent::Audio(_) => MessageKind::Audio,
            MessageContent::Document(_) => MessageKind::Document,
            MessageContent::Sticker(_) => MessageKind::Sticker,
            MessageContent::Location { .. } => MessageKind::Location,
            MessageContent::ContactCard { .. } => MessageKind::ContactCard,
            MessageContent::InteractiveReply { .. } => MessageKind::InteractiveReply,
            MessageContent::Reaction { .. } => MessageKind::Reaction,
            MessageContent::PollCreation { .. } => MessageKind::PollCreation,
            MessageContent::PollUpdate { .. } => MessageKind::PollUpdate,
            MessageContent::Edit { inner, .. } => inner.kind(),
            MessageContent::Control | MessageContent::Unknown(_) => MessageKind::Unknown,
        }
    }
}

fn decode_protocol(payload: &Value) -> MessageContent {
    // Only the edit wrapper carries user-visible content; every other
    // protocol payload (key shares, history notifications) is control-only.
    if let Some(edited) = payload.get("editedMessage")
        && let Some(target_id) = payload.get("key").and_then(|key| str_field(key, "id"))
    {
        return MessageContent::Edit {
            target_id,
            inner: Box::new(MessageContent::from_wire(edited)),
        };
    }
    MessageContent::Control
}

fn decode_media(payload: &Value) -> MediaContent {
    MediaContent {
        caption: str_field(payload, "caption"),
        mimetype: str_field(payload, "mimetype"),
        file_name: str_field(payload, "fileName"),
        duration_secs: payload
            .get("seconds")
            .and_then(Value::as_u64)
            .map(|secs| secs as u32),
        view_once: payload
            .get("viewOnce")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        fetch_ref: payload.clone(),
    }
}

/// Extract the context block shared by content variants, probing the same
/// field order as classification.
fn context_of(message: &Value) -> MessageContext {
    let Some(obj) = message.as_object() else {
        return MessageContext::default();
    };

    let info = CONTENT_FIELDS
        .iter()
        .filter_map(|field| obj.get(*field))
        .find_map(|payload| payload.get("contextInfo"));
    let Some(info) = info else {
        return MessageContext::default();
    };

    let quoted = info.get("quotedMessage").and_then(|quoted| {
        let id = str_field(info, "stanzaId")?;
        Some(QuotedRef {
            id,
            participant: str_field(info, "participant"),
            message: quoted.clone(),
        })
    });

    MessageContext {
        quoted,
        mentions: info
            .get("mentionedJid")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        forwarded: info
            .get("isForwarded")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// Ordered body extractor chain. First non-empty match wins.
///
/// Priority: plain text, interactive reply display text, media caption,
/// contact card display name, reaction emoji, poll name, location name.
const BODY_EXTRACTORS: &[fn(&MessageContent) -> Option<String>] = &[
    extract_plain_text,
    extract_reply_text,
    extract_caption,
    extract_contact_name,
    extract_reaction_emoji,
    extract_poll_name,
    extract_location_name,
];

/// Extracted display body of a content variant, per the extractor chain.
pub fn body_text(content: &MessageContent) -> Option<String> {
    if let MessageContent::Edit { inner, .. } = content {
        return body_text(inner);
    }
    BODY_EXTRACTORS
        .iter()
        .find_map(|extract| extract(content).filter(|body| !body.is_empty()))
}

fn extract_plain_text(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Text { body } => Some(body.clone()),
        _ => None,
    }
}

fn extract_reply_text(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::InteractiveReply { text } => Some(text.clone()),
        _ => None,
    }
}

fn extract_caption(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Image(media)
        | MessageContent::Video(media)
        | MessageContent::Audio(media)
        | MessageContent::Document(media)
        | MessageContent::Sticker(media) => media.caption.clone(),
        _ => None,
    }
}

fn extract_contact_name(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::ContactCard { display_name, .. } => display_name.clone(),
        _ => None,
    }
}

fn extract_reaction_emoji(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Reaction { emoji, .. } => Some(emoji.clone()),
        _ => None,
    }
}

fn extract_poll_name(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::PollCreation { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn extract_location_name(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Location { name, .. } => name.clone(),
        _ => None,
    }
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

fn f64_field(value: &Value, field: &str) -> f64 {
    value.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Byte payloads arrive either base64-encoded strings or JSON byte arrays.
fn bytes_field(value: &Value, field: &str) -> Option<Vec<u8>> {
    match value.get(field)? {
        Value::String(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok(),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().map(|byte| byte as u8))
            .collect(),
        _ => None,
    }
}

fn timestamp_ms_of(value: &Value) -> u64 {
    let seconds = match value.get("messageTimestamp") {
        Some(Value::Number(num)) => num.as_u64().unwrap_or(0),
        Some(Value::String(text)) => text.parse().unwrap_or(0),
        _ => 0,
    };
    seconds.saturating_mul(1_000)
}

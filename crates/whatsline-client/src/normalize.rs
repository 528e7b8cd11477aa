//! Normalization of raw wire envelopes into [`CanonicalMessage`] values.

use std::{future::Future, pin::Pin, sync::Arc};

use sha2::{Digest, Sha256};
use tracing::debug;

use whatsline_core::{
    envelope::{EnvelopeKey, MediaContent, MessageContent, RawEnvelope, body_text},
    error::ClientError,
    identity::strip_device_suffix,
    store::MessageStore,
    types::{CanonicalMessage, LocationInfo, MediaInfo, PollState},
};

use crate::{
    directory::ContactDirectory,
    resolver::IdentityResolver,
    transport::{PollVoteCipher, PollVoteContext, Transport},
};

/// Quote chains deeper than this stop being synthesized; the rest of the
/// message still normalizes.
const MAX_QUOTE_DEPTH: u8 = 8;

/// Turns decoded envelopes into canonical messages.
///
/// Normalization is total for recognized envelopes: enrichment failures
/// (identity lookups, poll decryption) degrade individual fields instead of
/// dropping the message. Only control payloads normalize to `None`.
pub struct EventNormalizer {
    transport: Arc<dyn Transport>,
    resolver: Arc<IdentityResolver>,
    directory: Arc<ContactDirectory>,
    store: Arc<dyn MessageStore>,
}

impl EventNormalizer {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<IdentityResolver>,
        directory: Arc<ContactDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            transport,
            resolver,
            directory,
            store,
        }
    }

    /// Normalize one raw wire envelope.
    ///
    /// `Ok(None)` means the envelope carried nothing user-visible.
    pub async fn normalize(
        &self,
        raw: &serde_json::Value,
    ) -> Result<Option<CanonicalMessage>, ClientError> {
        let envelope = RawEnvelope::from_wire(raw)?;
        self.normalize_envelope(envelope, 0).await
    }

    fn normalize_envelope<'a>(
        &'a self,
        envelope: RawEnvelope,
        depth: u8,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CanonicalMessage>, ClientError>> + Send + 'a>>
    {
        Box::pin(async move {
            let RawEnvelope {
                key,
                push_name,
                timestamp_ms,
                content,
                context,
                raw,
            } = envelope;

            // An edit is the replacement content filed under the original id.
            let (content, message_id, edited) = match content {
                MessageContent::Control => return Ok(None),
                MessageContent::Edit { target_id, inner } => (*inner, target_id, true),
                content => (content, key.id.clone(), false),
            };
            if matches!(content, MessageContent::Control) {
                return Ok(None);
            }

            let chat_id = self.resolver.resolve(&key.chat_id).await?;
            let sender_id = self.sender_of(&key, &chat_id).await?;

            let hint = if key.from_me { None } else { push_name.as_deref() };
            self.directory.resolve(&chat_id, hint).await;

            // A mention that fails to resolve degrades to its stripped raw
            // form; only chat and sender resolution fail the envelope.
            let mut mentions = Vec::with_capacity(context.mentions.len());
            for mention in &context.mentions {
                match self.resolver.resolve(mention).await {
                    Ok(id) => mentions.push(id),
                    Err(err) => {
                        debug!(mention = %mention, error = %err, "mention left unresolved");
                        mentions.push(strip_device_suffix(mention));
                    }
                }
            }

            let quoted = match (&context.quoted, depth < MAX_QUOTE_DEPTH) {
                (Some(quoted), true) => {
                    let synthesized = RawEnvelope::synthetic(
                        EnvelopeKey {
                            chat_id: key.chat_id.clone(),
                            id: quoted.id.clone(),
                            from_me: false,
                            participant: quoted.participant.clone(),
                        },
                        &quoted.message,
                    );
                    self.normalize_envelope(synthesized, depth + 1)
                        .await?
                        .map(Box::new)
                }
                (Some(_), false) => {
                    debug!(id = %message_id, "quote chain truncated at depth limit");
                    None
                }
                (None, _) => None,
            };

            let body = body_text(&content).unwrap_or_default();
            let kind = content.kind();
            let media = media_info(&content);
            let location = match &content {
                MessageContent::Location {
                    latitude,
                    longitude,
                    name,
                } => Some(LocationInfo {
                    latitude: *latitude,
                    longitude: *longitude,
                    name: name.clone(),
                }),
                _ => None,
            };
            let poll = match &content {
                MessageContent::PollUpdate {
                    creation,
                    enc_payload,
                    enc_iv,
                } => Some(
                    self.decrypt_poll_state(&key, &sender_id, creation, enc_payload, enc_iv)
                        .await,
                ),
                _ => None,
            };

            Ok(Some(CanonicalMessage {
                id: message_id,
                chat_id,
                sender_id,
                from_me: key.from_me,
                kind,
                body,
                media,
                location,
                poll,
                quoted,
                forwarded: context.forwarded,
                mentions,
                timestamp_ms,
                edited,
                raw,
            }))
        })
    }

    /// Stable sender id for an envelope in an already-resolved chat.
    async fn sender_of(&self, key: &EnvelopeKey, chat_id: &str) -> Result<String, ClientError> {
        if key.from_me
            && let Some(own) = self.transport.own_id().await
        {
            return self.resolver.resolve(&own).await;
        }
        match &key.participant {
            Some(participant) => self.resolver.resolve(participant).await,
            None => Ok(chat_id.to_owned()),
        }
    }

    /// Best-effort poll vote decryption. Every failure path yields a
    /// degraded state; this function never errors.
    async fn decrypt_poll_state(
        &self,
        key: &EnvelopeKey,
        voter_id: &str,
        creation: &EnvelopeKey,
        enc_payload: &[u8],
        enc_iv: &[u8],
    ) -> PollState {
        let creation_chat = if creation.chat_id.is_empty() {
            key.chat_id.clone()
        } else {
            creation.chat_id.clone()
        };
        let creation_chat = match self.resolver.resolve(&creation_chat).await {
            Ok(id) => id,
            Err(err) => return PollState::degraded(format!("creation chat unresolved: {err}")),
        };

        let stored = match self.store.get(&creation_chat, &creation.id).await {
            Ok(Some(message)) => message,
            Ok(None) => return PollState::degraded("poll creation message not found"),
            Err(err) => return PollState::degraded(format!("store lookup failed: {err}")),
        };

        // The creation envelope is re-decoded from the stored raw payload;
        // the canonical record does not carry the poll secret.
        let (options, secret) = match RawEnvelope::from_wire(&stored.raw).map(|env| env.content) {
            Ok(MessageContent::PollCreation {
                options,
                secret: Some(secret),
                ..
            }) => (options, secret),
            Ok(MessageContent::PollCreation { secret: None, .. }) => {
                return PollState::degraded("poll creation carries no secret");
            }
            Ok(_) => return PollState::degraded("stored message is not a poll creation"),
            Err(err) => return PollState::degraded(format!("stored envelope invalid: {err}")),
        };

        let context = PollVoteContext {
            creation_id: creation.id.clone(),
            chat_id: creation_chat,
            creator_id: stored.sender_id.clone(),
            voter_id: voter_id.to_owned(),
            secret,
        };
        let cipher = PollVoteCipher {
            enc_payload: enc_payload.to_vec(),
            enc_iv: enc_iv.to_vec(),
        };
        let selected_hashes = match self.transport.decrypt_poll_vote(&context, &cipher).await {
            Ok(hashes) => hashes,
            Err(err) => return PollState::degraded(format!("vote decryption failed: {err}")),
        };

        // Selections are matched order-independently by option-name digest.
        let selections = options
            .into_iter()
            .filter(|option| {
                let digest = Sha256::digest(option.as_bytes());
                selected_hashes.iter().any(|hash| hash[..] == digest[..])
            })
            .collect();
        PollState {
            selections,
            voter: Some(voter_id.to_owned()),
            error: None,
        }
    }
}

fn media_info(content: &MessageContent) -> Option<MediaInfo> {
    let media: &MediaContent = match content {
        MessageContent::Image(media)
        | MessageContent::Video(media)
        | MessageContent::Audio(media)
        | MessageContent::Document(media)
        | MessageContent::Sticker(media) => media,
        _ => return None,
    };
    Some(MediaInfo {
        mimetype: media.mimetype.clone(),
        file_name: media.file_name.clone(),
        duration_secs: media.duration_secs,
        view_once: media.view_once,
        fetch_ref: media.fetch_ref.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;
    use serde_json::{Value, json};
    use whatsline_core::{
        store::MemoryStore,
        types::MessageKind,
    };

    fn pipeline(transport: Arc<MockTransport>) -> (EventNormalizer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let normalizer = EventNormalizer::new(
            transport.clone(),
            Arc::new(IdentityResolver::new(transport.clone())),
            Arc::new(ContactDirectory::new(transport)),
            store.clone(),
        );
        (normalizer, store)
    }

    fn text_envelope(chat: &str, id: &str, body: &str) -> Value {
        json!({
            "key": {"remoteJid": chat, "fromMe": false, "id": id},
            "pushName": "Alice",
            "messageTimestamp": 1_700_000_000,
            "message": {"conversation": body}
        })
    }

    #[tokio::test]
    async fn normalizes_plain_text() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&text_envelope("556899336555@s.whatsapp.net", "M1", "Olá!"))
            .await
            .expect("normalize")
            .expect("message expected");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.body, "Olá!");
        assert_eq!(message.chat_id, "556899336555@s.whatsapp.net");
        assert_eq!(message.sender_id, "556899336555@s.whatsapp.net");
        assert!(!message.from_me);
    }

    #[tokio::test]
    async fn control_payload_normalizes_to_none() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        let none = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "1@s.whatsapp.net", "id": "M1"},
                "message": {"protocolMessage": {"historySyncNotification": {}}}
            }))
            .await
            .expect("normalize");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn group_sender_is_the_resolved_participant() {
        let transport = Arc::new(MockTransport::default());
        transport.map_stable_id("42@lid", "556899336555@s.whatsapp.net");
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {
                    "remoteJid": "123@g.us",
                    "fromMe": false,
                    "id": "M1",
                    "participant": "42:7@lid"
                },
                "messageTimestamp": 1_700_000_000,
                "message": {"conversation": "hey"}
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        assert_eq!(message.chat_id, "123@g.us");
        assert_eq!(message.sender_id, "556899336555@s.whatsapp.net");
    }

    #[tokio::test]
    async fn unresolvable_mention_degrades_without_failing_the_message() {
        let transport = Arc::new(MockTransport::default());
        transport.map_stable_id("42@lid", "556899336555@s.whatsapp.net");
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "123@g.us", "fromMe": false, "id": "M1"},
                "messageTimestamp": 1_700_000_000,
                "message": {
                    "extendedTextMessage": {
                        "text": "@both",
                        "contextInfo": {
                            "mentionedJid": ["42@lid", "77:3@lid"]
                        }
                    }
                }
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        assert_eq!(
            message.mentions,
            vec!["556899336555@s.whatsapp.net".to_owned(), "77@lid".to_owned()]
        );
    }

    #[tokio::test]
    async fn own_messages_use_own_id_as_sender() {
        let transport = Arc::new(MockTransport::with_own_id("555@s.whatsapp.net", "Me"));
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "111@s.whatsapp.net", "fromMe": true, "id": "M1"},
                "messageTimestamp": 1_700_000_000,
                "message": {"conversation": "from me"}
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        assert!(message.from_me);
        assert_eq!(message.sender_id, "555@s.whatsapp.net");
    }

    #[tokio::test]
    async fn edit_carries_original_id_and_new_body() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "1@s.whatsapp.net", "id": "EDIT-WRAPPER"},
                "messageTimestamp": 1_700_000_100,
                "message": {
                    "protocolMessage": {
                        "key": {"id": "ORIG-1"},
                        "editedMessage": {"conversation": "fixed"}
                    }
                }
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        assert_eq!(message.id, "ORIG-1");
        assert_eq!(message.body, "fixed");
        assert!(message.edited);
    }

    #[tokio::test]
    async fn quoted_message_is_synthesized_in_the_same_chat() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "1@s.whatsapp.net", "id": "M2"},
                "messageTimestamp": 1_700_000_000,
                "message": {
                    "extendedTextMessage": {
                        "text": "replying",
                        "contextInfo": {
                            "stanzaId": "M1",
                            "participant": "1@s.whatsapp.net",
                            "quotedMessage": {"conversation": "original"}
                        }
                    }
                }
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        let quoted = message.quoted.expect("quote expected");
        assert_eq!(quoted.id, "M1");
        assert_eq!(quoted.body, "original");
        assert_eq!(quoted.chat_id, message.chat_id);
    }

    #[tokio::test]
    async fn media_envelope_keeps_fetch_ref_and_caption_body() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "1@s.whatsapp.net", "id": "M1"},
                "messageTimestamp": 1_700_000_000,
                "message": {
                    "imageMessage": {
                        "caption": "holiday",
                        "mimetype": "image/jpeg",
                        "url": "https://mmg.example/abc"
                    }
                }
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        assert_eq!(message.kind, MessageKind::Image);
        assert_eq!(message.body, "holiday");
        let media = message.media.expect("media expected");
        assert_eq!(media.mimetype.as_deref(), Some("image/jpeg"));
        assert!(media.fetch_ref.get("url").is_some());
    }

    #[tokio::test]
    async fn poll_update_without_creation_degrades() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        let message = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "123@g.us", "id": "V1", "participant": "1@s.whatsapp.net"},
                "messageTimestamp": 1_700_000_000,
                "message": {
                    "pollUpdateMessage": {
                        "pollCreationMessageKey": {"remoteJid": "123@g.us", "id": "POLL-1"},
                        "vote": {"encPayload": [1], "encIv": [2]}
                    }
                }
            }))
            .await
            .expect("normalize")
            .expect("message expected");
        let poll = message.poll.expect("poll state expected");
        assert!(poll.selections.is_empty());
        assert_eq!(poll.error.as_deref(), Some("poll creation message not found"));
    }

    #[tokio::test]
    async fn poll_update_matches_options_by_digest() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, store) = pipeline(transport.clone());

        let creation = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "123@g.us", "id": "POLL-1", "participant": "9@s.whatsapp.net"},
                "messageTimestamp": 1_700_000_000,
                "message": {
                    "pollCreationMessage": {
                        "name": "lunch?",
                        "options": [{"optionName": "pizza"}, {"optionName": "sushi"}]
                    },
                    "messageContextInfo": {"messageSecret": [7, 7, 7, 7]}
                }
            }))
            .await
            .expect("normalize")
            .expect("creation expected");
        store.append(&creation).await.expect("append creation");

        transport.set_poll_vote_hashes(vec![Sha256::digest(b"sushi").to_vec()]);
        let vote = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "123@g.us", "id": "V1", "participant": "2@s.whatsapp.net"},
                "messageTimestamp": 1_700_000_100,
                "message": {
                    "pollUpdateMessage": {
                        "pollCreationMessageKey": {"remoteJid": "123@g.us", "id": "POLL-1"},
                        "vote": {"encPayload": [1], "encIv": [2]}
                    }
                }
            }))
            .await
            .expect("normalize")
            .expect("vote expected");
        let poll = vote.poll.expect("poll state expected");
        assert_eq!(poll.selections, vec!["sushi".to_owned()]);
        assert_eq!(poll.voter.as_deref(), Some("2@s.whatsapp.net"));
        assert!(poll.error.is_none());
    }

    #[tokio::test]
    async fn deep_quote_chain_is_truncated() {
        let transport = Arc::new(MockTransport::default());
        let (normalizer, _) = pipeline(transport);

        // Nest quotes twelve levels deep; normalization must bottom out.
        let mut message = json!({"conversation": "level 0"});
        for level in 1..=12 {
            message = json!({
                "extendedTextMessage": {
                    "text": format!("level {level}"),
                    "contextInfo": {
                        "stanzaId": format!("Q{level}"),
                        "quotedMessage": message
                    }
                }
            });
        }

        let normalized = normalizer
            .normalize(&json!({
                "key": {"remoteJid": "1@s.whatsapp.net", "id": "TOP"},
                "messageTimestamp": 1_700_000_000,
                "message": message
            }))
            .await
            .expect("normalize")
            .expect("message expected");

        let mut depth = 0;
        let mut cursor = &normalized;
        while let Some(quoted) = &cursor.quoted {
            depth += 1;
            cursor = quoted;
        }
        assert_eq!(depth, MAX_QUOTE_DEPTH);
    }
}

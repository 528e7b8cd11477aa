//! Contact directory: cached identity records with on-demand enrichment.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tracing::warn;

use tokio::sync::{Mutex, RwLock};

use whatsline_core::{
    identity::{chat_kind, strip_device_suffix},
    types::{ChatKind, Contact},
};

use crate::transport::Transport;

/// Cached contact records, filled lazily from transport lookups.
///
/// Lookups for one id are serialized through a per-id lock so a burst of
/// messages from a new chat triggers exactly one round of transport
/// queries; different ids enrich in parallel. Collaborator failures degrade
/// the record (fields stay `None`) and are logged, never propagated.
pub struct ContactDirectory {
    transport: Arc<dyn Transport>,
    cache: RwLock<HashMap<String, Contact>>,
    fill_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContactDirectory {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: RwLock::new(HashMap::new()),
            fill_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Cached record, if any. Never queries the transport.
    pub async fn get_cached(&self, id: &str) -> Option<Contact> {
        self.cache.read().await.get(id).cloned()
    }

    /// Insert or replace a record, e.g. from a contacts-update event.
    pub async fn upsert(&self, contact: Contact) {
        self.cache.write().await.insert(contact.id.clone(), contact);
    }

    /// Get the record for a stable id, enriching it on first sight.
    ///
    /// `push_name_hint` is the sender-advertised name from a message
    /// envelope; it fills the name only when no stronger source answers.
    pub async fn resolve(&self, id: &str, push_name_hint: Option<&str>) -> Contact {
        if let Some(mut contact) = self.get_cached(id).await {
            if contact.name.is_none()
                && let Some(hint) = push_name_hint
            {
                contact.name = Some(hint.to_owned());
                self.upsert(contact.clone()).await;
            }
            return contact;
        }

        let fill_lock = {
            let mut locks = self.fill_locks.lock().await;
            locks
                .entry(id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = fill_lock.lock().await;

        // A concurrent caller may have filled the record while we waited.
        if let Some(contact) = self.get_cached(id).await {
            return contact;
        }

        let contact = self.build(id, push_name_hint).await;
        self.upsert(contact.clone()).await;
        self.fill_locks.lock().await.remove(id);
        contact
    }

    async fn build(&self, id: &str, push_name_hint: Option<&str>) -> Contact {
        let kind = chat_kind(id);
        let mut contact = Contact::bare(id, kind);

        match kind {
            ChatKind::Newsletter => {
                match self.transport.newsletter_info(id).await {
                    Ok(Some(info)) => {
                        contact.name = info.name;
                        contact.description = info.description;
                        contact.metadata = info.raw;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%id, error = %err, "newsletter lookup failed"),
                }
            }
            ChatKind::Group => {
                let (group, picture) = tokio::join!(
                    self.transport.group_info(id),
                    self.transport.profile_picture_url(id),
                );
                match group {
                    Ok(Some(info)) => {
                        contact.name = info.subject;
                        contact.description = info.description;
                        contact.metadata = info.raw;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%id, error = %err, "group lookup failed"),
                }
                contact.profile_picture_url = degrade(picture, id, "picture lookup failed");
            }
            ChatKind::Individual => {
                // The engine may report its own id with a device suffix.
                let is_self = self
                    .transport
                    .own_id()
                    .await
                    .is_some_and(|own| strip_device_suffix(&own) == id);
                let (status, picture, business) = tokio::join!(
                    self.transport.status_text(id),
                    self.transport.profile_picture_url(id),
                    self.transport.business_profile(id),
                );
                contact.status_text = degrade(status, id, "status lookup failed");
                contact.profile_picture_url = degrade(picture, id, "picture lookup failed");
                if let Some(profile) = degrade(business, id, "business lookup failed") {
                    contact.is_business = true;
                    contact.description = business_description(&profile);
                    contact.metadata = profile;
                }
                if is_self {
                    contact.name = self.transport.own_name().await;
                }
            }
        }

        if contact.name.is_none() {
            contact.name = push_name_hint.map(ToOwned::to_owned);
        }
        contact
    }
}

fn degrade<T>(result: Result<Option<T>, whatsline_core::ClientError>, id: &str, what: &str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(%id, error = %err, "{what}");
            None
        }
    }
}

fn business_description(profile: &Value) -> Option<String> {
    profile
        .get("description")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

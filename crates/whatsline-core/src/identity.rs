//! Pure helpers for the two parallel addressing namespaces.
//!
//! A raw id looks like `user[:device]@server`. The stable identifier never
//! carries the `:device` suffix; device-scoped ids live under the hidden-user
//! server and need resolution before they can be used as chat identity.

use crate::types::ChatKind;

/// Server domain of stable per-user ids.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
/// Server domain of group chats.
pub const GROUP_SERVER: &str = "g.us";
/// Server domain of newsletter threads.
pub const NEWSLETTER_SERVER: &str = "newsletter";
/// Server domain of broadcast lists (including status).
pub const BROADCAST_SERVER: &str = "broadcast";
/// Server domain of device-scoped (hidden-user) ids.
pub const HIDDEN_USER_SERVER: &str = "lid";

/// Domain suffix after the `@` separator, empty when absent.
pub fn server_of(id: &str) -> &str {
    id.rsplit_once('@').map(|(_, server)| server).unwrap_or("")
}

/// User part before the `@` separator (the whole id when absent).
pub fn user_of(id: &str) -> &str {
    id.split_once('@').map(|(user, _)| user).unwrap_or(id)
}

/// Remove the device-scoped `:device` suffix from the user part.
///
/// Deterministic string transform: `1234:5@s.whatsapp.net` becomes
/// `1234@s.whatsapp.net`; ids without a suffix pass through unchanged.
pub fn strip_device_suffix(id: &str) -> String {
    let (user, server) = match id.split_once('@') {
        Some((user, server)) => (user, Some(server)),
        None => (id, None),
    };
    let user = user.split_once(':').map(|(bare, _)| bare).unwrap_or(user);
    match server {
        Some(server) => format!("{user}@{server}"),
        None => user.to_owned(),
    }
}

pub fn is_group(id: &str) -> bool {
    server_of(id) == GROUP_SERVER
}

pub fn is_newsletter(id: &str) -> bool {
    server_of(id) == NEWSLETTER_SERVER
}

pub fn is_broadcast(id: &str) -> bool {
    server_of(id) == BROADCAST_SERVER
}

/// Whether the id is device-scoped and needs stable-id resolution.
pub fn is_device_scoped(id: &str) -> bool {
    server_of(id) == HIDDEN_USER_SERVER || user_of(id).contains(':')
}

/// Detect the chat kind from the id's domain suffix.
///
/// Fixed priority order: newsletter domain, group domain, else individual.
/// Business is a secondary attribute of an individual chat and is not
/// detectable from the id alone.
pub fn chat_kind(id: &str) -> ChatKind {
    if is_newsletter(id) {
        ChatKind::Newsletter
    } else if is_group(id) {
        ChatKind::Group
    } else {
        ChatKind::Individual
    }
}

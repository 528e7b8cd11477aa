//! Shared in-memory transport double for unit and pipeline tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use whatsline_core::error::{ClientError, ErrorCategory};

use crate::transport::{
    ConnectionState, ConnectionUpdate, GroupInfo, NewsletterInfo, PollVoteCipher, PollVoteContext,
    Transport, TransportEvent,
};

/// Canned, scriptable transport.
///
/// Tests preload lookup answers, then drive the runtime by pushing
/// [`TransportEvent`]s through the sender captured at `connect`.
#[derive(Default)]
pub(crate) struct MockTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    own_id: Mutex<Option<String>>,
    own_name: Mutex<Option<String>>,
    stable_ids: Mutex<HashMap<String, String>>,
    names: Mutex<HashMap<String, String>>,
    statuses: Mutex<HashMap<String, String>>,
    pictures: Mutex<HashMap<String, String>>,
    groups: Mutex<HashMap<String, GroupInfo>>,
    newsletters: Mutex<HashMap<String, NewsletterInfo>>,
    business_profiles: Mutex<HashMap<String, Value>>,
    poll_votes: Mutex<Vec<Vec<u8>>>,
    media: Mutex<Option<Vec<u8>>>,
    fail_lookups: Mutex<bool>,
    connect_calls: AtomicUsize,
    resolve_calls: AtomicUsize,
    group_info_calls: AtomicUsize,
    close_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    mark_online_calls: AtomicUsize,
    rejected_calls: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub(crate) fn with_own_id(id: &str, name: &str) -> Self {
        let mock = Self::default();
        *mock.own_id.lock().unwrap() = Some(id.to_owned());
        *mock.own_name.lock().unwrap() = Some(name.to_owned());
        mock
    }

    pub(crate) fn map_stable_id(&self, alt: &str, stable: &str) {
        self.stable_ids
            .lock()
            .unwrap()
            .insert(alt.to_owned(), stable.to_owned());
    }

    pub(crate) fn set_status_text(&self, id: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_owned(), status.to_owned());
    }

    pub(crate) fn set_picture(&self, id: &str, url: &str) {
        self.pictures
            .lock()
            .unwrap()
            .insert(id.to_owned(), url.to_owned());
    }

    pub(crate) fn set_group(&self, id: &str, info: GroupInfo) {
        self.groups.lock().unwrap().insert(id.to_owned(), info);
    }

    pub(crate) fn set_newsletter(&self, id: &str, info: NewsletterInfo) {
        self.newsletters.lock().unwrap().insert(id.to_owned(), info);
    }

    pub(crate) fn set_business_profile(&self, id: &str, profile: Value) {
        self.business_profiles
            .lock()
            .unwrap()
            .insert(id.to_owned(), profile);
    }

    pub(crate) fn set_poll_vote_hashes(&self, hashes: Vec<Vec<u8>>) {
        *self.poll_votes.lock().unwrap() = hashes;
    }

    pub(crate) fn set_media(&self, bytes: Vec<u8>) {
        *self.media.lock().unwrap() = Some(bytes);
    }

    /// Make every lookup method return a transport error.
    pub(crate) fn fail_lookups(&self) {
        *self.fail_lookups.lock().unwrap() = true;
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn group_info_calls(&self) -> usize {
        self.group_info_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_online_calls(&self) -> usize {
        self.mark_online_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn rejected_calls(&self) -> Vec<(String, String)> {
        self.rejected_calls.lock().unwrap().clone()
    }

    /// Sender captured at the last `connect`, for driving the runtime.
    pub(crate) fn event_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("connect was not called")
    }

    /// Push a connection-open update through the captured sender.
    pub(crate) async fn push_open(&self) {
        self.event_sender()
            .send(TransportEvent::Connection(ConnectionUpdate {
                connection: Some(ConnectionState::Open),
                ..ConnectionUpdate::default()
            }))
            .await
            .expect("runtime should be listening");
    }

    /// Push a connection-close update with the given status code.
    pub(crate) async fn push_close(&self, status_code: Option<u16>) {
        self.event_sender()
            .send(TransportEvent::Connection(ConnectionUpdate {
                connection: Some(ConnectionState::Close),
                status_code,
                ..ConnectionUpdate::default()
            }))
            .await
            .expect("runtime should be listening");
    }

    fn lookup_fault(&self) -> Result<(), ClientError> {
        if *self.fail_lookups.lock().unwrap() {
            return Err(ClientError::new(
                ErrorCategory::Transport,
                "mock_lookup_failed",
                "lookup failure injected",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), ClientError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn own_id(&self) -> Option<String> {
        self.own_id.lock().unwrap().clone()
    }

    async fn own_name(&self) -> Option<String> {
        self.own_name.lock().unwrap().clone()
    }

    async fn profile_picture_url(&self, id: &str) -> Result<Option<String>, ClientError> {
        self.lookup_fault()?;
        Ok(self.pictures.lock().unwrap().get(id).cloned())
    }

    async fn status_text(&self, id: &str) -> Result<Option<String>, ClientError> {
        self.lookup_fault()?;
        Ok(self.statuses.lock().unwrap().get(id).cloned())
    }

    async fn group_info(&self, id: &str) -> Result<Option<GroupInfo>, ClientError> {
        self.group_info_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup_fault()?;
        Ok(self.groups.lock().unwrap().get(id).cloned())
    }

    async fn newsletter_info(&self, id: &str) -> Result<Option<NewsletterInfo>, ClientError> {
        self.lookup_fault()?;
        Ok(self.newsletters.lock().unwrap().get(id).cloned())
    }

    async fn business_profile(&self, id: &str) -> Result<Option<Value>, ClientError> {
        self.lookup_fault()?;
        Ok(self.business_profiles.lock().unwrap().get(id).cloned())
    }

    async fn resolve_stable_id(&self, id: &str) -> Result<Option<String>, ClientError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup_fault()?;
        Ok(self.stable_ids.lock().unwrap().get(id).cloned())
    }

    async fn decrypt_poll_vote(
        &self,
        _context: &PollVoteContext,
        _cipher: &PollVoteCipher,
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        self.lookup_fault()?;
        Ok(self.poll_votes.lock().unwrap().clone())
    }

    async fn download_media(&self, _fetch_ref: &Value) -> Result<Vec<u8>, ClientError> {
        self.lookup_fault()?;
        self.media.lock().unwrap().clone().ok_or_else(|| {
            ClientError::new(
                ErrorCategory::Transport,
                "mock_media_missing",
                "no media bytes scripted",
            )
        })
    }

    async fn send_presence_ping(&self) -> Result<(), ClientError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup_fault()
    }

    async fn mark_online(&self) -> Result<(), ClientError> {
        self.mark_online_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject_call(&self, call_id: &str, from: &str) -> Result<(), ClientError> {
        self.rejected_calls
            .lock()
            .unwrap()
            .push((call_id.to_owned(), from.to_owned()));
        Ok(())
    }
}

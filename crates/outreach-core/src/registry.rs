//! Session Registry - in-memory map from call identifier to in-flight call state.
//!
//! Sessions are created either when the dialer places a call (authoritative
//! call id known) or when a media stream opens (possibly only a stream id).
//! [`SessionRegistry::attach_stream`] makes both paths converge on one entry.
//! Nothing here is persisted; a restart drops every in-flight session.

use crate::link::SocketLink;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Characters compared by the fuzzy identifier heuristic.
pub const FUZZY_PREFIX_LEN: usize = 10;

/// True when either id contains the other's first [`FUZZY_PREFIX_LEN`] chars.
pub fn fuzzy_id_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(prefix(b)) || b.contains(prefix(a))
}

fn prefix(id: &str) -> &str {
    match id.char_indices().nth(FUZZY_PREFIX_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// The ledger contact a session is about. `phone_number` is the join key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRef {
    pub name: String,
    pub phone_number: String,
}

impl ContactRef {
    pub fn new(name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone_number: phone_number.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Assistant,
    Caller,
}

/// One committed utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRecord {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// State for one phone call from dial (or stream open) to teardown.
#[derive(Debug)]
pub struct CallSession {
    key: String,
    call_sid: RwLock<Option<String>>,
    stream_sid: RwLock<Option<String>>,
    contact: RwLock<Option<ContactRef>>,
    transcript: RwLock<Vec<TurnRecord>>,
    ai_link: RwLock<Option<SocketLink>>,
    media_link: RwLock<Option<SocketLink>>,
    email_collected: AtomicBool,
    terminating: AtomicBool,
    started_at: DateTime<Utc>,
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

impl CallSession {
    fn new(key: impl Into<String>, call_sid: Option<String>, contact: Option<ContactRef>) -> Self {
        Self {
            key: key.into(),
            call_sid: RwLock::new(call_sid),
            stream_sid: RwLock::new(None),
            contact: RwLock::new(contact),
            transcript: RwLock::new(Vec::new()),
            ai_link: RwLock::new(None),
            media_link: RwLock::new(None),
            email_collected: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    /// Registry key: the call id, or the stream id for provisional sessions.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Authoritative provider call id, when known.
    pub fn call_sid(&self) -> Option<String> {
        read(&self.call_sid)
    }

    pub fn set_call_sid(&self, call_sid: impl Into<String>) {
        write(&self.call_sid, Some(call_sid.into()));
    }

    pub fn stream_sid(&self) -> Option<String> {
        read(&self.stream_sid)
    }

    pub fn set_stream_sid(&self, stream_sid: impl Into<String>) {
        write(&self.stream_sid, Some(stream_sid.into()));
    }

    pub fn contact(&self) -> Option<ContactRef> {
        read(&self.contact)
    }

    pub fn set_contact(&self, contact: ContactRef) {
        write(&self.contact, Some(contact));
    }

    pub fn contact_name(&self) -> Option<String> {
        self.contact().map(|c| c.name)
    }

    pub fn record_turn(&self, speaker: Speaker, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        self.transcript
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TurnRecord {
                speaker,
                text,
                at: Utc::now(),
            });
    }

    pub fn transcript(&self) -> Vec<TurnRecord> {
        read(&self.transcript)
    }

    pub fn mark_email_collected(&self) {
        self.email_collected.store(true, Ordering::Release);
    }

    pub fn email_collected(&self) -> bool {
        self.email_collected.load(Ordering::Acquire)
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.started_at
    }

    pub fn set_ai_link(&self, link: SocketLink) {
        write(&self.ai_link, Some(link));
    }

    pub fn ai_link(&self) -> Option<SocketLink> {
        read(&self.ai_link)
    }

    pub fn set_media_link(&self, link: SocketLink) {
        write(&self.media_link, Some(link));
    }

    pub fn media_link(&self) -> Option<SocketLink> {
        read(&self.media_link)
    }

    /// Claim the right to terminate. Only the first caller gets `true`.
    pub fn begin_termination(&self) -> bool {
        !self.terminating.swap(true, Ordering::AcqRel)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }
}

/// Process-wide session map. Clone freely; clones share the same map.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<CallSession>>>,
    fuzzy_matching: bool,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SessionRegistry {
    pub fn new(fuzzy_matching: bool) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            fuzzy_matching,
        }
    }

    /// Session for an authoritative call id. Returns the existing one if the
    /// id is already registered, filling in the contact if it was missing.
    pub fn create(&self, call_id: &str, contact: Option<ContactRef>) -> Arc<CallSession> {
        let session = self
            .sessions
            .entry(call_id.to_string())
            .or_insert_with(|| {
                info!(call_id, "📇 Session created");
                Arc::new(CallSession::new(call_id, Some(call_id.to_string()), None))
            })
            .clone();
        if let Some(contact) = contact {
            if session.contact().is_none() {
                session.set_contact(contact);
            }
        }
        session
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.get(call_id).map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        let removed = self.sessions.remove(call_id).map(|(_, s)| s);
        if removed.is_some() {
            debug!(call_id, "Session removed");
        }
        removed
    }

    /// Exact key first; then, if enabled, the single session whose key passes
    /// [`fuzzy_id_match`]. More than one fuzzy candidate counts as no match.
    pub fn find_by_prefix_match(&self, partial_id: &str) -> Option<Arc<CallSession>> {
        if let Some(session) = self.get(partial_id) {
            return Some(session);
        }
        if !self.fuzzy_matching || partial_id.is_empty() {
            return None;
        }

        let mut candidates = self
            .sessions
            .iter()
            .filter(|entry| fuzzy_id_match(partial_id, entry.key()))
            .map(|entry| Arc::clone(entry.value()));
        match (candidates.next(), candidates.next()) {
            (Some(session), None) => {
                debug!(partial_id, key = session.key(), "Fuzzy session match");
                Some(session)
            }
            (Some(_), Some(_)) => {
                warn!(partial_id, "Ambiguous fuzzy session match ignored");
                None
            }
            _ => None,
        }
    }

    /// Bind a freshly opened media stream to its session. Uses the call id
    /// when the stream reported one, otherwise the stream id; falls back to a
    /// provisional session keyed by whichever id is available.
    pub fn attach_stream(&self, stream_id: &str, call_id: Option<&str>) -> Arc<CallSession> {
        let lookup = call_id.unwrap_or(stream_id);
        let session = match self.find_by_prefix_match(lookup) {
            Some(session) => session,
            None => match call_id {
                Some(call_id) => self.create(call_id, None),
                None => self
                    .sessions
                    .entry(stream_id.to_string())
                    .or_insert_with(|| {
                        info!(stream_id, "📇 Provisional session created from stream");
                        Arc::new(CallSession::new(stream_id, None, None))
                    })
                    .clone(),
            },
        };
        session.set_stream_sid(stream_id);
        if let Some(call_id) = call_id {
            session.set_call_sid(call_id);
        }
        session
    }

    /// Remove and return sessions older than `ttl`.
    pub fn reap_stale(&self, ttl: Duration) -> Vec<Arc<CallSession>> {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().age() > ttl)
            .map(|entry| entry.key().clone())
            .collect();
        stale.iter().filter_map(|key| self.remove(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALL: &str = "CA1234567890abcdef";

    #[test]
    fn create_is_idempotent_and_keeps_contact() {
        let registry = SessionRegistry::default();
        let first = registry.create(CALL, Some(ContactRef::new("Jane", "+15550000")));
        let second = registry.create(CALL, None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.contact_name().as_deref(), Some("Jane"));
        assert_eq!(second.call_sid().as_deref(), Some(CALL));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn prefix_match_prefers_exact_then_unique_fuzzy() {
        let registry = SessionRegistry::default();
        registry.create(CALL, None);

        assert!(registry.find_by_prefix_match(CALL).is_some());
        assert!(registry.find_by_prefix_match("CA1234567890-other").is_some());
        assert!(registry.find_by_prefix_match("MZ999").is_none());

        registry.create("CA1234567890zzzz", None);
        assert!(registry.find_by_prefix_match("CA1234567890-other").is_none());
    }

    #[test]
    fn fuzzy_matching_can_be_disabled() {
        let registry = SessionRegistry::new(false);
        registry.create(CALL, None);
        assert!(registry.find_by_prefix_match("CA1234567890-other").is_none());
    }

    #[test]
    fn stream_attach_converges_on_dialed_session() {
        let registry = SessionRegistry::default();
        let dialed = registry.create(CALL, Some(ContactRef::new("Jane", "+15550000")));

        let attached = registry.attach_stream("MZstream", Some(CALL));
        assert!(Arc::ptr_eq(&dialed, &attached));
        assert_eq!(attached.stream_sid().as_deref(), Some("MZstream"));

        let orphan = registry.attach_stream("MZorphan-stream", None);
        assert_eq!(orphan.key(), "MZorphan-stream");
        assert_eq!(orphan.call_sid(), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn termination_is_claimed_once() {
        let session = CallSession::new(CALL, None, None);
        assert!(session.begin_termination());
        assert!(!session.begin_termination());
        assert!(session.is_terminating());
    }

    #[test]
    fn reap_removes_only_old_sessions() {
        let registry = SessionRegistry::default();
        registry.create(CALL, None);
        assert!(registry.reap_stale(Duration::minutes(30)).is_empty());
        assert_eq!(registry.reap_stale(Duration::milliseconds(-1)).len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn blank_turns_are_not_recorded() {
        let session = CallSession::new(CALL, None, None);
        session.record_turn(Speaker::Assistant, "  ");
        session.record_turn(Speaker::Caller, "yes, this is Jane");
        assert_eq!(session.transcript().len(), 1);
    }
}

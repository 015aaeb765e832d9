//! The client synchronization store.
//!
//! [`ChatStore`] holds the session's authoritative view of the open
//! conversation: the ordered message list, typing flags, unread counters,
//! reply/edit drafts, and the search cursor.  Mutations are synchronous on
//! `&mut self`; [`ChatClient`] wraps the store together with a
//! [`MessageApi`] and drives the two-phase send protocol around the network
//! await points.
//!
//! Optimistic sends are merged by correlation id, never by list position:
//! the provisional entry carries a temporary [`MessageId`] that the commit
//! phase swaps for the server-confirmed record.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use palaver_shared::protocol::{MessageRecord, Reaction, ServerEvent};
use palaver_shared::types::{DeliveryStatus, MessageId, UserId};

use crate::api::{MessageApi, OutgoingMessage, SidebarPeer};
use crate::error::ClientError;

/// What just changed, handed to every observer after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Conversation,
    Peers,
    Presence,
    Typing,
    Unread,
    Search,
    Draft,
}

pub type ObserverId = u64;

#[derive(Debug, Clone, Default)]
struct SearchState {
    query: String,
    /// Matching message ids, newest first.
    results: Vec<MessageId>,
    index: usize,
}

pub struct ChatStore {
    me: UserId,
    selected_peer: Option<UserId>,
    messages: Vec<MessageRecord>,
    peers: Vec<SidebarPeer>,
    online: HashSet<UserId>,
    typing_peers: HashSet<UserId>,
    unread_counts: HashMap<UserId, i64>,
    replying_to: Option<MessageId>,
    editing: Option<MessageId>,
    highlighted: Option<MessageId>,
    search: SearchState,
    observers: Vec<(ObserverId, Box<dyn Fn(StoreChange) + Send>)>,
    next_observer: ObserverId,
}

impl ChatStore {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            selected_peer: None,
            messages: Vec::new(),
            peers: Vec::new(),
            online: HashSet::new(),
            typing_peers: HashSet::new(),
            unread_counts: HashMap::new(),
            replying_to: None,
            editing: None,
            highlighted: None,
            search: SearchState::default(),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    // -- observers ----------------------------------------------------------

    /// Register an observer.  Observers are an explicit list; there is no
    /// implicit reactivity anywhere in the store.
    pub fn subscribe(&mut self, observer: impl Fn(StoreChange) + Send + 'static) -> ObserverId {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        self.observers.retain(|(observer_id, _)| *observer_id != id);
    }

    fn notify(&self, change: StoreChange) {
        for (_, observer) in &self.observers {
            observer(change);
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn selected_peer(&self) -> Option<UserId> {
        self.selected_peer
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn peers(&self) -> &[SidebarPeer] {
        &self.peers
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    pub fn is_typing(&self, user: UserId) -> bool {
        self.typing_peers.contains(&user)
    }

    pub fn unread_count(&self, user: UserId) -> i64 {
        self.unread_counts.get(&user).copied().unwrap_or(0)
    }

    pub fn replying_to(&self) -> Option<MessageId> {
        self.replying_to
    }

    pub fn editing(&self) -> Option<MessageId> {
        self.editing
    }

    pub fn highlighted(&self) -> Option<MessageId> {
        self.highlighted
    }

    // -- conversation loading -----------------------------------------------

    pub fn select_peer(&mut self, peer: Option<UserId>) {
        self.selected_peer = peer;
        self.messages.clear();
        self.replying_to = None;
        self.editing = None;
        self.highlighted = None;
        self.clear_search();
        self.notify(StoreChange::Conversation);
    }

    pub fn set_conversation(&mut self, messages: Vec<MessageRecord>) {
        self.messages = messages;
        self.notify(StoreChange::Conversation);
    }

    pub fn set_peers(&mut self, peers: Vec<SidebarPeer>) {
        self.unread_counts = peers
            .iter()
            .filter(|p| p.unread_count > 0)
            .map(|p| (p.user.id, p.unread_count))
            .collect();
        self.peers = peers;
        self.notify(StoreChange::Peers);
    }

    pub fn set_unread_counts(&mut self, counts: HashMap<UserId, i64>) {
        self.unread_counts = counts;
        self.notify(StoreChange::Unread);
    }

    // -- optimistic send: two-phase commit ----------------------------------

    /// Phase one: append a provisional entry with a temporary id and status
    /// `sending` so the UI reflects the send with zero latency.  Returns the
    /// correlation id for the later commit or abort.
    pub fn begin_send(&mut self, peer: UserId, draft: &OutgoingMessage) -> MessageId {
        let temp_id = MessageId::new();
        let now = Utc::now();

        self.messages.push(MessageRecord {
            id: temp_id,
            sender_id: self.me,
            receiver_id: peer,
            text: draft.text.clone(),
            image_url: None,
            voice_url: None,
            voice_duration: draft.voice_duration.unwrap_or(0),
            status: DeliveryStatus::Sending,
            reactions: Vec::new(),
            edited_at: None,
            reply_to: None,
            read_by: Vec::new(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        });

        self.notify(StoreChange::Conversation);
        temp_id
    }

    /// Phase two (success): replace the provisional entry, matched by its
    /// correlation id, with the server-confirmed record.
    ///
    /// If the confirmed record already arrived over the push channel the
    /// provisional entry is dropped instead, so exactly one entry remains.
    pub fn commit_send(&mut self, temp_id: MessageId, confirmed: MessageRecord) {
        let echo_merged = self.messages.iter().any(|m| m.id == confirmed.id);

        if echo_merged {
            self.messages.retain(|m| m.id != temp_id);
        } else if let Some(entry) = self.messages.iter_mut().find(|m| m.id == temp_id) {
            *entry = confirmed;
        } else {
            // The provisional entry is gone (peer switch); keep the
            // confirmation out of a conversation it no longer belongs to.
            tracing::debug!(temp = %temp_id, "send confirmation without provisional entry");
            return;
        }

        self.notify(StoreChange::Conversation);
    }

    /// Phase two (failure): drop the provisional entry.  A provisional entry
    /// is never left stranded.
    pub fn abort_send(&mut self, temp_id: MessageId) {
        self.messages.retain(|m| m.id != temp_id);
        self.notify(StoreChange::Conversation);
    }

    // -- inbound push merge --------------------------------------------------

    /// Apply one pushed event.  The match is exhaustive over the event set;
    /// call-signaling events are not the store's concern and are ignored
    /// here (the call coordinator consumes them).
    pub fn apply_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::GetOnlineUsers { users } => {
                self.online = users.into_iter().collect();
                self.notify(StoreChange::Presence);
            }
            ServerEvent::NewMessage { mut message } => {
                if self.belongs_to_open_conversation(&message) {
                    message.status = DeliveryStatus::Delivered;
                    if let Some(entry) =
                        self.messages.iter_mut().find(|m| m.id == message.id)
                    {
                        // Our own optimistic send echoed back.
                        *entry = message;
                    } else {
                        self.messages.push(message);
                    }
                    self.notify(StoreChange::Conversation);
                } else {
                    *self.unread_counts.entry(message.sender_id).or_insert(0) += 1;
                    self.notify(StoreChange::Unread);
                }
            }
            ServerEvent::MessageReactionUpdate {
                message_id,
                reactions,
            } => {
                self.patch_reactions(message_id, reactions);
            }
            ServerEvent::MessageEdited { message } | ServerEvent::MessageDeleted { message } => {
                // No-op when the message is outside the loaded window.
                if let Some(entry) = self.messages.iter_mut().find(|m| m.id == message.id) {
                    *entry = message;
                    self.notify(StoreChange::Conversation);
                }
            }
            ServerEvent::MessagesRead { message_ids, .. } => {
                let mut changed = false;
                for id in message_ids {
                    if let Some(entry) = self
                        .messages
                        .iter_mut()
                        .find(|m| m.id == id && m.sender_id == self.me)
                    {
                        entry.status = DeliveryStatus::Read;
                        changed = true;
                    }
                }
                if changed {
                    self.notify(StoreChange::Conversation);
                }
            }
            ServerEvent::Typing { from } => {
                self.typing_peers.insert(from);
                self.notify(StoreChange::Typing);
            }
            ServerEvent::StopTyping { from } => {
                self.typing_peers.remove(&from);
                self.notify(StoreChange::Typing);
            }
            ServerEvent::IncomingCall { .. }
            | ServerEvent::CallAnswered { .. }
            | ServerEvent::CallRejected { .. }
            | ServerEvent::CallEnded { .. }
            | ServerEvent::CallFailed { .. }
            | ServerEvent::Offer { .. }
            | ServerEvent::Answer { .. }
            | ServerEvent::IceCandidate { .. } => {}
        }
    }

    fn belongs_to_open_conversation(&self, message: &MessageRecord) -> bool {
        match self.selected_peer {
            Some(peer) => {
                (message.sender_id == peer && message.receiver_id == self.me)
                    || (message.sender_id == self.me && message.receiver_id == peer)
            }
            None => false,
        }
    }

    fn patch_reactions(&mut self, message_id: MessageId, reactions: Vec<Reaction>) {
        if let Some(entry) = self.messages.iter_mut().find(|m| m.id == message_id) {
            entry.reactions = reactions;
            self.notify(StoreChange::Conversation);
        }
    }

    /// Replace a local record after one of our own REST mutations (edit,
    /// delete) confirmed.  No-op when the id is not loaded.
    pub fn apply_record(&mut self, record: MessageRecord) {
        if let Some(entry) = self.messages.iter_mut().find(|m| m.id == record.id) {
            *entry = record;
            self.notify(StoreChange::Conversation);
        }
    }

    pub fn clear_unread(&mut self, peer: UserId) {
        if self.unread_counts.remove(&peer).is_some() {
            self.notify(StoreChange::Unread);
        }
    }

    // -- drafts --------------------------------------------------------------

    pub fn set_replying_to(&mut self, message: Option<MessageId>) {
        self.replying_to = message;
        self.notify(StoreChange::Draft);
    }

    pub fn set_editing(&mut self, message: Option<MessageId>) {
        self.editing = message;
        self.notify(StoreChange::Draft);
    }

    pub fn set_highlighted(&mut self, message: Option<MessageId>) {
        self.highlighted = message;
        self.notify(StoreChange::Conversation);
    }

    // -- search ---------------------------------------------------------------

    /// Filter the loaded, non-deleted messages by case-insensitive substring
    /// match, newest first, and reset the navigation cursor onto the first
    /// hit.
    pub fn search(&mut self, query: &str) {
        if query.trim().is_empty() {
            self.clear_search();
            return;
        }

        let needle = query.to_lowercase();
        let mut hits: Vec<&MessageRecord> = self
            .messages
            .iter()
            .filter(|m| !m.is_deleted)
            .filter(|m| {
                m.text
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        self.search = SearchState {
            query: query.to_string(),
            results: hits.into_iter().map(|m| m.id).collect(),
            index: 0,
        };
        self.highlighted = self.search.results.first().copied();
        self.notify(StoreChange::Search);
    }

    pub fn clear_search(&mut self) {
        self.search = SearchState::default();
        self.highlighted = None;
        self.notify(StoreChange::Search);
    }

    pub fn search_query(&self) -> &str {
        &self.search.query
    }

    pub fn search_results(&self) -> &[MessageId] {
        &self.search.results
    }

    pub fn current_match(&self) -> Option<MessageId> {
        self.search.results.get(self.search.index).copied()
    }

    /// Advance the cursor towards older hits, wrapping past the end.
    pub fn search_next(&mut self) -> Option<MessageId> {
        if self.search.results.is_empty() {
            return None;
        }
        self.search.index = (self.search.index + 1) % self.search.results.len();
        self.highlighted = self.current_match();
        self.notify(StoreChange::Search);
        self.current_match()
    }

    /// Move the cursor back towards newer hits, wrapping past the start.
    pub fn search_prev(&mut self) -> Option<MessageId> {
        if self.search.results.is_empty() {
            return None;
        }
        let len = self.search.results.len();
        self.search.index = (self.search.index + len - 1) % len;
        self.highlighted = self.current_match();
        self.notify(StoreChange::Search);
        self.current_match()
    }
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

/// The store plus its REST seam.  All methods follow the same shape:
/// optimistic local mutation where one exists, the network await, then the
/// merge or rollback.
pub struct ChatClient<A: MessageApi> {
    pub store: ChatStore,
    api: A,
}

impl<A: MessageApi> ChatClient<A> {
    pub fn new(me: UserId, api: A) -> Self {
        Self {
            store: ChatStore::new(me),
            api,
        }
    }

    pub async fn refresh_sidebar(&mut self) -> Result<(), ClientError> {
        let peers = self.api.list_sidebar().await?;
        self.store.set_peers(peers);
        Ok(())
    }

    pub async fn open_conversation(&mut self, peer: UserId) -> Result<(), ClientError> {
        self.store.select_peer(Some(peer));
        let messages = self.api.fetch_conversation(peer).await?;
        self.store.set_conversation(messages);
        Ok(())
    }

    /// The send protocol: optimistic insert, persisted write, then merge by
    /// correlation id -- or rollback, so no provisional entry is ever left
    /// behind.
    pub async fn send_message(
        &mut self,
        peer: UserId,
        draft: OutgoingMessage,
    ) -> Result<MessageRecord, ClientError> {
        let temp_id = self.store.begin_send(peer, &draft);

        match self.api.send_message(peer, &draft).await {
            Ok(confirmed) => {
                self.store.commit_send(temp_id, confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                self.store.abort_send(temp_id);
                Err(e)
            }
        }
    }

    pub async fn add_reaction(
        &mut self,
        message: MessageId,
        emoji: &str,
    ) -> Result<(), ClientError> {
        let reactions = self.api.add_reaction(message, emoji).await?;
        self.store.patch_reactions(message, reactions);
        Ok(())
    }

    pub async fn remove_reaction(&mut self, message: MessageId) -> Result<(), ClientError> {
        let reactions = self.api.remove_reaction(message).await?;
        self.store.patch_reactions(message, reactions);
        Ok(())
    }

    pub async fn edit_message(
        &mut self,
        message: MessageId,
        text: &str,
    ) -> Result<(), ClientError> {
        let record = self.api.edit_message(message, text).await?;
        self.store.apply_record(record);
        self.store.set_editing(None);
        Ok(())
    }

    pub async fn delete_message(&mut self, message: MessageId) -> Result<(), ClientError> {
        let record = self.api.delete_message(message).await?;
        self.store.apply_record(record);
        Ok(())
    }

    pub async fn mark_read(&mut self, peer: UserId) -> Result<(), ClientError> {
        self.api.mark_read(peer).await?;
        self.store.clear_unread(peer);
        Ok(())
    }
}

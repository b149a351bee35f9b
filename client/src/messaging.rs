//! Chat, trade offers, social activity and the derived friend list
//!
//! Everything here is pass-through: histories are bounded rings kept in
//! receipt order for the UI to snapshot. Timestamps are carried but never
//! used to reorder.
//!
//! The friend list is a locally derived cache. Accepting a request or
//! receiving an acceptance updates it optimistically, so it may diverge from
//! whatever the server believes; nothing here assumes the relation is
//! symmetric.

use log::{debug, warn};
use shared::{
    ActorId, ChatMessageData, ChatScope, FriendRequestData, FriendResponseData,
    SocialActivityData, TradeOfferData, TradeSide, TradeSignal,
};
use std::collections::{vec_deque, BTreeMap, VecDeque};

/// Most-recent-N ring, oldest first.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    /// Up to `n` newest items, oldest first.
    pub fn latest(&self, n: usize) -> Vec<&T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn iter_mut(&mut self) -> vec_deque::IterMut<'_, T> {
        self.items.iter_mut()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: ActorId,
    pub sender_display_name: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Friend {
    pub id: ActorId,
    pub display_name: String,
    pub online: bool,
    pub last_seen: u64,
}

/// Identity stamped on outbound messages.
#[derive(Debug, Clone, Copy)]
pub struct Sender<'a> {
    pub id: &'a ActorId,
    pub display_name: &'a str,
}

pub struct Messaging {
    chat: BoundedLog<ChatMessageData>,
    trades: BoundedLog<TradeOfferData>,
    activity: BoundedLog<SocialActivityData>,
    pending_requests: Vec<FriendRequest>,
    friends: BTreeMap<ActorId, Friend>,
}

impl Messaging {
    pub fn new(chat_cap: usize, trade_cap: usize, activity_cap: usize) -> Self {
        Self {
            chat: BoundedLog::new(chat_cap),
            trades: BoundedLog::new(trade_cap),
            activity: BoundedLog::new(activity_cap),
            pending_requests: Vec::new(),
            friends: BTreeMap::new(),
        }
    }

    /// Starts a new session from the handshake's chat history.
    ///
    /// Session-scoped state is replaced. Friends survive, since they are
    /// this client's own view, but everyone is offline until presence says
    /// otherwise.
    pub fn reset_session(&mut self, chat_history: Vec<ChatMessageData>, timestamp: u64) {
        self.chat.clear();
        for message in chat_history {
            self.chat.push(message);
        }
        self.trades.clear();
        self.activity.clear();
        self.pending_requests.clear();

        for friend in self.friends.values_mut() {
            if friend.online {
                friend.online = false;
                friend.last_seen = timestamp;
            }
        }
    }

    // Chat

    /// Appends an inbound message, or applies it as a deletion if flagged.
    /// Returns true if the message was appended.
    pub fn receive_chat(&mut self, message: ChatMessageData) -> bool {
        if message.deleted {
            match message.id.as_deref() {
                Some(id) if self.flag_deleted(id) => debug!("Chat message {} deleted", id),
                _ => debug!("Deletion for unknown chat message {:?}", message.id),
            }
            return false;
        }

        self.chat.push(message);
        true
    }

    fn flag_deleted(&mut self, id: &str) -> bool {
        match self
            .chat
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(id))
        {
            Some(message) if !message.deleted => {
                message.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Builds an outbound chat message. Private messages need a target.
    pub fn compose_chat(
        &self,
        sender: Sender<'_>,
        body: &str,
        scope: ChatScope,
        target: Option<ActorId>,
        trade_signal: Option<TradeSignal>,
        timestamp: u64,
    ) -> Option<ChatMessageData> {
        if body.trim().is_empty() {
            debug!("Refusing to send empty chat message");
            return None;
        }
        if scope == ChatScope::Private && target.is_none() {
            warn!("Private chat message without a target; not sent");
            return None;
        }

        Some(ChatMessageData {
            id: None,
            sender_id: Some(sender.id.clone()),
            sender_name: Some(sender.display_name.to_string()),
            body: body.to_string(),
            scope,
            target,
            timestamp,
            trade_signal,
            deleted: false,
        })
    }

    /// Flags a held message and returns the delete intent to forward.
    pub fn delete_chat(&mut self, id: &str) -> Option<ChatMessageData> {
        if !self.flag_deleted(id) {
            debug!("Cannot delete chat message {}: unknown or already deleted", id);
            return None;
        }

        self.chat
            .iter()
            .find(|m| m.id.as_deref() == Some(id))
            .cloned()
    }

    pub fn chat_history(&self) -> Vec<&ChatMessageData> {
        self.chat.iter().collect()
    }

    pub fn latest_chat(&self, n: usize) -> Vec<&ChatMessageData> {
        self.chat.latest(n)
    }

    // Trade offers and social feed

    pub fn record_trade_offer(&mut self, offer: TradeOfferData) {
        self.trades.push(offer);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compose_trade_offer(
        &self,
        sender: Sender<'_>,
        target: Option<ActorId>,
        symbol: &str,
        side: TradeSide,
        price: f64,
        quantity: f64,
        timestamp: u64,
    ) -> Option<TradeOfferData> {
        let valid = !symbol.is_empty()
            && price.is_finite()
            && price > 0.0
            && quantity.is_finite()
            && quantity > 0.0;
        if !valid {
            warn!(
                "Invalid trade offer {} {:?} {} @ {}; not sent",
                symbol, side, quantity, price
            );
            return None;
        }

        Some(TradeOfferData {
            id: None,
            sender_id: Some(sender.id.clone()),
            target_id: target,
            symbol: symbol.to_uppercase(),
            price,
            quantity,
            side,
            timestamp,
        })
    }

    pub fn trade_offers(&self) -> Vec<&TradeOfferData> {
        self.trades.iter().collect()
    }

    pub fn record_activity(&mut self, activity: SocialActivityData) {
        self.activity.push(activity);
    }

    pub fn activities(&self) -> Vec<&SocialActivityData> {
        self.activity.iter().collect()
    }

    // Friends

    pub fn compose_friend_request(
        &self,
        sender: Sender<'_>,
        target: &ActorId,
        timestamp: u64,
    ) -> Option<FriendRequestData> {
        if sender.id == target {
            debug!("Ignoring friend request to self");
            return None;
        }
        if self.friends.contains_key(target) {
            debug!("{} is already a friend", target);
            return None;
        }

        Some(FriendRequestData {
            id: None,
            sender_id: sender.id.clone(),
            sender_display_name: sender.display_name.to_string(),
            target_id: Some(target.clone()),
            timestamp,
        })
    }

    /// Queues an inbound request. Returns false for duplicates or requests
    /// the server did not give an id.
    pub fn receive_friend_request(&mut self, data: FriendRequestData) -> bool {
        let Some(id) = data.id else {
            warn!("friend_request from {} without id; dropping", data.sender_id);
            return false;
        };
        if self.pending_requests.iter().any(|r| r.id == id) {
            debug!("Duplicate friend request {}", id);
            return false;
        }

        self.pending_requests.push(FriendRequest {
            id,
            sender_id: data.sender_id,
            sender_display_name: data.sender_display_name,
            timestamp: data.timestamp,
        });
        true
    }

    fn take_request(&mut self, request_id: &str) -> Option<FriendRequest> {
        match self.pending_requests.iter().position(|r| r.id == request_id) {
            Some(index) => Some(self.pending_requests.remove(index)),
            None => {
                debug!("No pending friend request {}", request_id);
                None
            }
        }
    }

    /// Accepts a pending request: befriends the sender and returns the
    /// response to forward.
    pub fn accept_request(
        &mut self,
        request_id: &str,
        responder: Sender<'_>,
        sender_online: bool,
        timestamp: u64,
    ) -> Option<FriendResponseData> {
        let request = self.take_request(request_id)?;
        self.add_friend(
            request.sender_id,
            request.sender_display_name,
            sender_online,
            timestamp,
        );

        Some(FriendResponseData {
            request_id: request.id,
            sender_id: responder.id.clone(),
            sender_display_name: responder.display_name.to_string(),
            accepted: true,
            timestamp,
        })
    }

    pub fn reject_request(
        &mut self,
        request_id: &str,
        responder: Sender<'_>,
        timestamp: u64,
    ) -> Option<FriendResponseData> {
        let request = self.take_request(request_id)?;
        Some(FriendResponseData {
            request_id: request.id,
            sender_id: responder.id.clone(),
            sender_display_name: responder.display_name.to_string(),
            accepted: false,
            timestamp,
        })
    }

    /// A peer answered one of our requests. Returns true if a friend was added.
    pub fn receive_friend_response(&mut self, data: FriendResponseData, online: bool) -> bool {
        if !data.accepted {
            debug!("{} declined friend request {}", data.sender_id, data.request_id);
            return false;
        }
        self.add_friend(data.sender_id, data.sender_display_name, online, data.timestamp)
    }

    fn add_friend(&mut self, id: ActorId, display_name: String, online: bool, timestamp: u64) -> bool {
        let added = !self.friends.contains_key(&id);
        self.friends.insert(
            id.clone(),
            Friend {
                id,
                display_name,
                online,
                last_seen: timestamp,
            },
        );
        added
    }

    /// Mirrors presence onto the friend list. No-op for non-friends.
    pub fn set_friend_online(&mut self, id: &ActorId, online: bool, timestamp: u64) {
        if let Some(friend) = self.friends.get_mut(id) {
            if friend.online && !online {
                friend.last_seen = timestamp;
            }
            friend.online = online;
        }
    }

    pub fn pending_requests(&self) -> &[FriendRequest] {
        &self.pending_requests
    }

    pub fn friends(&self) -> Vec<&Friend> {
        self.friends.values().collect()
    }

    pub fn friend(&self, id: &ActorId) -> Option<&Friend> {
        self.friends.get(id)
    }
}

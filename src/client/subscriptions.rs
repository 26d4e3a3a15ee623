//! Per-channel subscription state machines layered on one connection.

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::{SlotMap, new_key_type};
use tokio::sync::{oneshot, watch};

use crate::errors::{DuplicateSubscriptionError, SubscribeError};
use crate::events::{
    JoinEvent, LeaveEvent, Listener, Observers, PublicationEvent, SubscribeErrorEvent,
    SubscribedEvent, SubscribingEvent, SubscriptionEvent, UnsubscribedEvent, subscribing_codes,
    unsubscribed_codes,
};
use crate::protocol::{ClientInfo, Publication, SubscribeRequest, SubscribeResult};
use crate::subscription::{State, SubscriptionShared};

new_key_type! { pub(crate) struct SubscriptionKey; }

pub(crate) type SubscribeWaiter = oneshot::Sender<Result<(), SubscribeError>>;

/// Stream position to resume from after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Recovery {
    offset: u64,
    epoch: String,
}

pub(crate) struct SubscriptionRecord {
    pub(crate) shared: Arc<SubscriptionShared>,
    state: State,
    state_tx: watch::Sender<State>,
    observers: Observers<SubscriptionEvent>,
    /// Outstanding subscribe request on the current connection.
    pub(crate) subscribe_id: Option<u32>,
    waiters: Vec<SubscribeWaiter>,
    recovery: Option<Recovery>,
}

impl SubscriptionRecord {
    pub fn state(&self) -> State {
        self.state
    }

    fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// A subscribe for this record reached the server on this connection.
    fn on_wire(&self) -> bool {
        self.subscribe_id.is_some() || self.state == State::Subscribed
    }

    fn set_state(&mut self, state: State) {
        log::debug!("state: {:?} -> {:?}, channel={}", self.state, state, self.channel());
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&mut self, event: SubscriptionEvent) {
        self.observers.notify(&event);
    }

    fn settle(&mut self, result: Result<(), SubscribeError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn move_to_subscribing(&mut self, code: u32, reason: &str) {
        self.subscribe_id = None;
        self.set_state(State::Subscribing);
        let event = SubscribingEvent {
            channel: self.channel().to_owned(),
            code,
            reason: reason.to_owned(),
        };
        self.emit(SubscriptionEvent::Subscribing(event));
    }

    fn move_to_unsubscribed(&mut self, code: u32, reason: &str, err: SubscribeError) {
        self.subscribe_id = None;
        self.set_state(State::Unsubscribed);
        let event = UnsubscribedEvent {
            channel: self.channel().to_owned(),
            code,
            reason: reason.to_owned(),
        };
        self.emit(SubscriptionEvent::Unsubscribed(event));
        self.settle(Err(err));
    }

    fn deliver(&mut self, publication: Publication) {
        if publication.offset > 0 {
            if let Some(recovery) = self.recovery.as_mut() {
                recovery.offset = recovery.offset.max(publication.offset);
            }
        }

        let event = PublicationEvent {
            channel: self.channel().to_owned(),
            data: publication.data,
            offset: (publication.offset > 0).then_some(publication.offset),
            info: publication.info,
        };
        self.emit(SubscriptionEvent::Publication(event));
    }
}

/// Registry of every subscription handle created on one client.
///
/// `live` indexes the records in `Subscribing` or `Subscribed` state by
/// channel; a channel has at most one live record.
pub(crate) struct Subscriptions {
    records: SlotMap<SubscriptionKey, SubscriptionRecord>,
    by_handle: HashMap<u64, SubscriptionKey>,
    live: HashMap<String, SubscriptionKey>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self {
            records: SlotMap::with_key(),
            by_handle: HashMap::new(),
            live: HashMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        shared: Arc<SubscriptionShared>,
        state_tx: watch::Sender<State>,
    ) -> SubscriptionKey {
        if let Some(key) = self.by_handle.get(&shared.id) {
            return *key;
        }

        let id = shared.id;
        let key = self.records.insert(SubscriptionRecord {
            shared,
            state: State::Unsubscribed,
            state_tx,
            observers: Observers::new(),
            subscribe_id: None,
            waiters: Vec::new(),
            recovery: None,
        });
        self.by_handle.insert(id, key);
        key
    }

    /// Drops the record of a handle. The record must not be live.
    pub fn remove(&mut self, handle_id: u64) -> Option<SubscriptionRecord> {
        let key = self.by_handle.remove(&handle_id)?;
        let record = self.records.remove(key)?;
        debug_assert!(self.live.get(record.channel()) != Some(&key));
        Some(record)
    }

    pub fn key_of(&self, handle_id: u64) -> Option<SubscriptionKey> {
        self.by_handle.get(&handle_id).copied()
    }

    pub fn get(&self, key: SubscriptionKey) -> Option<&SubscriptionRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: SubscriptionKey) -> Option<&mut SubscriptionRecord> {
        self.records.get_mut(key)
    }

    pub fn live_key(&self, channel: &str) -> Option<SubscriptionKey> {
        self.live.get(channel).copied()
    }

    pub fn listen(&mut self, key: SubscriptionKey, listener: Listener<SubscriptionEvent>) {
        if let Some(record) = self.records.get_mut(key) {
            record.observers.add(listener);
        }
    }

    /// Starts subscribing. Fails, settling `waiter` with the error, when any
    /// record, this one included, is already live for the channel.
    pub fn begin(
        &mut self,
        key: SubscriptionKey,
        waiter: Option<SubscribeWaiter>,
    ) -> Result<(), DuplicateSubscriptionError> {
        let Some(record) = self.records.get_mut(key) else {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(SubscribeError::Closed));
            }
            return Ok(());
        };
        let channel = record.channel().to_owned();
        if self.live.contains_key(&channel) {
            let err = DuplicateSubscriptionError { channel };
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(err.clone().into()));
            }
            return Err(err);
        }

        self.live.insert(channel, key);
        record.waiters.extend(waiter);
        record.move_to_subscribing(subscribing_codes::SUBSCRIBE_CALLED, "subscribe called");
        Ok(())
    }

    /// Live records that still need a subscribe command on this connection.
    pub fn to_send(&self) -> Vec<SubscriptionKey> {
        self.live
            .values()
            .copied()
            .filter(|key| {
                self.records
                    .get(*key)
                    .is_some_and(|r| r.state == State::Subscribing && r.subscribe_id.is_none())
            })
            .collect()
    }

    pub fn subscribe_request(&self, key: SubscriptionKey) -> Option<SubscribeRequest> {
        let record = self.records.get(key)?;
        let config = &record.shared.config;
        let mut request = SubscribeRequest {
            channel: record.channel().to_owned(),
            token: config.token.clone(),
            data: config.data.clone(),
            recoverable: config.recoverable,
            positioned: config.positioned,
            join_leave: config.join_leave,
            ..Default::default()
        };
        if let (true, Some(recovery)) = (config.recoverable, record.recovery.as_ref()) {
            request.recover = true;
            request.offset = recovery.offset;
            request.epoch = recovery.epoch.clone();
        }
        Some(request)
    }

    pub fn mark_sent(&mut self, key: SubscriptionKey, id: u32) {
        if let Some(record) = self.records.get_mut(key) {
            record.subscribe_id = Some(id);
        }
    }

    pub fn subscribed(&mut self, key: SubscriptionKey, result: SubscribeResult) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };

        record.subscribe_id = None;
        if result.recoverable {
            record.recovery = Some(Recovery {
                offset: result.offset,
                epoch: result.epoch.clone(),
            });
        } else {
            record.recovery = None;
        }

        record.set_state(State::Subscribed);
        let event = SubscribedEvent {
            channel: record.channel().to_owned(),
            recoverable: result.recoverable,
            recovered: result.recovered,
            data: result.data,
        };
        record.emit(SubscriptionEvent::Subscribed(event));
        record.settle(Ok(()));

        for publication in result.publications {
            record.deliver(publication);
        }
    }

    pub fn rejected(&mut self, key: SubscriptionKey, code: u32, reason: String) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        if self.live.get(record.channel()) == Some(&key) {
            self.live.remove(record.channel());
        }

        record.subscribe_id = None;
        record.set_state(State::Unsubscribed);
        let event = SubscribeErrorEvent {
            channel: record.channel().to_owned(),
            code,
            reason: reason.clone(),
        };
        record.emit(SubscriptionEvent::SubscribeError(event));
        record.settle(Err(SubscribeError::Rejected { code, reason }));
    }

    /// Moves a live record to `Unsubscribed`. Returns whether the server
    /// knows about the subscription and must be told.
    pub fn unsubscribe(
        &mut self,
        key: SubscriptionKey,
        code: u32,
        reason: &str,
        err: SubscribeError,
    ) -> bool {
        let Some(record) = self.records.get_mut(key) else {
            return false;
        };
        if record.state == State::Unsubscribed {
            return false;
        }
        if self.live.get(record.channel()) == Some(&key) {
            self.live.remove(record.channel());
        }

        let on_wire = record.on_wire();
        record.move_to_unsubscribed(code, reason, err);
        on_wire
    }

    /// Server asked to subscribe again.
    pub fn resubscribe(&mut self, key: SubscriptionKey, code: u32, reason: &str) {
        if let Some(record) = self.records.get_mut(key) {
            record.move_to_subscribing(code, reason);
        }
    }

    pub fn publication(&mut self, channel: &str, publication: Publication) {
        let Some(record) = self.live_record(channel) else {
            log::debug!("publication for unknown channel {}", channel);
            return;
        };
        if record.state != State::Subscribed {
            log::debug!("publication while {:?}, channel={}", record.state, channel);
            return;
        }
        record.deliver(publication);
    }

    pub fn join(&mut self, channel: &str, info: ClientInfo) {
        if let Some(record) = self.presence_record(channel) {
            let event = JoinEvent {
                channel: channel.to_owned(),
                info,
            };
            record.emit(SubscriptionEvent::Join(event));
        }
    }

    pub fn leave(&mut self, channel: &str, info: ClientInfo) {
        if let Some(record) = self.presence_record(channel) {
            let event = LeaveEvent {
                channel: channel.to_owned(),
                info,
            };
            record.emit(SubscriptionEvent::Leave(event));
        }
    }

    /// The connection went away: every live record waits for the next one.
    pub fn transport_lost(&mut self) {
        for key in self.live.values() {
            let Some(record) = self.records.get_mut(*key) else {
                continue;
            };
            if record.state == State::Subscribed {
                record.move_to_subscribing(subscribing_codes::TRANSPORT_CLOSED, "transport closed");
            } else {
                record.subscribe_id = None;
            }
        }
    }

    /// Terminal shutdown of every live record.
    pub fn close_all(&mut self) {
        for (_, key) in self.live.drain() {
            if let Some(record) = self.records.get_mut(key) {
                record.move_to_unsubscribed(
                    unsubscribed_codes::CLIENT_CLOSED,
                    "client closed",
                    SubscribeError::Closed,
                );
            }
        }
    }

    fn live_record(&mut self, channel: &str) -> Option<&mut SubscriptionRecord> {
        let key = self.live.get(channel)?;
        self.records.get_mut(*key)
    }

    fn presence_record(&mut self, channel: &str) -> Option<&mut SubscriptionRecord> {
        let record = self.live_record(channel)?;
        if record.state == State::Subscribed && record.shared.config.join_leave {
            Some(record)
        } else {
            None
        }
    }
}

//! Ordered observer fan-out.
//!
//! An [`ObserverList`] delivers each event to its subscribers synchronously,
//! in subscription order. Delivery never re-enters: an event emitted while
//! another is being delivered is queued and delivered once the current one
//! has reached every subscriber. Subscribers added during delivery start
//! with the next event. No lock is held while an observer runs, so observers
//! may freely subscribe, unsubscribe or emit on the same list.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Receives events of type `E`.
pub trait Observer<E>: Send {
    fn notify(&mut self, event: &E);
}

impl<E, F> Observer<E> for F
where
    F: FnMut(&E) + Send,
{
    fn notify(&mut self, event: &E) {
        self(event);
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Slot<E> {
    id: SubscriptionId,
    observer: Box<dyn Observer<E>>,
}

struct ListState<E> {
    /// Idle: every subscriber. Delivering: only those added mid-delivery.
    slots: Vec<Slot<E>>,
    /// Subscribers taken out for the delivery in progress.
    active_ids: Vec<SubscriptionId>,
    /// Active subscribers unsubscribed mid-delivery.
    removed: Vec<SubscriptionId>,
    queue: VecDeque<E>,
    next_id: u64,
    delivering: bool,
    closed: bool,
}

pub struct ObserverList<E> {
    state: Mutex<ListState<E>>,
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListState {
                slots: Vec::new(),
                active_ids: Vec::new(),
                removed: Vec::new(),
                queue: VecDeque::new(),
                next_id: 0,
                delivering: false,
                closed: false,
            }),
        }
    }

    /// Add a subscriber. Returns `None` once the list is closed.
    pub fn subscribe(&self, observer: Box<dyn Observer<E>>) -> Option<SubscriptionId> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.slots.push(Slot { id, observer });
        Some(id)
    }

    /// Remove a subscriber. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        if let Some(pos) = state.slots.iter().position(|s| s.id == id) {
            state.slots.remove(pos);
            return true;
        }
        if state.delivering && state.active_ids.contains(&id) && !state.removed.contains(&id) {
            state.removed.push(id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.slots.len() + state.active_ids.len() - state.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Deliver `event` to every subscriber. No-op once closed.
    pub fn emit(&self, event: E) {
        self.dispatch(event, false);
    }

    /// Deliver a terminal event, then drop every subscriber. Later emits
    /// and subscriptions are ignored, so the terminal event is seen exactly
    /// once.
    pub fn close(&self, terminal: E) {
        self.dispatch(terminal, true);
    }

    fn dispatch(&self, event: E, terminal: bool) {
        let mut active = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if terminal {
                state.closed = true;
            }
            if state.delivering {
                state.queue.push_back(event);
                return;
            }
            state.delivering = true;
            let active = std::mem::take(&mut state.slots);
            state.active_ids = active.iter().map(|s| s.id).collect();
            active
        };

        let mut event = event;
        loop {
            for slot in &mut active {
                let skip = self.state.lock().removed.contains(&slot.id);
                if !skip {
                    slot.observer.notify(&event);
                }
            }

            let mut state = self.state.lock();
            let removed = std::mem::take(&mut state.removed);
            active.retain(|s| !removed.contains(&s.id));
            active.append(&mut state.slots);

            if let Some(next) = state.queue.pop_front() {
                state.active_ids = active.iter().map(|s| s.id).collect();
                drop(state);
                event = next;
                continue;
            }

            state.delivering = false;
            state.active_ids.clear();
            if !state.closed {
                state.slots = std::mem::take(&mut active);
            }
            drop(state);
            // Observers of a closed list are dropped here, outside the lock.
            drop(active);
            return;
        }
    }
}

//! Priority-ordered, stoppable publish/subscribe dispatcher.
//!
//! Listeners are kept per event name, highest priority first. Equal
//! priorities dispatch in registration order. `Priority::First` and
//! `Priority::Last` resolve when the listener is registered: one above the
//! current maximum (or `1`), one below the current minimum (or `-1`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::event::{BeforeEvent, CompleteEvent, ErrorEvent, Event, HeadersEvent};
use crate::domain::Transaction;

/// Result returned by every listener.
pub type ListenerResult = anyhow::Result<()>;

type BeforeFn = dyn Fn(&mut BeforeEvent) -> ListenerResult + Send + Sync;
type HeadersFn = dyn Fn(&mut HeadersEvent) -> ListenerResult + Send + Sync;
type CompleteFn = dyn Fn(&mut CompleteEvent) -> ListenerResult + Send + Sync;
type ErrorFn = dyn Fn(&mut ErrorEvent) -> ListenerResult + Send + Sync;

/// Lifecycle event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    Before,
    Headers,
    Complete,
    Error,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Before => "before",
            EventName::Headers => "headers",
            EventName::Complete => "complete",
            EventName::Error => "error",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listener bound to one event type.
#[derive(Clone)]
pub enum Listener {
    Before(Arc<BeforeFn>),
    Headers(Arc<HeadersFn>),
    Complete(Arc<CompleteFn>),
    Error(Arc<ErrorFn>),
}

impl Listener {
    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&mut BeforeEvent) -> ListenerResult + Send + Sync + 'static,
    {
        Listener::Before(Arc::new(f))
    }

    pub fn headers<F>(f: F) -> Self
    where
        F: Fn(&mut HeadersEvent) -> ListenerResult + Send + Sync + 'static,
    {
        Listener::Headers(Arc::new(f))
    }

    pub fn complete<F>(f: F) -> Self
    where
        F: Fn(&mut CompleteEvent) -> ListenerResult + Send + Sync + 'static,
    {
        Listener::Complete(Arc::new(f))
    }

    pub fn error<F>(f: F) -> Self
    where
        F: Fn(&mut ErrorEvent) -> ListenerResult + Send + Sync + 'static,
    {
        Listener::Error(Arc::new(f))
    }

    /// The event this listener handles.
    pub fn event(&self) -> EventName {
        match self {
            Listener::Before(_) => EventName::Before,
            Listener::Headers(_) => EventName::Headers,
            Listener::Complete(_) => EventName::Complete,
            Listener::Error(_) => EventName::Error,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.event())
    }
}

/// Listener priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Value(i32),
    /// Ahead of every listener registered so far.
    First,
    /// Behind every listener registered so far.
    Last,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Value(0)
    }
}

impl From<i32> for Priority {
    fn from(p: i32) -> Self {
        Priority::Value(p)
    }
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A bundle of listeners registered together.
pub trait Subscriber {
    fn events(&self) -> Vec<(Listener, Priority)>;
}

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    priority: i32,
    once: bool,
    listener: Listener,
}

/// One step of a dispatch: which listener to call and whether it is one-shot.
pub(crate) struct PlannedCall {
    pub(crate) id: ListenerId,
    pub(crate) once: bool,
    pub(crate) listener: Listener,
}

/// Event emitter owned by each request.
#[derive(Clone, Default)]
pub struct Emitter {
    listeners: BTreeMap<EventName, Vec<Entry>>,
    next_id: u64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent listener.
    pub fn on(&mut self, listener: Listener, priority: impl Into<Priority>) -> ListenerId {
        self.insert(listener, priority.into(), false)
    }

    /// Register a listener removed after its first invocation.
    pub fn once(&mut self, listener: Listener, priority: impl Into<Priority>) -> ListenerId {
        self.insert(listener, priority.into(), true)
    }

    fn insert(&mut self, listener: Listener, priority: Priority, once: bool) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        let entries = self.listeners.entry(listener.event()).or_default();

        let priority = match priority {
            Priority::Value(p) => p,
            Priority::First => entries.iter().map(|e| e.priority).max().map_or(1, |p| p.saturating_add(1)),
            Priority::Last => entries.iter().map(|e| e.priority).min().map_or(-1, |p| p.saturating_sub(1)),
        };

        let at = entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(entries.len());
        entries.insert(
            at,
            Entry {
                id,
                priority,
                once,
                listener,
            },
        );
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        for entries in self.listeners.values_mut() {
            if let Some(at) = entries.iter().position(|e| e.id == id) {
                entries.remove(at);
                return true;
            }
        }
        false
    }

    /// Listeners for `name` in dispatch order.
    pub fn listeners(&self, name: EventName) -> Vec<Listener> {
        self.listeners
            .get(&name)
            .map(|entries| entries.iter().map(|e| e.listener.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, name: EventName) -> bool {
        self.listeners.get(&name).is_some_and(|e| !e.is_empty())
    }

    pub fn attach(&mut self, subscriber: &dyn Subscriber) -> Vec<ListenerId> {
        subscriber
            .events()
            .into_iter()
            .map(|(listener, priority)| self.on(listener, priority))
            .collect()
    }

    pub fn detach(&mut self, ids: &[ListenerId]) {
        for id in ids {
            self.remove_listener(*id);
        }
    }

    pub(crate) fn plan(&self, name: EventName) -> Vec<PlannedCall> {
        self.listeners
            .get(&name)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| PlannedCall {
                        id: e.id,
                        once: e.once,
                        listener: e.listener.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Emit `event` to this emitter's listeners directly.
    ///
    /// The pipeline uses [`dispatch`] instead so listeners can reach the
    /// emitter through the transaction while it runs.
    pub fn emit<E: Event>(&mut self, event: &mut E) -> ListenerResult {
        for call in self.plan(E::NAME) {
            if event.is_propagation_stopped() {
                break;
            }
            if call.once && !self.remove_listener(call.id) {
                continue;
            }
            E::call(&call.listener, event)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.listeners.iter().map(|(k, v)| (k.as_str(), v.len())))
            .finish()
    }
}

/// Emit `event` through the emitter of the transaction's request.
///
/// The transaction lock is released around every listener call; one-shot
/// listeners are removed immediately before they run.
pub(crate) fn dispatch<E: Event>(tx: &Transaction, event: &mut E) -> ListenerResult {
    let plan = tx.with_request(|r| r.emitter().plan(E::NAME));
    for call in plan {
        if event.is_propagation_stopped() {
            break;
        }
        if call.once && !tx.with_request_mut(|r| r.emitter_mut().remove_listener(call.id)) {
            continue;
        }
        E::call(&call.listener, event)?;
    }
    Ok(())
}

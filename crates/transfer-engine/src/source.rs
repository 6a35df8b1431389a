//! Lazy transaction source.
//!
//! Wraps a (possibly unbounded) sequence of requests and yields one
//! [`Transaction`] per request, attaching the configured listeners to each
//! request's emitter first.

use crate::domain::{ClientHandle, Request, Transaction};
use crate::events::{Listener, Priority};
use crate::ports::TransactionIter;

/// How a listener is attached to every request.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub listener: Listener,
    pub priority: Priority,
    pub once: bool,
}

impl ListenerSpec {
    pub fn new(listener: Listener) -> Self {
        Self {
            listener,
            priority: Priority::default(),
            once: false,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

impl From<Listener> for ListenerSpec {
    fn from(listener: Listener) -> Self {
        Self::new(listener)
    }
}

pub struct TransactionSource<I> {
    requests: I,
    listeners: Vec<ListenerSpec>,
    client: Option<ClientHandle>,
}

impl<I> TransactionSource<I>
where
    I: Iterator<Item = Request>,
{
    pub fn new(requests: impl IntoIterator<Item = Request, IntoIter = I>) -> Self {
        Self {
            requests: requests.into_iter(),
            listeners: Vec::new(),
            client: None,
        }
    }

    /// Attach `spec` to every request. A bare [`Listener`] gets priority 0
    /// and stays registered.
    pub fn with_listener(mut self, spec: impl Into<ListenerSpec>) -> Self {
        self.listeners.push(spec.into());
        self
    }

    pub fn with_client(mut self, client: ClientHandle) -> Self {
        self.client = Some(client);
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<I> TransactionSource<I>
where
    I: Iterator<Item = Request> + Send + 'static,
{
    /// Box the source for [`ParallelAdapter::send_all`](crate::ports::ParallelAdapter::send_all).
    pub fn boxed(self) -> TransactionIter {
        Box::new(self)
    }
}

impl<I> Iterator for TransactionSource<I>
where
    I: Iterator<Item = Request>,
{
    type Item = Transaction;

    fn next(&mut self) -> Option<Transaction> {
        let mut request = self.requests.next()?;
        let emitter = request.emitter_mut();
        for spec in &self.listeners {
            if spec.once {
                emitter.once(spec.listener.clone(), spec.priority);
            } else {
                emitter.on(spec.listener.clone(), spec.priority);
            }
        }
        Some(match &self.client {
            Some(client) => Transaction::with_client(request, client.clone()),
            None => Transaction::new(request),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.requests.size_hint()
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::rc::Rc;

use crate::request::IDBRequest;
use crate::transaction::IDBTransaction;

/// The events the engine asks to have delivered.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventType {
    Success,
    Error,
    Abort,
    Complete,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            EventType::Success => "success",
            EventType::Error => "error",
            EventType::Abort => "abort",
            EventType::Complete => "complete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub enum EventTarget {
    Request(Rc<IDBRequest>),
    Transaction(Rc<IDBTransaction>),
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTarget::Request(request) => write!(f, "Request({})", request.id()),
            EventTarget::Transaction(transaction) => {
                write!(f, "Transaction({})", transaction.serial_number())
            },
        }
    }
}

/// Delivers events to listeners. Listener registration, bubbling and
/// propagation live outside the engine.
pub trait EventDispatcher {
    /// Fires `event` at `target` and reports whether a listener canceled
    /// its default action. Only `error` events are cancelable.
    fn dispatch(&self, target: &EventTarget, event: EventType) -> bool;
}

/// Drops every event; nothing is ever canceled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDispatcher;

impl EventDispatcher for NoopDispatcher {
    fn dispatch(&self, _target: &EventTarget, _event: EventType) -> bool {
        false
    }
}

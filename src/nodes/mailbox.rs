use std::collections::VecDeque;

use crate::messages;

/// Sans-IO mailbox: envelopes waiting to be handled and envelopes waiting
/// to be routed by whoever drives the node. A closed mailbox belongs to a
/// crashed node and neither takes nor emits anything new.
#[derive(Clone, Debug, Default)]
pub struct Mailbox {
    pub inbox: VecDeque<messages::SendableMessage>,
    pub outbox: VecDeque<messages::SendableMessage>,
    closed: bool,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, msg: messages::SendableMessage) {
        if !self.closed {
            self.inbox.push_back(msg);
        }
    }

    pub fn process_latest_in(&mut self) -> Option<messages::SendableMessage> {
        self.inbox.pop_front()
    }

    pub fn send(&mut self, msg: messages::SendableMessage) {
        if !self.closed {
            self.outbox.push_back(msg);
        }
    }

    pub fn deliver_sent(&mut self) -> Option<messages::SendableMessage> {
        self.outbox.pop_front()
    }

    /// Drops every envelope not handled yet and refuses new ones. Envelopes
    /// already queued for sending still go out.
    pub fn close(&mut self) {
        self.closed = true;
        self.inbox.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn clear_outbox(&mut self) {
        self.outbox.clear();
    }
}

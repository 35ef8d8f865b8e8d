pub mod aggregator;
pub mod clock;
pub mod mailbox;
pub mod participant;

use crate::messages;
use crate::types;

/// A node the runtime can pump: it buffers inbound envelopes, handles them
/// one at a time and queues whatever it wants to send.
pub trait Server {
    fn address(&self) -> types::Address;

    fn accept_message(&mut self, msg: messages::SendableMessage);

    /// Handles the oldest buffered envelope. `Ok(false)` means the inbox was
    /// empty; an error means the node cannot go on.
    fn work_on_message(&mut self) -> anyhow::Result<bool>;

    fn deliver_sent(&mut self) -> Option<messages::SendableMessage>;
}

pub mod channel;

use crate::messages;

/// Moves envelopes from the node that queued them to the node they are addressed to.
pub trait Transport {
    fn send(&self, message: messages::SendableMessage);
}

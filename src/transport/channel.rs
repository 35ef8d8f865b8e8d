use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::messages;
use crate::transport::Transport;
use crate::types;

/// Inbound channel of every node of a run. Built once, then only read.
#[derive(Debug)]
pub struct Routes {
    pub participants: Vec<mpsc::UnboundedSender<messages::SendableMessage>>,
    pub aggregator: mpsc::UnboundedSender<messages::SendableMessage>,
    pub driver: mpsc::UnboundedSender<messages::SendableMessage>,
}

/// Delivers envelopes into per-node tokio channels. Each channel is FIFO,
/// so two envelopes from one sender to one receiver keep their order.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    routes: Arc<Routes>,
}

impl ChannelTransport {
    pub fn new(routes: Routes) -> Self {
        ChannelTransport {
            routes: Arc::new(routes),
        }
    }

    fn route(
        &self,
        dst: &types::Address,
    ) -> Option<&mpsc::UnboundedSender<messages::SendableMessage>> {
        match dst {
            types::Address::Participant(id) => self.routes.participants.get(id.index()),
            types::Address::Aggregator => Some(&self.routes.aggregator),
            types::Address::Driver => Some(&self.routes.driver),
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: messages::SendableMessage) {
        trace!("sending message [{}]", message);
        match self.route(&message.dst) {
            None => debug!("no route for message [{}]", message),
            Some(tx) => {
                // A closed channel means the receiving node already stopped
                if let Err(mpsc::error::SendError(message)) = tx.send(message) {
                    debug!("dropping message [{}]: receiver gone", message);
                }
            }
        }
    }
}

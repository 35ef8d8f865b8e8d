use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::errors::ConsensusError;
use crate::messages;
use crate::nodes::aggregator::Aggregator;
use crate::nodes::clock::{ClockProvider, SystemClock};
use crate::nodes::mailbox::Mailbox;
use crate::nodes::participant::Participant;
use crate::nodes::Server;
use crate::transport::channel::{ChannelTransport, Routes};
use crate::transport::Transport;
use crate::types;

/// A running set of participants plus their aggregator, one tokio task each.
/// The handle plays the driver's side: it asks the aggregator to trigger
/// rounds and reads back the decision status.
pub struct Cluster {
    config: types::Config,
    transport: ChannelTransport,
    driver_inbox: mpsc::UnboundedReceiver<messages::SendableMessage>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<anyhow::Result<()>>>,
    next_request: u64,
}

impl Cluster {
    /// Spawns the run with the crash probability given by
    /// `Config::crash_chances` and a wall clock for the aggregator.
    pub fn launch(config: types::Config, chance_to_crash: f64) -> anyhow::Result<Cluster> {
        let chances = config.crash_chances(chance_to_crash);
        Cluster::spawn(config, &chances, Box::new(SystemClock::new()))
    }

    /// Spawns one task per participant, crash probability taken from
    /// `crash_chances` by index, and one for the aggregator. Must be called
    /// from within a tokio runtime.
    pub fn spawn(
        config: types::Config,
        crash_chances: &[f64],
        clock: Box<dyn ClockProvider + Send>,
    ) -> anyhow::Result<Cluster> {
        if config.process_count == 0 {
            anyhow::bail!("a run needs at least one participant");
        }
        if crash_chances.len() != config.process_count {
            anyhow::bail!(
                "{} crash probabilities given for {} participants",
                crash_chances.len(),
                config.process_count
            );
        }

        let mut participants = Vec::with_capacity(config.process_count);
        for (id, chance) in crash_chances.iter().enumerate() {
            participants.push(Participant::new(
                types::ParticipantId::new(id),
                config.clone(),
                *chance,
                Mailbox::new(),
            )?);
        }
        let aggregator = Aggregator::new(config.clone(), Mailbox::new(), clock);

        let mut senders = Vec::with_capacity(config.process_count);
        let mut inboxes = Vec::with_capacity(config.process_count);
        for _ in 0..config.process_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            inboxes.push(rx);
        }
        let (aggregator_tx, aggregator_rx) = mpsc::unbounded_channel();
        let (driver_tx, driver_inbox) = mpsc::unbounded_channel();
        let transport = ChannelTransport::new(Routes {
            participants: senders,
            aggregator: aggregator_tx,
            driver: driver_tx,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(config.process_count + 1);
        for (participant, inbox) in participants.into_iter().zip(inboxes) {
            tasks.push(tokio::spawn(run_node(
                participant,
                inbox,
                transport.clone(),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(run_node(
            aggregator,
            aggregator_rx,
            transport.clone(),
            shutdown_rx,
        )));

        Ok(Cluster {
            config,
            transport,
            driver_inbox,
            shutdown,
            tasks,
            next_request: 0,
        })
    }

    pub fn config(&self) -> &types::Config {
        &self.config
    }

    /// Asks the aggregator to push a round through `leader` and waits, at
    /// most `ask_timeout`, for its status answer. Running out of time yields
    /// a retryable `ConsensusError::Timeout`.
    pub async fn request_round(
        &mut self,
        leader: types::ParticipantId,
    ) -> anyhow::Result<messages::RoundStatusMessage> {
        self.next_request += 1;
        let request_id = self.next_request;
        self.transport.send(messages::SendableMessage {
            src: types::Address::Driver,
            dst: types::Address::Aggregator,
            message: messages::Message::RequestRound(messages::RequestRoundMessage {
                request_id,
                leader,
            }),
        });

        let ask_timeout = self.config.timeout_config.ask_timeout;
        let inbox = &mut self.driver_inbox;
        let answer = tokio::time::timeout(ask_timeout, async {
            while let Some(msg) = inbox.recv().await {
                if let messages::Message::RoundStatus(status) = &msg.message {
                    if status.request_id == request_id {
                        return Some(status.clone());
                    }
                }
                debug!("Driver: discarding stale message [{}]", msg);
            }
            None
        })
        .await;

        match answer {
            Ok(Some(status)) => Ok(status),
            Ok(None) => Err(anyhow::anyhow!("aggregator is gone")),
            Err(_) => Err(ConsensusError::Timeout(ask_timeout).into()),
        }
    }

    /// Stops every node and reports the first node that failed, if any.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.shutdown.send_replace(true);
        let mut result = Ok(());
        for task in self.tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(join_error.into()),
            };
            if let Err(e) = outcome {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Feeds a node from its inbound channel. Every envelope is handled to
/// completion, and everything the node queued is routed, before the next one
/// is taken.
async fn run_node<S: Server + Send + 'static>(
    mut node: S,
    mut inbox: mpsc::UnboundedReceiver<messages::SendableMessage>,
    transport: ChannelTransport,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            received = inbox.recv() => {
                let Some(msg) = received else {
                    return Ok(());
                };
                node.accept_message(msg);
                if let Err(e) = pump(&mut node, &transport) {
                    error!("{}: stopping: {}", node.address(), e);
                    return Err(e);
                }
            }
        }
    }
}

fn pump<S: Server>(node: &mut S, transport: &impl Transport) -> anyhow::Result<()> {
    while node.work_on_message()? {
        while let Some(out) = node.deliver_sent() {
            transport.send(out);
        }
    }
    Ok(())
}

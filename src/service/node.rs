//! A node: one endpoint, one deferred task queue and the roster they consult.
//!
//! The host is expected to call [`Node::deliver`] for inbound bytes and
//! [`Node::tick`] once per frame, never concurrently. [`run_node`] provides
//! that serialization on a tokio task for hosts that do not.

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::protocol::endpoint::Endpoint;
use crate::transport::{PeerRoster, Transport};
use crate::utils::cookies::CookieJar;
use crate::utils::deferred::{DeferredTaskQueue, PollReport};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

/// Work submitted to a running node.
pub type NodeJob<T, R> = Box<dyn FnOnce(&mut Node<T, R>) + Send>;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub cleaned: usize,
    pub tasks: PollReport,
}

#[derive(Debug)]
pub struct Node<T: Transport, R: PeerRoster> {
    endpoint: Endpoint<T>,
    tasks: DeferredTaskQueue,
    roster: R,
}

impl<T: Transport, R: PeerRoster> Node<T, R> {
    pub fn new(endpoint: Endpoint<T>, tasks: DeferredTaskQueue, roster: R) -> Self {
        Self {
            endpoint,
            tasks,
            roster,
        }
    }

    /// Validates the config and wires the endpoint and queue to one metrics collector.
    pub fn from_config(config: &NetworkConfig, transport: T, cookies: CookieJar, roster: R) -> Result<Self> {
        config.validate_strict()?;
        let endpoint = Endpoint::new(&config.endpoint, transport, cookies)?;
        let tasks = DeferredTaskQueue::from_config(&config.tasks).with_metrics(endpoint.metrics().clone());
        Ok(Self::new(endpoint, tasks, roster))
    }

    /// Inbound bytes from the transport.
    pub fn deliver(&mut self, bytes: &[u8]) {
        self.endpoint.handle_message(bytes);
    }

    /// Connection cleanup (when due) and one deferred task round.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        TickReport {
            cleaned: self.endpoint.update(now, &self.roster),
            tasks: self.tasks.poll_at(now),
        }
    }

    pub fn endpoint(&self) -> &Endpoint<T> {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint<T> {
        &mut self.endpoint
    }

    pub fn tasks(&self) -> &DeferredTaskQueue {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut DeferredTaskQueue {
        &mut self.tasks
    }

    pub fn roster(&self) -> &R {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut R {
        &mut self.roster
    }

    pub fn shutdown(&mut self) {
        self.endpoint.shutdown();
        self.tasks.clear();
    }
}

/// Drives a node until shutdown, the inbound channel closing, or the job
/// channel closing. Returns the node, already shut down.
#[instrument(skip_all, fields(local = %node.endpoint().local_id()))]
pub async fn run_node<T, R>(
    mut node: Node<T, R>,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    mut jobs: mpsc::UnboundedReceiver<NodeJob<T, R>>,
    tick_every: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Node<T, R>
where
    T: Transport,
    R: PeerRoster,
{
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down node");
                break;
            }

            message = inbound.recv() => match message {
                Some(bytes) => node.deliver(&bytes),
                None => {
                    info!("Inbound channel closed");
                    break;
                }
            },

            job = jobs.recv() => match job {
                Some(job) => job(&mut node),
                None => {
                    info!("Job channel closed");
                    break;
                }
            },

            _ = ticker.tick() => {
                let report = node.tick(Instant::now());
                if report.cleaned > 0 || report.tasks != PollReport::default() {
                    debug!(cleaned = report.cleaned, completed = report.tasks.completed, expired = report.tasks.expired, failed = report.tasks.failed, "Tick");
                }
            }
        }
    }

    node.shutdown();
    node
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::types::PeerId;
    use crate::transport::local::LocalNetwork;
    use std::collections::HashSet;

    #[test]
    fn test_tick_runs_cleanup_and_tasks() {
        let net = LocalNetwork::new();
        let (transport, _rx) = net.attach(PeerId(1));
        let (_other, _other_rx) = net.attach(PeerId(2));
        let config = NetworkConfig::default_with_overrides(|c| {
            c.endpoint.cleanup_interval = Duration::from_secs(1);
        });
        let roster: HashSet<PeerId> = HashSet::new();
        let mut node = Node::from_config(&config, transport, CookieJar::with_seed(4), roster).unwrap();

        node.endpoint_mut().open(PeerId(2)).unwrap();
        node.tasks_mut().add_fn("wait", || Ok(false)).unwrap();

        let later = Instant::now() + Duration::from_secs(2);
        let report = node.tick(later);
        assert_eq!(report.cleaned, 1);
        assert_eq!(report.tasks.retained, 1);
        assert_eq!(node.endpoint().pending_count(), 0);

        node.shutdown();
        assert!(node.endpoint().is_closed());
        assert!(node.tasks().is_empty());
    }
}

//! # Rendezvous coordinator.
//!
//! One coordinator task per cycle. Branches talk to it only through messages:
//!
//! ```text
//! executor(b) ── Arrived{group, b, release_tx} ──► coordinator
//!                                                    │ arrived[group] += b
//!                                                    │ arrived ⊇ expected[group]?
//!                                                    └─► send(()) on every release_tx
//!                                                        arrived[group] cleared
//! executor(b) ── Departed{b} ──────────────────────► b leaves every expected set
//! ```
//!
//! ## Rules
//! - Expected sets come from the rendezvous actions present when the cycle starts.
//! - A group nobody registered releases the arriving branch at once.
//! - A branch that finishes early is dropped from every group, so the others do not
//!   wait for it forever.
//! - The task exits when every client is dropped.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::events::{Bus, Event, EventKind};

enum Msg {
    Arrived {
        group: String,
        branch: u8,
        release: oneshot::Sender<()>,
    },
    Departed {
        branch: u8,
    },
}

/// Sending side used by executors.
#[derive(Clone, Debug)]
pub(crate) struct RendezvousClient {
    tx: mpsc::UnboundedSender<Msg>,
}

impl std::fmt::Debug for Msg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Msg::Arrived { group, branch, .. } => {
                write!(f, "Arrived({group}, {branch})")
            }
            Msg::Departed { branch } => write!(f, "Departed({branch})"),
        }
    }
}

impl RendezvousClient {
    /// Announces the arrival; the receiver fires when the group is complete.
    pub(crate) fn arrive(&self, group: &str, branch: u8) -> oneshot::Receiver<()> {
        let (release, rx) = oneshot::channel();
        if self
            .tx
            .send(Msg::Arrived {
                group: group.to_string(),
                branch,
                release,
            })
            .is_err()
        {
            warn!(group, branch, "rendezvous coordinator is gone");
        }
        rx
    }

    pub(crate) fn depart(&self, branch: u8) {
        let _ = self.tx.send(Msg::Departed { branch });
    }
}

/// Coordinator state.
#[derive(Debug)]
pub(crate) struct Rendezvous {
    expected: HashMap<String, BTreeSet<u8>>,
    waiting: HashMap<String, Vec<(u8, oneshot::Sender<()>)>>,
    context: Event,
    bus: Bus,
}

impl Rendezvous {
    /// `points` are the `(group, branch)` pairs of every rendezvous action.
    /// `context` carries slot/cycle metadata stamped on published events.
    pub(crate) fn new(points: impl IntoIterator<Item = (String, u8)>, context: Event, bus: Bus) -> Self {
        let mut expected: HashMap<String, BTreeSet<u8>> = HashMap::new();
        for (group, branch) in points {
            expected.entry(group).or_default().insert(branch);
        }
        Self {
            expected,
            waiting: HashMap::new(),
            context,
            bus,
        }
    }

    /// Spawns the coordinator task and returns its client.
    pub(crate) fn spawn(self) -> RendezvousClient {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        RendezvousClient { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            debug!(?msg, "rendezvous message");
            match msg {
                Msg::Arrived {
                    group,
                    branch,
                    release,
                } => self.arrived(group, branch, release),
                Msg::Departed { branch } => self.departed(branch),
            }
        }
    }

    fn arrived(&mut self, group: String, branch: u8, release: oneshot::Sender<()>) {
        self.publish(EventKind::RendezvousArrived, &group, Some(branch));

        if !self.expected.contains_key(&group) {
            warn!(group = %group, branch, "unknown rendezvous group; releasing");
            let _ = release.send(());
            return;
        }
        self.waiting
            .entry(group.clone())
            .or_default()
            .push((branch, release));
        self.try_release(&group);
    }

    fn departed(&mut self, branch: u8) {
        let groups: Vec<String> = self
            .expected
            .iter_mut()
            .filter_map(|(g, set)| set.remove(&branch).then(|| g.clone()))
            .collect();
        for group in groups {
            self.try_release(&group);
        }
    }

    fn try_release(&mut self, group: &str) {
        let Some(expected) = self.expected.get(group) else {
            return;
        };
        let Some(waiting) = self.waiting.get(group) else {
            return;
        };
        let arrived: BTreeSet<u8> = waiting.iter().map(|(b, _)| *b).collect();
        if !expected.is_subset(&arrived) {
            return;
        }

        if let Some(waiting) = self.waiting.remove(group) {
            debug!(group, branches = ?arrived, "rendezvous complete");
            for (_, release) in waiting {
                let _ = release.send(());
            }
            self.publish(EventKind::RendezvousReleased, group, None);
        }
    }

    fn publish(&self, kind: EventKind, group: &str, branch: Option<u8>) {
        let mut ev = self.context.clone().with_group(group);
        ev.kind = kind;
        ev.branch = branch;
        self.bus.publish(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn client(points: &[(&str, u8)]) -> RendezvousClient {
        let points = points.iter().map(|(g, b)| (g.to_string(), *b));
        Rendezvous::new(points, Event::new(EventKind::RendezvousArrived), Bus::new(16)).spawn()
    }

    #[tokio::test]
    async fn test_release_only_when_group_complete() {
        let rdv = client(&[("sync", 1), ("sync", 2)]);
        let mut first = rdv.arrive("sync", 1);

        assert!(timeout(Duration::from_millis(20), &mut first).await.is_err());

        let second = rdv.arrive("sync", 2);
        assert!(second.await.is_ok());
        assert!(first.await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_group_releases_at_once() {
        let rdv = client(&[("sync", 1)]);
        assert!(rdv.arrive("other", 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_departed_branch_no_longer_expected() {
        let rdv = client(&[("sync", 1), ("sync", 2)]);
        let first = rdv.arrive("sync", 1);
        rdv.depart(2);
        assert!(first.await.is_ok());
    }

    #[tokio::test]
    async fn test_group_can_meet_again() {
        let rdv = client(&[("sync", 1), ("sync", 2)]);
        for _ in 0..2 {
            let a = rdv.arrive("sync", 1);
            let b = rdv.arrive("sync", 2);
            assert!(a.await.is_ok() && b.await.is_ok());
        }
    }
}

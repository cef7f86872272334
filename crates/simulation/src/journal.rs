//! Append-only journal of observed network events.
//!
//! Subscribes to the output bus, timestamps each event relative to its
//! own start, and can export the log as `SimUpdate` JSON lines or replay
//! the structural events back onto an input action channel.

use crate::{Bus, SimAction, SimEvent, SimUpdate};
use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::debug;

/// One recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Milliseconds since the journal started.
    pub at_ms: u64,
    /// The observed event.
    pub event: SimEvent,
}

/// Append-only, replayable event log.
pub struct Journal {
    started: Instant,
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Record events from `bus` on a collector thread until the bus
    /// closes.
    pub fn attach(self: &Arc<Self>, bus: &Bus<SimEvent>) -> JoinHandle<()> {
        let journal = self.clone();
        let events = bus.subscribe();
        std::thread::Builder::new()
            .name("journal".into())
            .spawn(move || {
                for event in events {
                    journal.record(event);
                }
            })
            .expect("failed to spawn journal collector")
    }

    /// Append one event.
    pub fn record(&self, event: SimEvent) {
        let entry = JournalEntry {
            at_ms: self.started.elapsed().as_millis() as u64,
            event,
        };
        self.entries.lock().expect("journal lock poisoned").push(entry);
    }

    /// Snapshot of all entries so far.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().expect("journal lock poisoned").clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("journal lock poisoned").len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export as `SimUpdate` JSON lines.
    pub fn export_json(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in self.entries().iter() {
            let update = SimUpdate::from_event(&entry.event)?;
            out.push_str(&serde_json::to_string(&update)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Replay the recorded structural events as actions. Message events
    /// are observations and are skipped. Returns how many actions were
    /// posted.
    pub fn replay(&self, actions: &Sender<SimAction>) -> usize {
        let mut posted = 0;
        for entry in self.entries() {
            if let Some(action) = entry.event.as_action() {
                if actions.send(action).is_err() {
                    break;
                }
                posted += 1;
            }
        }
        debug!(posted, "journal replayed");
        posted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkmesh_types::NodeId;
    use crossbeam::channel::unbounded;

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes(&[byte; 32])
    }

    #[test]
    fn test_record_and_export() {
        let journal = Journal::new();
        journal.record(SimEvent::Node { id: id(1), up: true });
        journal.record(SimEvent::Msg {
            one: id(1),
            other: id(2),
            code: 5,
        });
        assert_eq!(journal.len(), 2);

        let json = journal.export_json().unwrap();
        let lines: Vec<&str> = json.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"node\""));
        assert!(lines[1].contains("\"event\":\"msg\""));
    }

    #[test]
    fn test_replay_skips_msg_events() {
        let journal = Journal::new();
        journal.record(SimEvent::Node { id: id(1), up: true });
        journal.record(SimEvent::Msg {
            one: id(1),
            other: id(2),
            code: 6,
        });
        journal.record(SimEvent::Conn {
            one: id(1),
            other: id(2),
            up: true,
            reverse: false,
        });

        let (tx, rx) = unbounded();
        assert_eq!(journal.replay(&tx), 2);
        assert_eq!(rx.recv().unwrap(), SimAction::NodeUp(id(1)));
        assert_eq!(rx.recv().unwrap(), SimAction::ConnUp(id(1), id(2)));
    }

    #[test]
    fn test_attach_collects_from_bus() {
        let bus = Bus::new();
        let journal = Journal::new();
        let collector = journal.attach(&bus);
        bus.post(SimEvent::Node { id: id(3), up: true });
        bus.post(SimEvent::Node { id: id(3), up: false });
        bus.close();
        collector.join().unwrap();
        assert_eq!(journal.len(), 2);
    }
}

//! Parameter updates from the UI thread to the audio thread.
//!
//! The UI side holds a [`FieldSender`]; the runtime holds the single
//! [`FieldReceiver`] and drains it at the start of every audio block.
//! Sending never blocks. Updates are only accepted while a script is
//! running, and each one is stamped with the compile generation it was
//! made against so that edits aimed at a previous script version can be
//! discarded on the audio side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;

use crate::attributes::FieldKind;

/// New value for a script global. The variant is the update's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Float(f32),
    Int(i32),
    Bool(bool),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Bool(_) => FieldKind::Bool,
        }
    }

    /// Parse `text` as a value of `kind`.
    pub fn parse(kind: FieldKind, text: &str) -> Option<Self> {
        let text = text.trim();
        match kind {
            FieldKind::Float => text.parse().ok().map(FieldValue::Float),
            FieldKind::Int => text.parse().ok().map(FieldValue::Int),
            FieldKind::Bool => match text {
                "true" => Some(FieldValue::Bool(true)),
                "false" => Some(FieldValue::Bool(false)),
                _ => None,
            },
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// A queued edit of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub name: String,
    pub value: FieldValue,
    /// Compile generation the edit was made against.
    pub generation: u64,
}

/// Lock-free view of the runtime state shared with the UI side.
#[derive(Debug, Default)]
pub(crate) struct Liveness {
    running: AtomicBool,
    generation: AtomicU64,
}

impl Liveness {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new compile generation and return it.
    pub(crate) fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Create a connected sender/receiver pair.
pub(crate) fn channel(liveness: Arc<Liveness>) -> (FieldSender, FieldReceiver) {
    let (tx, rx) = channel::unbounded();
    (FieldSender { tx, liveness }, FieldReceiver { rx })
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FieldSender {
    tx: Sender<FieldUpdate>,
    liveness: Arc<Liveness>,
}

impl FieldSender {
    /// Queue an edit. Returns `false` without queueing when no script is
    /// running or the runtime has been dropped.
    pub fn send(&self, name: &str, value: FieldValue) -> bool {
        if !self.liveness.is_running() {
            return false;
        }
        let update = FieldUpdate {
            name: name.to_string(),
            value,
            generation: self.liveness.generation(),
        };
        self.tx.send(update).is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }
}

/// Consumer handle, owned by the runtime.
#[derive(Debug)]
pub(crate) struct FieldReceiver {
    rx: Receiver<FieldUpdate>,
}

impl FieldReceiver {
    /// Hand every update queued so far to `apply`, oldest first. Updates
    /// sent while draining wait for the next call.
    pub(crate) fn drain(&self, mut apply: impl FnMut(FieldUpdate)) -> usize {
        let pending = self.rx.len();
        let mut drained = 0;
        for update in self.rx.try_iter().take(pending) {
            apply(update);
            drained += 1;
        }
        drained
    }

    pub(crate) fn discard(&self) -> usize {
        self.drain(|_| {})
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_pair() -> (FieldSender, FieldReceiver, Arc<Liveness>) {
        let liveness = Arc::new(Liveness::default());
        liveness.advance_generation();
        liveness.set_running(true);
        let (tx, rx) = channel(liveness.clone());
        (tx, rx, liveness)
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx, _) = running_pair();
        assert!(tx.send("a", FieldValue::Float(1.0)));
        assert!(tx.send("b", FieldValue::Int(2)));
        assert!(tx.send("c", FieldValue::Bool(true)));

        let mut seen = Vec::new();
        assert_eq!(rx.drain(|u| seen.push(u.name)), 3);
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn test_fifo_across_producer_threads() {
        let (tx, rx, _) = running_pair();
        let producer = {
            let tx = tx.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    tx.send("n", FieldValue::Int(i));
                }
            })
        };
        producer.join().unwrap();

        let mut values = Vec::new();
        rx.drain(|u| {
            if let FieldValue::Int(v) = u.value {
                values.push(v);
            }
        });
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_not_queued_while_idle() {
        let (tx, rx, liveness) = running_pair();
        liveness.set_running(false);
        assert!(!tx.send("gain", FieldValue::Float(0.5)));
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn test_updates_carry_generation() {
        let (tx, rx, liveness) = running_pair();
        tx.send("gain", FieldValue::Float(0.1));
        liveness.advance_generation();
        tx.send("gain", FieldValue::Float(0.2));

        let mut generations = Vec::new();
        rx.drain(|u| generations.push(u.generation));
        assert_eq!(generations, vec![1, 2]);
    }

    #[test]
    fn test_discard() {
        let (tx, rx, _) = running_pair();
        tx.send("a", FieldValue::Bool(false));
        tx.send("b", FieldValue::Bool(true));
        assert_eq!(rx.discard(), 2);
        assert_eq!(rx.drain(|_| panic!("queue should be empty")), 0);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(FieldValue::parse(FieldKind::Float, "0.5"), Some(FieldValue::Float(0.5)));
        assert_eq!(FieldValue::parse(FieldKind::Int, " 3 "), Some(FieldValue::Int(3)));
        assert_eq!(FieldValue::parse(FieldKind::Int, "3.5"), None);
        assert_eq!(FieldValue::parse(FieldKind::Bool, "true"), Some(FieldValue::Bool(true)));
        assert_eq!(FieldValue::parse(FieldKind::Bool, "yes"), None);
    }
}

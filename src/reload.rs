//! Build-completion notifications for hot reload.
//!
//! A single loop thread owns the subscriber set; register, unregister and
//! broadcast all arrive over one internal channel, so no caller ever touches
//! the set directly. A disconnected client drops its [`Subscription`], which
//! unregisters it; broadcast never tries to detect dead subscribers itself.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

enum Msg {
    Register(u64, Sender<String>),
    Unregister(u64),
    Broadcast(String),
}

/// Handle to the notifier loop; cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Msg>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || run_loop(rx));
        Self { tx }
    }

    /// Register a new subscriber and hand back its event stream.
    pub fn subscribe(&self) -> Subscription {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let _ = self.tx.send(Msg::Register(id, tx));
        Subscription {
            id,
            events: rx,
            notifier: self.clone(),
        }
    }

    /// Send an event to every currently registered subscriber.
    pub fn broadcast(&self, event: &str) {
        let _ = self.tx.send(Msg::Broadcast(event.to_string()));
    }

    fn unregister(&self, id: u64) {
        let _ = self.tx.send(Msg::Unregister(id));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's event stream; unregisters itself on drop.
pub struct Subscription {
    id: u64,
    pub events: Receiver<String>,
    notifier: Notifier,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.unregister(self.id);
    }
}

fn run_loop(rx: Receiver<Msg>) {
    let mut subscribers: FxHashMap<u64, Sender<String>> = FxHashMap::default();
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Register(id, tx) => {
                subscribers.insert(id, tx);
            }
            Msg::Unregister(id) => {
                subscribers.remove(&id);
            }
            Msg::Broadcast(event) => {
                for tx in subscribers.values() {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }
}

use tokio::sync::watch;

/// The sending half of a Signal. Firing is idempotent.
pub struct Trigger {
    tx: watch::Sender<bool>,
}

impl Trigger {
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

/// A fire-once event, the channel-close idiom for "ready" and "shutting down".
///
/// Cloning is cheap and every clone observes the same event. If the Trigger
/// is dropped without firing, the signal never fires and wait() parks forever;
/// that is what a lifetime that never ends looks like to the select site.
#[derive(Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    pub fn new() -> (Trigger, Signal) {
        let (tx, rx) = watch::channel(false);
        (Trigger { tx }, Signal { rx })
    }

    /// An already-fired Signal, so callers that don't need to wait can use
    /// the same selection site as those that do.
    pub fn fired() -> Signal {
        let (tx, rx) = watch::channel(true);
        drop(tx);
        Signal { rx }
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without firing: this signal can never fire.
                futures::future::pending::<()>().await;
            }
        }
    }
}

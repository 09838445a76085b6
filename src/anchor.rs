//! Tracks the send transfers in flight, so draw-down can find them

use std::{collections::BTreeSet, time::Duration, time::Instant};

use parking_lot::{Condvar, Mutex};

use crate::transfer::TransferId;

#[derive(Debug, Default)]
pub(crate) struct Anchor {
    anchored: Mutex<BTreeSet<TransferId>>,
    empty: Condvar,
}

impl Anchor {
    pub fn anchor(&self, id: TransferId) {
        self.anchored.lock().insert(id);
    }

    /// Forget a transfer, waking draw-down if it was the last one
    pub fn unanchor(&self, id: TransferId) {
        let mut anchored = self.anchored.lock();
        if anchored.remove(&id) && anchored.is_empty() {
            self.empty.notify_all();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.anchored.lock().len()
    }

    /// Snapshot of the anchored transfers
    pub fn ids(&self) -> Vec<TransferId> {
        self.anchored.lock().iter().copied().collect()
    }

    /// Wait for the anchor to drain
    ///
    /// Returns `false` if transfers remain after `timeout`.
    pub fn wait_empty_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut anchored = self.anchored.lock();
        while !anchored.is_empty() {
            if self.empty.wait_until(&mut anchored, deadline).timed_out() {
                return anchored.is_empty();
            }
        }
        true
    }

    /// Wait for the anchor to drain, however long it takes
    pub fn wait_empty(&self) {
        let mut anchored = self.anchored.lock();
        while !anchored.is_empty() {
            self.empty.wait(&mut anchored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Anchor;
    use crate::transfer::TransferId;
    use std::{thread, time::Duration};

    #[test]
    fn drains() {
        let anchor = Anchor::default();
        anchor.anchor(TransferId(1));
        anchor.anchor(TransferId(2));
        assert_eq!(anchor.ids(), [TransferId(1), TransferId(2)]);
        assert!(!anchor.wait_empty_timeout(Duration::from_millis(10)));

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(10));
                anchor.unanchor(TransferId(2));
                anchor.unanchor(TransferId(1));
            });
            assert!(anchor.wait_empty_timeout(Duration::from_secs(5)));
        });
        assert_eq!(anchor.len(), 0);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let anchor = Anchor::default();
        anchor.unanchor(TransferId(3));
        anchor.wait_empty();
        assert!(anchor.wait_empty_timeout(Duration::ZERO));
    }
}

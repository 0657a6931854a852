//! Single-slot broadcast channels.
//!
//! A [`Latest`] holds exactly one value. Publishing replaces it wholesale;
//! readers always observe a complete snapshot and never a backlog. A slow or
//! absent reader never blocks the publisher. The same abstraction carries
//! captured frames, focus states, preview images and moods.

use tokio::sync::watch;

/// Publishing side of a single-slot broadcast.
#[derive(Debug)]
pub struct Latest<T> {
    tx: watch::Sender<T>,
}

/// Subscribing side of a single-slot broadcast.
#[derive(Debug, Clone)]
pub struct LatestReceiver<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Latest<T> {
    /// Create a slot holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the current value. Succeeds with or without subscribers.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Replace the current value only if `accept` approves of the current one.
    ///
    /// Returns whether the value was published. Used to keep published
    /// timestamps monotonic.
    pub fn publish_if(&self, value: T, accept: impl FnOnce(&T) -> bool) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|current| {
            if accept(current) {
                if let Some(next) = value.take() {
                    *current = next;
                }
                true
            } else {
                false
            }
        })
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// New subscriber. It starts out having seen the current value.
    pub fn subscribe(&self) -> LatestReceiver<T> {
        LatestReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Default> Default for Latest<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> LatestReceiver<T> {
    /// Clone of the current value without marking it seen.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Clone of the current value, marking it seen.
    pub fn take(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a value newer than the last one seen.
    ///
    /// Intermediate values published while the caller was busy are skipped.
    /// Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Whether a value newer than the last one seen is waiting.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_only_see_the_newest_value() {
        let slot = Latest::new(0u32);
        let mut rx = slot.subscribe();
        for value in 1..=100 {
            slot.publish(value);
        }
        assert!(rx.has_changed());
        assert_eq!(rx.take(), 100);
        assert!(!rx.has_changed());
        assert_eq!(slot.get(), 100);
    }

    #[test]
    fn publishing_without_subscribers_succeeds() {
        let slot = Latest::new(String::from("a"));
        assert_eq!(slot.subscriber_count(), 0);
        slot.publish("b".to_string());
        assert_eq!(slot.get(), "b");
    }

    #[test]
    fn publish_if_rejects_without_notifying() {
        let slot = Latest::new(10u64);
        let rx = slot.subscribe();

        assert!(!slot.publish_if(5, |current| *current <= 5));
        assert!(!rx.has_changed());
        assert_eq!(slot.get(), 10);

        assert!(slot.publish_if(12, |current| *current <= 12));
        assert!(rx.has_changed());
        assert_eq!(rx.get(), 12);
    }

    #[tokio::test]
    async fn changed_skips_intermediate_values() {
        let slot = Latest::new(0u32);
        let mut rx = slot.subscribe();
        slot.publish(1);
        slot.publish(2);
        slot.publish(3);
        assert_eq!(rx.changed().await, Some(3));

        drop(slot);
        assert_eq!(rx.changed().await, None);
    }
}

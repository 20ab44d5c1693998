// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Mutex;

use codec::PublishPacket;
use tokio::sync::mpsc;

/// Named subscribers to inbound PUBLISH packets.
///
/// Registration is insertion-ordered and rebuilt copy-on-write, so delivery always
/// observes one consistent snapshot even if a listener is added or removed concurrently
/// from another task. A listener whose receiver has been dropped is left registered
/// until explicitly removed; the send simply fails silently.
#[derive(Default)]
pub(crate) struct PublishListeners {
    entries: Mutex<Vec<(String, mpsc::UnboundedSender<PublishPacket>)>>,
}

impl PublishListeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, name: &str, sender: mpsc::UnboundedSender<PublishPacket>) {
        let mut entries = self.entries.lock().expect("publish listeners lock poisoned");
        entries.retain(|(existing, _)| existing != name);
        entries.push((name.to_owned(), sender));
    }

    pub(crate) fn remove(&self, name: &str) {
        let mut entries = self.entries.lock().expect("publish listeners lock poisoned");
        entries.retain(|(existing, _)| existing != name);
    }

    /// Deliver `packet` to every registered listener.
    pub(crate) fn deliver(&self, packet: &PublishPacket) {
        let snapshot: Vec<_> = {
            let entries = self.entries.lock().expect("publish listeners lock poisoned");
            entries.iter().map(|(_, sender)| sender.clone()).collect()
        };
        for sender in snapshot {
            let _ = sender.send(packet.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use codec::QoS;
    use tokio::sync::mpsc;

    use super::*;

    fn publish() -> PublishPacket {
        PublishPacket::new("a/b", QoS::AtMostOnce, b"hi").unwrap()
    }

    #[tokio::test]
    async fn test_deliver_reaches_every_registered_listener() {
        let listeners = PublishListeners::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        listeners.add("one", tx1);
        listeners.add("two", tx2);

        listeners.deliver(&publish());

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_add_with_same_name_replaces_previous_listener() {
        let listeners = PublishListeners::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        listeners.add("one", tx1);
        listeners.add("one", tx2);

        listeners.deliver(&publish());

        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_remove_stops_future_delivery() {
        let listeners = PublishListeners::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        listeners.add("one", tx);
        listeners.remove("one");

        listeners.deliver(&publish());

        assert!(rx.recv().await.is_none());
    }
}

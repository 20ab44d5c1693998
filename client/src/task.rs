// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, ErrorKind};
use crate::packet::InboundPacket;

/// What a task's predicate decides about one inbound packet.
pub(crate) enum PredicateOutcome {
    /// This packet completes the task.
    Match,
    /// This packet is unrelated to the task; keep waiting.
    Ignore,
    /// This packet is itself a protocol error specific to this task; fail just it.
    Err(Error),
}

/// Inspects one inbound packet and decides whether it completes a pending request.
pub(crate) type Predicate = Box<dyn Fn(&InboundPacket) -> PredicateOutcome + Send>;

struct Task {
    predicate: Predicate,
    deadline: Option<Instant>,
    fatal_on_timeout: bool,
    completion: oneshot::Sender<Result<InboundPacket, Error>>,
}

/// Per-connection map from outstanding requests to the predicates that complete them.
///
/// Matching proceeds in registration order: the first task whose predicate returns
/// `Match` wins. The registry holds no reference to the transport; the connection loop
/// owns it and is responsible for feeding it inbound packets and driving timeouts.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new pending task, returning the receiver its completion arrives on.
    ///
    /// `fatal_on_timeout` is set for PINGREQ tasks: a missed PINGRESP is always
    /// connection-fatal, whichever call (automatic keep-alive or a manual `pingreq()`)
    /// sent the request.
    pub(crate) fn register(
        &mut self,
        predicate: Predicate,
        deadline: Option<Instant>,
        fatal_on_timeout: bool,
    ) -> oneshot::Receiver<Result<InboundPacket, Error>> {
        let (completion, receiver) = oneshot::channel();
        self.tasks.push(Task {
            predicate,
            deadline,
            fatal_on_timeout,
            completion,
        });
        receiver
    }

    /// Offer `packet` to every pending task in registration order.
    ///
    /// Returns the packet back if no task matched it.
    pub(crate) fn dispatch(&mut self, packet: InboundPacket) -> Option<InboundPacket> {
        for index in 0..self.tasks.len() {
            match (self.tasks[index].predicate)(&packet) {
                PredicateOutcome::Match => {
                    let task = self.tasks.remove(index);
                    let _ = task.completion.send(Ok(packet));
                    return None;
                }
                PredicateOutcome::Err(err) => {
                    let task = self.tasks.remove(index);
                    let _ = task.completion.send(Err(err));
                    return None;
                }
                PredicateOutcome::Ignore => {}
            }
        }
        Some(packet)
    }

    #[must_use]
    pub(crate) fn earliest_deadline(&self) -> Option<Instant> {
        self.tasks.iter().filter_map(|task| task.deadline).min()
    }

    /// Complete every task whose deadline has passed with `Timeout`.
    ///
    /// Returns `true` if one of the expired tasks is fatal on timeout, in which case the
    /// caller must tear down the connection with `KeepAliveTimeout`.
    pub(crate) fn expire_due(&mut self, now: Instant) -> bool {
        let mut fatal = false;
        let mut index = 0;
        while index < self.tasks.len() {
            let expired = match self.tasks[index].deadline {
                Some(deadline) => deadline <= now,
                None => false,
            };
            if expired {
                let task = self.tasks.remove(index);
                fatal |= task.fatal_on_timeout;
                let _ = task
                    .completion
                    .send(Err(Error::new(ErrorKind::Timeout, "request timed out")));
            } else {
                index += 1;
            }
        }
        fatal
    }

    /// Complete every outstanding task with `ConnectionClosed`, draining the registry.
    pub(crate) fn cancel_all(&mut self, cause: &Error) {
        for task in self.tasks.drain(..) {
            let _ = task.completion.send(Err(Error::from_string(
                ErrorKind::ConnectionClosed,
                format!("connection closed: {cause}"),
            )));
        }
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use codec::{ConnectAckPacket, ConnectReturnCode};

    use super::*;

    fn connack() -> InboundPacket {
        InboundPacket::ConnectAck(ConnectAckPacket::new(false, ConnectReturnCode::Accepted))
    }

    #[tokio::test]
    async fn test_dispatch_matches_in_registration_order() {
        let mut registry = TaskRegistry::new();
        let first = registry.register(
            Box::new(|_packet| PredicateOutcome::Match),
            None,
            false,
        );
        let second = registry.register(
            Box::new(|_packet| PredicateOutcome::Match),
            None,
            false,
        );

        let leftover = registry.dispatch(connack());
        assert!(leftover.is_none());

        let first_result = first.await.unwrap();
        assert!(matches!(first_result, Ok(InboundPacket::ConnectAck(_))));

        // Second task is still pending; registry should have one left.
        assert!(!registry.is_empty());
        drop(second);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_return_packet_to_caller_when_no_match() {
        let mut registry = TaskRegistry::new();
        let _receiver = registry.register(
            Box::new(|_packet| PredicateOutcome::Ignore),
            None,
            false,
        );
        let leftover = registry.dispatch(connack());
        assert!(leftover.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_err_outcome_fails_only_that_task() {
        let mut registry = TaskRegistry::new();
        let receiver = registry.register(
            Box::new(|_packet| {
                PredicateOutcome::Err(Error::new(ErrorKind::UnexpectedPacket, "bad"))
            }),
            None,
            false,
        );
        registry.dispatch(connack());
        let result = receiver.await.unwrap();
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_expire_due_times_out_and_reports_fatal() {
        tokio::time::pause();
        let mut registry = TaskRegistry::new();
        let now = Instant::now();
        let non_fatal = registry.register(Box::new(|_| PredicateOutcome::Ignore), Some(now), false);
        let fatal = registry.register(Box::new(|_| PredicateOutcome::Ignore), Some(now), true);

        let is_fatal = registry.expire_due(now);
        assert!(is_fatal);
        assert!(registry.is_empty());

        assert!(non_fatal.await.unwrap().is_err());
        assert!(fatal.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_cancel_all_drains_with_connection_closed() {
        let mut registry = TaskRegistry::new();
        let receiver = registry.register(Box::new(|_| PredicateOutcome::Ignore), None, false);
        registry.cancel_all(&Error::new(ErrorKind::TransportError, "closed"));
        assert!(registry.is_empty());
        let result = receiver.await.unwrap();
        match result {
            Err(err) => assert!(matches!(err.kind(), ErrorKind::ConnectionClosed)),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_earliest_deadline_picks_minimum() {
        let mut registry = TaskRegistry::new();
        let now = Instant::now();
        let later = now + std::time::Duration::from_secs(10);
        let _a = registry.register(Box::new(|_| PredicateOutcome::Ignore), Some(later), false);
        let _b = registry.register(Box::new(|_| PredicateOutcome::Ignore), Some(now), false);
        assert_eq!(registry.earliest_deadline(), Some(now));
    }
}

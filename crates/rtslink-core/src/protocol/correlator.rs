//! Request Correlator
//!
//! Maps each outstanding command to a single pending continuation. The table
//! has exactly one slot per `CommandKind`; responses carry no request id, so a
//! response resolves whatever is pending under its kind.
//!
//! Each issued request receives a `Ticket`. Cancelling with a stale ticket is a
//! no-op, which keeps a timed-out caller from clearing a newer request of the
//! same kind.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{CommandError, SessionError};

use super::messages::{CommandKind, Response};

/// Outcome delivered to a waiting caller
pub type CommandResult = core::result::Result<Response, CommandError>;

// ----------------------------------------------------------------------------
// Policy and Tickets
// ----------------------------------------------------------------------------

/// What to do when a kind already has a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Replace the pending entry; the older caller fails with `Superseded`
    #[default]
    Replace,
    /// Refuse the new request with a busy error
    RejectBusy,
}

/// Identity of one issued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Pending Response Future
// ----------------------------------------------------------------------------

/// Future resolving once the correlator completes or fails the request
#[derive(Debug)]
pub struct PendingResponse {
    kind: CommandKind,
    receiver: oneshot::Receiver<CommandResult>,
}

impl PendingResponse {
    /// Kind this response is waiting on
    pub fn kind(&self) -> CommandKind {
        self.kind
    }
}

impl Future for PendingResponse {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without an answer: the session went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommandError::Disconnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ----------------------------------------------------------------------------
// Correlator
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct PendingEntry {
    ticket: Ticket,
    sender: oneshot::Sender<CommandResult>,
}

/// Fixed table of pending continuations, one slot per command kind
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    slots: [Option<PendingEntry>; CommandKind::COUNT],
    next_ticket: u64,
}

impl RequestCorrelator {
    /// Create a new empty correlator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation for `kind`
    pub fn issue(
        &mut self,
        kind: CommandKind,
        policy: OverlapPolicy,
    ) -> core::result::Result<(Ticket, PendingResponse), SessionError> {
        if let Some(existing) = self.slots[kind.index()].take() {
            match policy {
                OverlapPolicy::RejectBusy => {
                    self.slots[kind.index()] = Some(existing);
                    return Err(SessionError::Busy { kind });
                }
                OverlapPolicy::Replace => {
                    warn!(
                        "Overwriting pending {} request (ticket {})",
                        kind,
                        existing.ticket.value()
                    );
                    let _ = existing.sender.send(Err(CommandError::Superseded { kind }));
                }
            }
        }

        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        let (sender, receiver) = oneshot::channel();
        self.slots[kind.index()] = Some(PendingEntry { ticket, sender });

        Ok((ticket, PendingResponse { kind, receiver }))
    }

    /// Resolve the pending request of `kind`; returns false if none was pending
    pub fn complete(&mut self, kind: CommandKind, response: Response) -> bool {
        self.resolve(kind, Ok(response))
    }

    /// Fail the pending request of `kind`; returns false if none was pending
    pub fn fail(&mut self, kind: CommandKind, error: CommandError) -> bool {
        self.resolve(kind, Err(error))
    }

    /// Fail the most recently issued request that is still pending
    pub fn fail_most_recent<F>(&mut self, make_error: F) -> Option<CommandKind>
    where
        F: FnOnce(CommandKind) -> CommandError,
    {
        let kind = self.most_recent()?;
        self.fail(kind, make_error(kind));
        Some(kind)
    }

    /// Remove the entry for `kind` if it still belongs to `ticket`
    pub fn cancel(&mut self, kind: CommandKind, ticket: Ticket) -> bool {
        let owned = self.slots[kind.index()]
            .as_ref()
            .is_some_and(|entry| entry.ticket == ticket);
        if owned {
            debug!("Cleared pending {} request (ticket {})", kind, ticket.value());
            self.slots[kind.index()] = None;
        }
        owned
    }

    /// Fail every pending request, used on teardown
    pub fn fail_all(&mut self, error: CommandError) -> usize {
        let mut failed = 0;
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.take() {
                let _ = entry.sender.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// Whether a request of `kind` is pending
    pub fn is_pending(&self, kind: CommandKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Number of pending requests
    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Kind of the most recently issued pending request
    pub fn most_recent(&self) -> Option<CommandKind> {
        CommandKind::ALL
            .iter()
            .filter_map(|kind| {
                self.slots[kind.index()]
                    .as_ref()
                    .map(|entry| (entry.ticket, *kind))
            })
            .max_by_key(|(ticket, _)| *ticket)
            .map(|(_, kind)| kind)
    }

    fn resolve(&mut self, kind: CommandKind, result: CommandResult) -> bool {
        match self.slots[kind.index()].take() {
            Some(entry) => {
                if entry.sender.send(result).is_err() {
                    debug!("Caller for {} request stopped waiting", kind);
                }
                true
            }
            None => {
                debug!("No pending {} request, response ignored", kind);
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::RtsMessage;
    use futures::FutureExt;

    fn status_response() -> Response {
        Response::Message(RtsMessage::AppConnectionIdResponse)
    }

    #[test]
    fn test_complete_resolves_waiter() {
        let mut correlator = RequestCorrelator::new();
        let (_, pending) = correlator
            .issue(CommandKind::ConnectionId, OverlapPolicy::Replace)
            .unwrap();

        assert!(correlator.complete(CommandKind::ConnectionId, status_response()));
        assert_eq!(pending.now_or_never().unwrap(), Ok(status_response()));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_absent_entry_ignored() {
        let mut correlator = RequestCorrelator::new();
        assert!(!correlator.complete(CommandKind::Status, status_response()));
    }

    #[test]
    fn test_replace_supersedes_first_caller() {
        let mut correlator = RequestCorrelator::new();
        let (_, first) = correlator
            .issue(CommandKind::Status, OverlapPolicy::Replace)
            .unwrap();
        let (_, second) = correlator
            .issue(CommandKind::Status, OverlapPolicy::Replace)
            .unwrap();
        assert_eq!(correlator.pending_count(), 1);

        correlator.complete(CommandKind::Status, status_response());
        assert_eq!(
            first.now_or_never().unwrap(),
            Err(CommandError::Superseded {
                kind: CommandKind::Status
            })
        );
        assert_eq!(second.now_or_never().unwrap(), Ok(status_response()));
    }

    #[test]
    fn test_reject_busy_keeps_first() {
        let mut correlator = RequestCorrelator::new();
        let (_, first) = correlator
            .issue(CommandKind::Status, OverlapPolicy::RejectBusy)
            .unwrap();
        assert!(matches!(
            correlator.issue(CommandKind::Status, OverlapPolicy::RejectBusy),
            Err(SessionError::Busy {
                kind: CommandKind::Status
            })
        ));

        correlator.complete(CommandKind::Status, status_response());
        assert_eq!(first.now_or_never().unwrap(), Ok(status_response()));
    }

    #[test]
    fn test_stale_ticket_cancel_is_noop() {
        let mut correlator = RequestCorrelator::new();
        let (old, _first) = correlator
            .issue(CommandKind::WifiScan, OverlapPolicy::Replace)
            .unwrap();
        let (new, _second) = correlator
            .issue(CommandKind::WifiScan, OverlapPolicy::Replace)
            .unwrap();

        assert!(!correlator.cancel(CommandKind::WifiScan, old));
        assert!(correlator.is_pending(CommandKind::WifiScan));
        assert!(correlator.cancel(CommandKind::WifiScan, new));
        assert!(!correlator.is_pending(CommandKind::WifiScan));
    }

    #[test]
    fn test_fail_most_recent() {
        let mut correlator = RequestCorrelator::new();
        let (_, scan) = correlator
            .issue(CommandKind::WifiScan, OverlapPolicy::Replace)
            .unwrap();
        let (_, status) = correlator
            .issue(CommandKind::Status, OverlapPolicy::Replace)
            .unwrap();

        let failed = correlator.fail_most_recent(|kind| CommandError::Rejected {
            kind,
            code: 3,
            message: "busy".into(),
        });
        assert_eq!(failed, Some(CommandKind::Status));
        assert!(matches!(
            status.now_or_never().unwrap(),
            Err(CommandError::Rejected { code: 3, .. })
        ));
        assert!(correlator.is_pending(CommandKind::WifiScan));
        drop(scan);
    }

    #[test]
    fn test_fail_all_on_teardown() {
        let mut correlator = RequestCorrelator::new();
        let (_, a) = correlator
            .issue(CommandKind::WifiIp, OverlapPolicy::Replace)
            .unwrap();
        let (_, b) = correlator
            .issue(CommandKind::Logs, OverlapPolicy::Replace)
            .unwrap();

        assert_eq!(correlator.fail_all(CommandError::Disconnected), 2);
        assert_eq!(a.now_or_never().unwrap(), Err(CommandError::Disconnected));
        assert_eq!(b.now_or_never().unwrap(), Err(CommandError::Disconnected));
    }

    #[test]
    fn test_dropped_correlator_disconnects_waiter() {
        let mut correlator = RequestCorrelator::new();
        let (_, pending) = correlator
            .issue(CommandKind::Ota, OverlapPolicy::Replace)
            .unwrap();
        drop(correlator);
        assert_eq!(pending.now_or_never().unwrap(), Err(CommandError::Disconnected));
    }
}

//! Orders replies out of the raw byte stream.
//!
//! The bulb protocol has no reply framing: the device answers every command
//! in issue order with a fixed, agreed-upon number of bytes. The matcher
//! holds a FIFO queue of those expectations and slices the accumulating
//! receive buffer against the head entry as bytes arrive.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::sync::oneshot;

/// Accumulation beyond this means the device sent bytes nothing is
/// waiting for.
const UNSOLICITED_WARN_LEN: usize = 1024;

struct Pending {
    len: usize,
    tx: oneshot::Sender<Bytes>,
}

/// A strict-FIFO matcher of expected reply lengths against received bytes.
///
/// Out-of-order device replies cannot be represented; the protocol contract
/// is that replies arrive in command order with exact byte counts.
#[derive(Default)]
pub struct ResponseMatcher {
    buffer: BytesMut,
    pending: VecDeque<Pending>,
}

impl ResponseMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an expectation for the next `len` reply bytes.
    ///
    /// The returned receiver resolves with exactly `len` bytes once they have
    /// arrived, or with a channel error if the session is torn down first.
    pub fn expect(&mut self, len: usize) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending.push_back(Pending { len, tx });
        rx
    }

    /// Feed newly received bytes and complete every expectation the buffer
    /// now covers, in queue order.
    ///
    /// A buffer shorter than the head expectation simply makes no progress;
    /// the remainder stays queued for the next delivery.
    pub fn on_bytes(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        while let Some(head) = self.pending.front() {
            if self.buffer.len() < head.len {
                break;
            }
            let head = self.pending.pop_front().unwrap();
            let reply = self.buffer.split_to(head.len).freeze();
            // Receiver may already be gone (timed-out request).
            let _ = head.tx.send(reply);
        }

        if self.pending.is_empty() && self.buffer.len() > UNSOLICITED_WARN_LEN {
            warn!(
                "{} unsolicited bytes buffered with no pending expectation",
                self.buffer.len()
            );
        }
    }

    /// Number of expectations still waiting for their reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop leading expectations whose receiver has been abandoned.
    ///
    /// Only the front of the queue is considered: removing an abandoned entry
    /// between live ones would misalign every reply behind it.
    pub fn drop_abandoned(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|pending| pending.tx.is_closed())
        {
            self.pending.pop_front();
        }
    }

    /// Discard all buffered bytes and fail every pending expectation.
    ///
    /// Their receivers resolve with a channel-closed error, so no caller is
    /// left waiting after the connection goes away.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_split_across_deliveries() {
        let mut matcher = ResponseMatcher::new();
        let mut rx = matcher.expect(14);

        matcher.on_bytes(&[1, 2, 3, 4, 5]);
        assert!(rx.try_recv().is_err(), "must not fire on a partial reply");

        matcher.on_bytes(&[6, 7, 8, 9, 10, 11, 12, 13, 14]);
        let reply = rx.try_recv().unwrap();
        assert_eq!(
            reply.as_ref(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
        );
        assert_eq!(matcher.pending_len(), 0);
    }

    #[test]
    fn test_two_expectations_one_delivery() {
        let mut matcher = ResponseMatcher::new();
        let mut first = matcher.expect(1);
        let mut second = matcher.expect(1);

        matcher.on_bytes(&[0xaa, 0xbb]);

        assert_eq!(first.try_recv().unwrap().as_ref(), &[0xaa]);
        assert_eq!(second.try_recv().unwrap().as_ref(), &[0xbb]);
    }

    #[test]
    fn test_short_buffer_makes_no_progress() {
        let mut matcher = ResponseMatcher::new();
        let mut rx = matcher.expect(4);

        matcher.on_bytes(&[]);
        matcher.on_bytes(&[1, 2, 3]);
        assert!(rx.try_recv().is_err());
        assert_eq!(matcher.pending_len(), 1);
    }

    #[test]
    fn test_surplus_bytes_wait_for_next_expectation() {
        let mut matcher = ResponseMatcher::new();
        let mut first = matcher.expect(2);

        matcher.on_bytes(&[1, 2, 3]);
        assert_eq!(first.try_recv().unwrap().as_ref(), &[1, 2]);

        // The leftover byte completes a later expectation.
        let mut second = matcher.expect(1);
        matcher.on_bytes(&[]);
        assert_eq!(second.try_recv().unwrap().as_ref(), &[3]);
    }

    #[test]
    fn test_clear_fails_pending_receivers() {
        let mut matcher = ResponseMatcher::new();
        let mut rx = matcher.expect(1);

        matcher.clear();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_drop_abandoned_removes_head_entry() {
        let mut matcher = ResponseMatcher::new();
        let rx = matcher.expect(1);
        drop(rx);

        matcher.drop_abandoned();
        assert_eq!(matcher.pending_len(), 0);

        // A later reply must now match the next live expectation.
        let mut live = matcher.expect(1);
        matcher.on_bytes(&[0x42]);
        assert_eq!(live.try_recv().unwrap().as_ref(), &[0x42]);
    }
}

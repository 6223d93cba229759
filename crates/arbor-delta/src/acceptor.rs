//! Ordered event acceptor
//!
//! The authority numbers every event it broadcasts. Transports may deliver
//! those events out of order or more than once; the acceptor reassembles the
//! stream and hands events to a single consumer strictly in sequence order.
//!
//! ```text
//! On receive event with sequence S:
//!   S == expected  => deliver, expected += 1, drain consecutive buffered events
//!   S >  expected  => buffer by S
//!   S <  expected  => drop (stale or duplicate delivery)
//! ```
//!
//! Gap recovery is left to a higher layer: [`OrderedEventAcceptor::missing`]
//! lists the sequence numbers it is waiting for.

use std::collections::BTreeMap;

pub type SequenceNumber = u64;

/// Anything carrying an authority-assigned sequence number.
pub trait Sequenced {
    fn sequence_number(&self) -> SequenceNumber;
}

/// What happened to an event handed to the acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The event and this many events in total were delivered.
    Delivered(usize),
    /// The event is ahead of the stream and waits for its predecessors.
    Buffered,
    /// The event was already delivered.
    Stale,
    /// The event is already waiting in the buffer.
    Duplicate,
    /// The buffer is full; the event was dropped.
    Overflow,
}

#[derive(Debug, Clone)]
pub struct OrderedEventAcceptor<E> {
    expected: SequenceNumber,
    buffer: BTreeMap<SequenceNumber, E>,
    max_buffered: Option<usize>,
}

impl<E: Sequenced> OrderedEventAcceptor<E> {
    pub fn new(first_expected: SequenceNumber) -> Self {
        Self {
            expected: first_expected,
            buffer: BTreeMap::new(),
            max_buffered: None,
        }
    }

    /// Cap the number of events held back waiting for a gap to close.
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = Some(max_buffered);
        self
    }

    pub fn expected(&self) -> SequenceNumber {
        self.expected
    }

    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    /// Sequence numbers between the expected one and the highest buffered
    /// event that have not arrived yet.
    pub fn missing(&self) -> Vec<SequenceNumber> {
        let Some(highest) = self.buffer.keys().next_back().copied() else {
            return Vec::new();
        };
        (self.expected..highest)
            .filter(|seq| !self.buffer.contains_key(seq))
            .collect()
    }

    /// Restart the stream at `expected`, discarding everything buffered.
    pub fn reset(&mut self, expected: SequenceNumber) {
        self.buffer.clear();
        self.expected = expected;
    }

    /// Accept one event, handing every event that became deliverable to
    /// `deliver` in sequence order.
    pub fn accept_with<F>(&mut self, event: E, mut deliver: F) -> AcceptOutcome
    where
        F: FnMut(E),
    {
        let seq = event.sequence_number();
        if seq < self.expected {
            tracing::trace!(seq, expected = self.expected, "dropping stale event");
            return AcceptOutcome::Stale;
        }
        if seq > self.expected {
            if self.buffer.contains_key(&seq) {
                return AcceptOutcome::Duplicate;
            }
            if self.max_buffered.is_some_and(|max| self.buffer.len() >= max) {
                tracing::warn!(seq, expected = self.expected, "acceptor buffer full");
                return AcceptOutcome::Overflow;
            }
            tracing::trace!(seq, expected = self.expected, "buffering early event");
            self.buffer.insert(seq, event);
            return AcceptOutcome::Buffered;
        }

        deliver(event);
        self.expected += 1;
        let mut delivered = 1;
        while let Some(next) = self.buffer.remove(&self.expected) {
            deliver(next);
            self.expected += 1;
            delivered += 1;
        }
        AcceptOutcome::Delivered(delivered)
    }

    /// Accept one event and return the deliverable events instead of calling
    /// a consumer.
    pub fn accept(&mut self, event: E) -> (AcceptOutcome, Vec<E>) {
        let mut ready = Vec::new();
        let outcome = self.accept_with(event, |e| ready.push(e));
        (outcome, ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ev(SequenceNumber);

    impl Sequenced for Ev {
        fn sequence_number(&self) -> SequenceNumber {
            self.0
        }
    }

    #[test]
    fn test_out_of_order_stream_is_reassembled() {
        let mut acceptor = OrderedEventAcceptor::new(0);
        let mut seen = Vec::new();
        for seq in [2, 0, 1, 4, 3] {
            acceptor.accept_with(Ev(seq), |e| seen.push(e.0));
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let outcome = acceptor.accept_with(Ev(0), |e| seen.push(e.0));
        assert_eq!(outcome, AcceptOutcome::Stale);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_outcomes() {
        let mut acceptor = OrderedEventAcceptor::new(10);
        assert_eq!(acceptor.accept(Ev(12)).0, AcceptOutcome::Buffered);
        assert_eq!(acceptor.accept(Ev(12)).0, AcceptOutcome::Duplicate);
        assert_eq!(acceptor.missing(), vec![10, 11]);

        let (outcome, ready) = acceptor.accept(Ev(10));
        assert_eq!(outcome, AcceptOutcome::Delivered(1));
        assert_eq!(ready, vec![Ev(10)]);

        let (outcome, ready) = acceptor.accept(Ev(11));
        assert_eq!(outcome, AcceptOutcome::Delivered(2));
        assert_eq!(ready, vec![Ev(11), Ev(12)]);
        assert_eq!(acceptor.expected(), 13);
        assert_eq!(acceptor.pending_count(), 0);
    }

    #[test]
    fn test_buffer_cap() {
        let mut acceptor = OrderedEventAcceptor::new(0).with_max_buffered(1);
        assert_eq!(acceptor.accept(Ev(5)).0, AcceptOutcome::Buffered);
        assert_eq!(acceptor.accept(Ev(6)).0, AcceptOutcome::Overflow);

        acceptor.reset(5);
        assert_eq!(acceptor.pending_count(), 0);
        assert_eq!(acceptor.accept(Ev(5)).0, AcceptOutcome::Delivered(1));
    }
}

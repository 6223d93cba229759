//! Property-based tests for the ordered event acceptor
//!
//!  - Any permutation of a contiguous stream is delivered in sequence order
//!  - Redelivered events never reach the consumer twice
//!  - Nothing stays buffered once the stream is complete

use arbor_delta::{AcceptOutcome, OrderedEventAcceptor, Sequenced, SequenceNumber};
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Debug, Clone, PartialEq)]
struct Event {
    seq: SequenceNumber,
    payload: String,
}

impl Sequenced for Event {
    fn sequence_number(&self) -> SequenceNumber {
        self.seq
    }
}

fn event(seq: SequenceNumber) -> Event {
    Event {
        seq,
        payload: format!("event-{}", seq),
    }
}

proptest! {
    #[test]
    fn any_permutation_is_delivered_in_order(
        order in Just((0u64..30).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut acceptor = OrderedEventAcceptor::new(0);
        let mut delivered = Vec::new();
        for seq in order {
            acceptor.accept_with(event(seq), |e| delivered.push(e.seq));
        }
        prop_assert_eq!(delivered, (0u64..30).collect::<Vec<_>>());
        prop_assert_eq!(acceptor.pending_count(), 0);
        prop_assert!(acceptor.missing().is_empty());
    }

    #[test]
    fn duplicates_are_delivered_once(
        start in 0u64..1000,
        seed in any::<u64>(),
        copies in 1usize..4
    ) {
        let mut stream: Vec<_> = (start..start + 20)
            .flat_map(|seq| std::iter::repeat(seq).take(copies))
            .collect();
        stream.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut acceptor = OrderedEventAcceptor::new(start);
        let mut delivered = Vec::new();
        for seq in stream {
            let outcome = acceptor.accept_with(event(seq), |e| delivered.push(e));
            prop_assert!(outcome != AcceptOutcome::Overflow);
        }
        let expected: Vec<_> = (start..start + 20).map(event).collect();
        prop_assert_eq!(delivered, expected);
    }
}

#[test]
fn interleaved_sequence_with_redelivery() {
    let mut acceptor = OrderedEventAcceptor::new(0);
    let mut delivered = Vec::new();
    let outcomes: Vec<_> = [2, 0, 1, 4, 3]
        .into_iter()
        .map(|seq| acceptor.accept_with(event(seq), |e| delivered.push(e.seq)))
        .collect();

    assert_eq!(
        outcomes,
        vec![
            AcceptOutcome::Buffered,
            AcceptOutcome::Delivered(1),
            AcceptOutcome::Delivered(2),
            AcceptOutcome::Buffered,
            AcceptOutcome::Delivered(2),
        ]
    );
    assert_eq!(delivered, vec![0, 1, 2, 3, 4]);

    assert_eq!(
        acceptor.accept_with(event(0), |e| delivered.push(e.seq)),
        AcceptOutcome::Stale
    );
    assert_eq!(delivered.len(), 5);
}

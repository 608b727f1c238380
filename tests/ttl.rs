//! Time-to-live collection behavior, including the self-sweeping variant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;

use taskmill::{AutoTtlCollection, TtlCollection};

#[tokio::test(flavor = "multi_thread")]
async fn every_read_is_empty_after_the_ttl_and_the_hook_fired_once_per_payload() {
    let expired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&expired);
    let collection = TtlCollection::with_expiration_hook(Duration::from_millis(60), move |p: &u32| {
        sink.lock().unwrap().push(*p);
    })
    .unwrap();

    let payloads = [11_u32, 22, 33, 44];
    for p in payloads {
        collection.add(p);
    }
    assert_eq!(collection.len(), payloads.len());

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(collection.len(), 0);
    assert!(collection.is_empty());
    assert!(collection.snapshot().is_empty());
    for p in &payloads {
        assert!(!collection.contains(p));
        assert!(!collection.remove(p));
    }

    let mut seen = expired.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, payloads.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_collection_shrinks_without_any_reads() {
    let expired = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&expired);
    let collection =
        AutoTtlCollection::with_expiration_hook(Duration::from_millis(60), move |_: &u32| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    for p in 0..5_u32 {
        collection.add(p);
    }

    // No reads from here on: the background sweep must do the work.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while expired.load(Ordering::SeqCst) < 5 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "background sweep never drained the collection"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(collection.len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_auto_collection_ends_its_sweep() {
    let collection = AutoTtlCollection::<u32>::new(Duration::from_millis(40))
        .await
        .unwrap();
    collection.add(7);
    drop(collection);

    // Nothing to assert beyond "no panic": the sweep self-terminates on
    // its next fire once the weak reference is dead.
    tokio::time::sleep(Duration::from_millis(150)).await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Before anything expires, every read sees every payload, in
    /// insertion order.
    #[test]
    fn unexpired_reads_see_every_payload_in_order(
        payloads in proptest::collection::vec(0_u32..1000, 0..24),
    ) {
        let collection = TtlCollection::new(Duration::from_secs(60)).unwrap();
        for p in &payloads {
            collection.add(*p);
        }

        prop_assert_eq!(collection.len(), payloads.len());
        prop_assert_eq!(collection.snapshot(), payloads.clone());
        for p in &payloads {
            prop_assert!(collection.contains(p));
        }
    }

    /// Removal takes exactly one equal entry per call.
    #[test]
    fn remove_takes_one_equal_entry_at_a_time(
        payload in 0_u32..16,
        copies in 1_usize..6,
    ) {
        let collection = TtlCollection::new(Duration::from_secs(60)).unwrap();
        for _ in 0..copies {
            collection.add(payload);
        }

        for remaining in (0..copies).rev() {
            prop_assert!(collection.remove(&payload));
            prop_assert_eq!(collection.len(), remaining);
        }
        prop_assert!(!collection.remove(&payload));
    }
}

//! Stress tests for huddle-storage
//!
//! These tests verify the in-memory stores under concurrent writers and
//! subscribers: monotonic watermarks under racing clients, ordered feed
//! delivery, and listener accounting under churn.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use huddle_core::{GroupId, MessageFeed, Timestamp, UpsertOutcome, UserId, WatermarkStore};
use huddle_storage::{InMemoryMessageFeed, InMemoryWatermarkStore};

// ============================================================================
// Watermark Races
// ============================================================================

/// Many clients racing to write the same watermark
///
/// Exactly one write creates the record, and the final value is the
/// maximum offered, whatever the interleaving.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_watermark_writes() {
    let store = Arc::new(InMemoryWatermarkStore::new());
    let group = GroupId::new("g").unwrap();
    let user = UserId::new("u").unwrap();
    let writers: i64 = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..writers {
        let store = store.clone();
        let group = group.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move {
            store
                .upsert_if_absent_or_newer(&group, &user, Timestamp::from_millis(i))
                .await
                .expect("upsert failed")
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == UpsertOutcome::Created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(
        store.value(&group, &user),
        Some(Timestamp::from_millis(writers - 1))
    );
    println!("{} racing watermark writes in {:?}", writers, start.elapsed());
}

/// A subscriber never observes the watermark moving backwards
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watermark_subscriber_sees_monotonic_values() {
    let store = Arc::new(InMemoryWatermarkStore::new());
    let group = GroupId::new("g").unwrap();
    let user = UserId::new("u").unwrap();

    let mut sub = store.subscribe(&group, &user).await.unwrap();
    assert_eq!(sub.next().await.unwrap().unwrap(), None);

    let writer = {
        let store = store.clone();
        let group = group.clone();
        let user = user.clone();
        tokio::spawn(async move {
            // Interleave newer and older values
            for i in 0..500i64 {
                let value = if i % 3 == 0 { i / 2 } else { i };
                store
                    .upsert_if_absent_or_newer(&group, &user, Timestamp::from_millis(value))
                    .await
                    .unwrap();
            }
        })
    };
    writer.await.unwrap();

    let final_value = store.value(&group, &user).unwrap();
    let mut last = None;
    while last != Some(final_value) {
        let value = sub.next().await.unwrap().unwrap().unwrap();
        assert!(last.is_none_or(|prev| value > prev), "watermark went backwards");
        last = Some(value);
    }
}

// ============================================================================
// Feed Throughput
// ============================================================================

/// Posting 5,000 messages while a filtered subscriber listens
#[tokio::test]
async fn test_feed_throughput_with_listener() {
    let feed = InMemoryMessageFeed::new();
    let group = GroupId::new("g").unwrap();
    let sender = UserId::new("s").unwrap();
    let count: i64 = 5_000;
    let after = Timestamp::from_millis(count / 2);

    let mut sub = feed.subscribe_count(&group, Some(after)).await.unwrap();
    assert_eq!(sub.next().await.unwrap().unwrap(), 0);

    let start = Instant::now();
    for i in 1..=count {
        feed.post_at(&group, &sender, Timestamp::from_millis(i)).unwrap();
    }
    println!("Posted {} messages in {:?}", count, start.elapsed());

    // Only messages after the watermark reach the listener, each once
    let mut last = 0;
    for expected in 1..=(count / 2) as u64 {
        last = sub.next().await.unwrap().unwrap();
        assert_eq!(last, expected);
    }
    assert_eq!(last, (count / 2) as u64);
    assert_eq!(feed.message_count(&group), count as usize);
}

// ============================================================================
// Listener Churn
// ============================================================================

/// Subscribing and cancelling repeatedly leaves no listener behind
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listener_churn() {
    let feed = Arc::new(InMemoryMessageFeed::new());
    let groups: BTreeSet<GroupId> = (0..16)
        .map(|i| GroupId::new(format!("g{}", i)).unwrap())
        .collect();

    let mut handles = Vec::new();
    for group in groups.iter().cloned() {
        let feed = feed.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..100i64 {
                let sub = feed
                    .subscribe(&group, Some(Timestamp::from_millis(round)))
                    .await
                    .unwrap();
                if round % 2 == 0 {
                    assert!(sub.cancel());
                    assert!(!sub.cancel());
                }
                // Odd rounds cancel on drop
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(feed.listener_count(), 0);
}

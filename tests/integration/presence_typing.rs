//! Integration tests for the simulated typing indicator.
//!
//! Verifies:
//! 1. Every flip reaches subscribers as one `TypingChanged` with a strictly
//!    increasing version.
//! 2. Once `stop()` returns, no flip is observed, even under a tight interval
//!    on a multi-threaded runtime.
//! 3. Indicators on different conversations are independent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use haatchat::chat::ChatEvent;
use haatchat::chat::conversation::ConversationParams;
use haatchat::chat::store::MessageStore;
use haatchat::presence::PresenceSignaler;

use haatchat_proto::message::{ConversationId, LocalUserId};

fn open(store: &MessageStore, peer: &str) -> ConversationId {
    store.open(ConversationParams::new(
        peer,
        "Goat - Jamunapari",
        LocalUserId::new("seller-1"),
    ))
}

#[tokio::test(start_paused = true)]
async fn each_flip_is_one_notification_with_a_newer_version() {
    let store = MessageStore::new();
    let conv = open(&store, "John Doe");
    let (_sub, mut events) = store.subscribe_channel(&conv).unwrap();

    let handle = PresenceSignaler::new(store.clone())
        .start(&conv, Duration::from_millis(200))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    handle.stop();

    let mut flips = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            ChatEvent::TypingChanged {
                typing, version, ..
            } => flips.push((typing, version)),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        flips,
        vec![(true, 1), (false, 2), (true, 3), (false, 4), (true, 5)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_flip_is_observed_after_stop_returns() {
    let store = MessageStore::new();
    let conv = open(&store, "John Doe");

    let stopped = Arc::new(AtomicBool::new(false));
    let late = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let stopped = Arc::clone(&stopped);
        let late = Arc::clone(&late);
        let total = Arc::clone(&total);
        store
            .subscribe(&conv, move |event| {
                if matches!(event, ChatEvent::TypingChanged { .. }) {
                    total.fetch_add(1, Ordering::SeqCst);
                    if stopped.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .unwrap()
    };

    let handle = PresenceSignaler::new(store.clone())
        .start(&conv, Duration::from_millis(1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Stop from a plain OS thread while ticks keep coming.
    let stopper = {
        let stopped = Arc::clone(&stopped);
        std::thread::spawn(move || {
            handle.stop();
            stopped.store(true, Ordering::SeqCst);
            handle
        })
    };
    let handle = stopper.join().unwrap();
    let version_at_stop = store.conversation(&conv).unwrap().typing_version();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.is_stopped());
    assert!(total.load(Ordering::SeqCst) > 0);
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(
        store.conversation(&conv).unwrap().typing_version(),
        version_at_stop
    );
}

#[tokio::test(start_paused = true)]
async fn indicators_are_independent_per_conversation() {
    let store = MessageStore::new();
    let goat = open(&store, "John Doe");
    let cow = open(&store, "Jane Smith");
    let signaler = PresenceSignaler::new(store.clone());

    let goat_handle = signaler.start(&goat, Duration::from_millis(100)).unwrap();
    let cow_handle = signaler.start(&cow, Duration::from_millis(100)).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    signaler.stop(&goat_handle);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.conversation(&goat).unwrap().typing_version(), 1);
    assert_eq!(store.conversation(&cow).unwrap().typing_version(), 3);
    cow_handle.stop();
}

//! Behavioural properties of the per-user progress store.

use scitutor::models::Role;
use scitutor::users::UserStore;
use std::sync::Arc;
use tempfile::TempDir;

fn open(tmp: &TempDir) -> UserStore {
    UserStore::open(tmp.path().join("user_data"), 50).unwrap()
}

#[test]
fn alice_example() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);

    store.create_user("alice").unwrap();
    store.update_progress("alice", "Physics", true).unwrap();
    store.update_progress("alice", "Physics", false).unwrap();

    let progress = store.get_progress("alice").unwrap().unwrap();
    assert_eq!(progress.username, "alice");
    assert_eq!(progress.total_questions, 2);
    assert_eq!(progress.correct_answers, 1);
    assert_eq!(progress.accuracy, 50.0);
    assert_eq!(progress.topics_covered, vec!["Physics".to_string()]);
}

#[test]
fn create_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);

    let first = store.create_user("bob").unwrap();
    store.update_progress("bob", "Chemistry", true).unwrap();
    store
        .append_chat_entry("bob", "What is an acid?", Role::User)
        .unwrap();

    let second = store.create_user("bob").unwrap();
    assert_eq!(second.progress.total_questions, 1);
    assert_eq!(second.chat_history.len(), 1);
    assert_ne!(first, second);

    let third = store.create_user("bob").unwrap();
    assert_eq!(second, third);
}

#[test]
fn counters_track_correct_and_incorrect_answers() {
    for (n, m) in [(0u64, 0u64), (3, 0), (0, 4), (3, 1), (7, 5)] {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        store.create_user("carol").unwrap();

        for _ in 0..n {
            store.update_progress("carol", "Biology", true).unwrap();
        }
        for _ in 0..m {
            store.update_progress("carol", "Biology", false).unwrap();
        }

        let p = store.get_progress("carol").unwrap().unwrap();
        assert_eq!(p.total_questions, n + m);
        assert_eq!(p.correct_answers, n);
        assert!(p.correct_answers <= p.total_questions);
        let expected = if n + m == 0 {
            0.0
        } else {
            100.0 * n as f64 / (n + m) as f64
        };
        assert!((p.accuracy - expected).abs() < 1e-9, "n={} m={}", n, m);
    }
}

#[test]
fn transcript_keeps_most_recent_fifty_in_order() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);

    for i in 0..60 {
        let role = if i % 2 == 0 { Role::User } else { Role::Ai };
        store
            .append_chat_entry("dave", &format!("turn {}", i), role)
            .unwrap();
    }

    let history = store.chat_history("dave").unwrap();
    assert_eq!(history.len(), 50);
    assert_eq!(history[0].content, "turn 10");
    assert_eq!(history[49].content, "turn 59");
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn topics_never_shrink_and_deduplicate() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);

    store.update_progress("erin", "Physics", true).unwrap();
    store.update_progress("erin", "Chemistry", true).unwrap();
    store.update_progress("erin", "Physics", false).unwrap();

    let p = store.get_progress("erin").unwrap().unwrap();
    assert_eq!(p.topics_covered, vec!["Chemistry", "Physics"]);
}

#[test]
fn unknown_user_is_not_found_rather_than_zeroed() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    assert!(store.get_progress("ghost").unwrap().is_none());
    assert!(!tmp.path().join("user_data/ghost.json").exists());
}

#[test]
fn update_creates_missing_user() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp);
    store.update_progress("frank", "General Science", true).unwrap();
    assert_eq!(
        store.get_progress("frank").unwrap().unwrap().total_questions,
        1
    );
}

#[test]
fn concurrent_updates_are_not_lost() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(open(&tmp));
    store.create_user("grace").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    store.update_progress("grace", "Physics", true).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let p = store.get_progress("grace").unwrap().unwrap();
    assert_eq!(p.total_questions, 200);
    assert_eq!(p.correct_answers, 200);
}

#[test]
fn records_survive_reopening_the_store() {
    let tmp = TempDir::new().unwrap();
    {
        let store = open(&tmp);
        store.update_progress("heidi", "Physics", true).unwrap();
    }
    let store = open(&tmp);
    assert_eq!(
        store.get_progress("heidi").unwrap().unwrap().total_questions,
        1
    );
}

//! Per-user transcript and progress store.
//!
//! One pretty-printed JSON file per user under the store directory:
//!
//! ```json
//! {
//!   "username": "alice",
//!   "chat_history": [{ "role": "user", "content": "...", "timestamp": "..." }],
//!   "progress": {
//!     "total_questions": 2,
//!     "correct_answers": 1,
//!     "last_session": "2026-10-19T10:00:00Z",
//!     "topics_covered": ["Physics"]
//!   }
//! }
//! ```
//!
//! Every mutation is a read-modify-write of the whole file. Mutations of the
//! same user are serialized within the process by a per-user lock and land
//! via write-then-rename, so a reader never sees a torn file. Different users
//! never wait on each other. Writers in other processes are still
//! last-writer-wins.
//!
//! All operations do blocking file I/O; async callers run them on the
//! blocking pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::{ChatEntry, Role};

const MAX_USERNAME_BYTES: usize = 128;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
    #[error("user data I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt user file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Set of topic labels, kept sorted and persisted as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicSet(BTreeSet<String>);

impl TopicSet {
    /// Returns `true` if the topic was not already present.
    pub fn insert(&mut self, topic: impl Into<String>) -> bool {
        self.0.insert(topic.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_questions: u64,
    pub correct_answers: u64,
    pub last_session: DateTime<Utc>,
    pub topics_covered: TopicSet,
}

impl Progress {
    fn new() -> Self {
        Self {
            total_questions: 0,
            correct_answers: 0,
            last_session: Utc::now(),
            topics_covered: TopicSet::default(),
        }
    }

    /// Percentage of answers marked correct; 0 before any question.
    pub fn accuracy(&self) -> f64 {
        if self.total_questions == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.total_questions as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub chat_history: Vec<ChatEntry>,
    pub progress: Progress,
}

impl UserRecord {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            chat_history: Vec::new(),
            progress: Progress::new(),
        }
    }
}

/// Read-side view of a user's progress, as served by `GET /progress/{username}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub username: String,
    pub total_questions: u64,
    pub correct_answers: u64,
    pub accuracy: f64,
    pub topics_covered: Vec<String>,
    pub last_session: DateTime<Utc>,
}

impl From<UserRecord> for ProgressSnapshot {
    fn from(record: UserRecord) -> Self {
        Self {
            accuracy: record.progress.accuracy(),
            topics_covered: record.progress.topics_covered.to_vec(),
            total_questions: record.progress.total_questions,
            correct_answers: record.progress.correct_answers,
            last_session: record.progress.last_session,
            username: record.username,
        }
    }
}

pub struct UserStore {
    dir: PathBuf,
    max_entries: usize,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    /// Transcripts are capped at `max_entries` most recent entries.
    pub fn open(dir: impl Into<PathBuf>, max_entries: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            max_entries: max_entries.max(1),
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the existing record verbatim, or create, persist and return a
    /// fresh one.
    pub fn create_user(&self, username: &str) -> Result<UserRecord, StoreError> {
        let lock = self.user_lock(username)?;
        let _guard = acquire(&lock);
        self.load_or_create(username)
    }

    /// Append a timestamped turn, keeping only the most recent entries.
    pub fn append_chat_entry(
        &self,
        username: &str,
        content: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        let lock = self.user_lock(username)?;
        let _guard = acquire(&lock);
        let mut record = self.load_or_create(username)?;

        self.push_entry(&mut record, role, content);

        self.save(&record)
    }

    /// The persisted transcript; empty for unknown users.
    pub fn chat_history(&self, username: &str) -> Result<Vec<ChatEntry>, StoreError> {
        Ok(self
            .load(username)?
            .map(|r| r.chat_history)
            .unwrap_or_default())
    }

    /// Count one question, record its topic, and refresh `last_session`.
    pub fn update_progress(
        &self,
        username: &str,
        topic: &str,
        is_correct: bool,
    ) -> Result<(), StoreError> {
        let lock = self.user_lock(username)?;
        let _guard = acquire(&lock);
        let mut record = self.load_or_create(username)?;

        count_question(&mut record.progress, topic, is_correct);

        self.save(&record)
    }

    /// Record a whole answered turn in one rewrite: the question, the answer
    /// and one counted question. Nothing is written if any step fails.
    pub fn record_turn(
        &self,
        username: &str,
        question: &str,
        answer: &str,
        topic: &str,
        is_correct: bool,
    ) -> Result<ProgressSnapshot, StoreError> {
        let lock = self.user_lock(username)?;
        let _guard = acquire(&lock);
        let mut record = self.load_or_create(username)?;

        self.push_entry(&mut record, Role::User, question);
        self.push_entry(&mut record, Role::Ai, answer);
        count_question(&mut record.progress, topic, is_correct);

        self.save(&record)?;
        Ok(ProgressSnapshot::from(record))
    }

    /// Snapshot with computed accuracy, or `None` if the user was never created.
    pub fn get_progress(&self, username: &str) -> Result<Option<ProgressSnapshot>, StoreError> {
        Ok(self.load(username)?.map(ProgressSnapshot::from))
    }

    fn user_lock(&self, username: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        validate_username(username)?;
        let mut locks = acquire(&self.user_locks);
        Ok(locks.entry(username.to_string()).or_default().clone())
    }

    fn push_entry(&self, record: &mut UserRecord, role: Role, content: &str) {
        record.chat_history.push(ChatEntry {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        if record.chat_history.len() > self.max_entries {
            let excess = record.chat_history.len() - self.max_entries;
            record.chat_history.drain(..excess);
        }
    }

    fn path_for(&self, username: &str) -> Result<PathBuf, StoreError> {
        validate_username(username)?;
        Ok(self.dir.join(format!("{}.json", username)))
    }

    fn load(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let path = self.path_for(username)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Json {
                path: path.display().to_string(),
                source,
            })
    }

    fn load_or_create(&self, username: &str) -> Result<UserRecord, StoreError> {
        if let Some(record) = self.load(username)? {
            return Ok(record);
        }
        let record = UserRecord::new(username);
        self.save(&record)?;
        Ok(record)
    }

    fn save(&self, record: &UserRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.username)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }
}

fn acquire<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn count_question(progress: &mut Progress, topic: &str, is_correct: bool) {
    progress.total_questions += 1;
    if is_correct {
        progress.correct_answers += 1;
    }
    progress.topics_covered.insert(topic);
    progress.last_session = Utc::now();
}

/// Usernames double as file names, so they must not escape the store
/// directory or contain characters filesystems reject.
pub fn validate_username(username: &str) -> Result<(), StoreError> {
    let bad = username.trim().is_empty()
        || username == "."
        || username == ".."
        || username.len() > MAX_USERNAME_BYTES
        || username
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control());
    if bad {
        Err(StoreError::InvalidUsername(username.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> UserStore {
        UserStore::open(tmp.path().join("user_data"), 50).unwrap()
    }

    #[test]
    fn new_user_starts_zeroed() {
        let tmp = TempDir::new().unwrap();
        let record = store(&tmp).create_user("alice").unwrap();
        assert_eq!(record.username, "alice");
        assert!(record.chat_history.is_empty());
        assert_eq!(record.progress.total_questions, 0);
        assert_eq!(record.progress.correct_answers, 0);
        assert!(record.progress.topics_covered.is_empty());
        assert!(tmp.path().join("user_data/alice.json").exists());
    }

    #[test]
    fn accuracy_is_zero_without_questions() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.create_user("bob").unwrap();
        let snap = store.get_progress("bob").unwrap().unwrap();
        assert_eq!(snap.accuracy, 0.0);
    }

    #[test]
    fn topics_serialize_as_array() {
        let mut topics = TopicSet::default();
        topics.insert("Physics");
        topics.insert("Chemistry");
        topics.insert("Physics");
        let json = serde_json::to_value(&topics).unwrap();
        assert_eq!(json, serde_json::json!(["Chemistry", "Physics"]));
        let back: TopicSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, topics);
    }

    #[test]
    fn file_schema_matches_documented_layout() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.append_chat_entry("carol", "hi", Role::User).unwrap();
        store.update_progress("carol", "Biology", true).unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("user_data/carol.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["username"], "carol");
        assert_eq!(json["chat_history"][0]["role"], "user");
        assert!(json["chat_history"][0]["timestamp"].is_string());
        assert_eq!(json["progress"]["total_questions"], 1);
        assert_eq!(json["progress"]["topics_covered"][0], "Biology");
    }

    #[test]
    fn rejects_path_like_usernames() {
        for name in ["", "   ", ".", "..", "../etc/passwd", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(validate_username(name), Err(StoreError::InvalidUsername(_))),
                "accepted {:?}",
                name
            );
        }
        assert!(validate_username("alice.smith-01").is_ok());
    }

    #[test]
    fn corrupt_file_is_reported_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        std::fs::write(store.dir().join("dave.json"), "{ not json").unwrap();
        assert!(matches!(
            store.update_progress("dave", "Physics", true),
            Err(StoreError::Json { .. })
        ));
        let raw = std::fs::read_to_string(store.dir().join("dave.json")).unwrap();
        assert_eq!(raw, "{ not json");
    }

    #[test]
    fn record_turn_writes_exchange_and_progress_together() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let snap = store
            .record_turn("erin", "What is mass?", "Amount of matter.", "Physics", true)
            .unwrap();
        assert_eq!(snap.total_questions, 1);
        assert_eq!(snap.correct_answers, 1);
        assert_eq!(snap.topics_covered, vec!["Physics".to_string()]);

        let history = store.chat_history("erin").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "What is mass?");
        assert_eq!(history[1].role, Role::Ai);
        assert_eq!(history[1].content, "Amount of matter.");
    }

    #[test]
    fn record_turn_on_corrupt_file_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        std::fs::write(store.dir().join("frank.json"), "{ not json").unwrap();
        assert!(matches!(
            store.record_turn("frank", "q", "a", "Physics", true),
            Err(StoreError::Json { .. })
        ));
        let raw = std::fs::read_to_string(store.dir().join("frank.json")).unwrap();
        assert_eq!(raw, "{ not json");
    }

    #[test]
    fn record_turn_respects_transcript_cap() {
        let tmp = TempDir::new().unwrap();
        let store = UserStore::open(tmp.path().join("user_data"), 3).unwrap();
        store.record_turn("gail", "q1", "a1", "Physics", true).unwrap();
        store.record_turn("gail", "q2", "a2", "Physics", false).unwrap();
        let history = store.chat_history("gail").unwrap();
        let contents: Vec<&str> = history.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "q2", "a2"]);
        assert_eq!(store.get_progress("gail").unwrap().unwrap().total_questions, 2);
    }

    #[test]
    fn each_user_gets_its_own_lock() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let a = store.user_lock("alice").unwrap();
        let b = store.user_lock("bob").unwrap();
        assert!(Arc::ptr_eq(&a, &store.user_lock("alice").unwrap()));
        assert!(!Arc::ptr_eq(&a, &b));

        // holding alice's lock does not block writes for bob
        let _held = acquire(&a);
        store.update_progress("bob", "Physics", true).unwrap();
        assert!(store.user_lock("../x").is_err());
    }

    #[test]
    fn unknown_user_has_empty_history() {
        let tmp = TempDir::new().unwrap();
        assert!(store(&tmp).chat_history("nobody").unwrap().is_empty());
    }
}

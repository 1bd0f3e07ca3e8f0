use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::kernel::notification::{Delivery, Notification};
use crate::kernel::seen::SeenSet;

/// Read/advance access to the catch-up high-water mark.
/// The Connection Manager only ever sees the store through this.
pub trait Watermark: Send + Sync {
    fn high_water_mark(&self) -> Option<i64>;
    /// Never moves the mark backwards.
    fn advance_high_water_mark(&self, time: i64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPrefs {
    pub sound: bool,
    pub vibrate: bool,
}

impl Default for FeedbackPrefs {
    fn default() -> Self {
        Self { sound: true, vibrate: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub topic: Option<String>,
    pub reply_topic: Option<String>,
    #[serde(default)]
    pub feedback: FeedbackPrefs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    /// Newest first.
    notifications: VecDeque<Notification>,
    seen: SeenSet,
    high_water_mark: Option<i64>,
    #[serde(default)]
    settings: UserSettings,
    /// Ids whose answer is being published right now.
    #[serde(skip)]
    answering: HashSet<String>,
    /// High-water mark moved since the last write.
    #[serde(skip)]
    dirty: bool,
}

impl PersistedState {
    fn empty(seen_cap: usize) -> Self {
        Self {
            notifications: VecDeque::new(),
            seen: SeenSet::new(seen_cap),
            high_water_mark: None,
            settings: UserSettings::default(),
            answering: HashSet::new(),
            dirty: false,
        }
    }
}

/// Result of `claim_answer`.
pub enum Claim<'a> {
    /// The caller owns the answer until the guard is dropped or `mark_answered` runs.
    Granted(AnswerClaim<'a>),
    /// Answered already, or another caller holds the claim.
    Taken,
    Unknown,
}

/// Exclusive right to answer one notification. Dropping it without
/// `mark_answered` lets the next caller try again.
pub struct AnswerClaim<'a> {
    store: &'a LocalStore,
    id: String,
}

impl Drop for AnswerClaim<'_> {
    fn drop(&mut self) {
        self.store.lock().answering.remove(&self.id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    Updated(Notification),
    AlreadyAnswered,
    Unknown,
}

/// Process-wide durable state: bounded history, seen-set, high-water mark,
/// user settings. One mutex guards all of it; every mutation rewrites the
/// JSON file atomically.
pub struct LocalStore {
    path: Option<PathBuf>,
    history_cap: usize,
    inner: Mutex<PersistedState>,
}

impl LocalStore {
    pub fn open(path: &Path, history_cap: usize, seen_cap: usize) -> Result<Self, StoreError> {
        let mut state = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str::<PersistedState>(&content)?
        } else {
            PersistedState::empty(seen_cap)
        };
        state.seen.set_cap(seen_cap);
        state.notifications.truncate(history_cap);

        Ok(Self {
            path: Some(path.to_path_buf()),
            history_cap,
            inner: Mutex::new(state),
        })
    }

    pub fn in_memory(history_cap: usize, seen_cap: usize) -> Self {
        Self {
            path: None,
            history_cap,
            inner: Mutex::new(PersistedState::empty(seen_cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &mut PersistedState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            state.dirty = false;
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(&*state)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        state.dirty = false;
        Ok(())
    }

    /// Stores a newly seen notification. Returns false if its id was seen before.
    pub fn record(&self, notification: &Notification) -> Result<bool, StoreError> {
        let mut state = self.lock();
        if !state.seen.insert(&notification.id) {
            return Ok(false);
        }
        state.notifications.push_front(notification.clone());
        state.notifications.truncate(self.history_cap);
        self.persist(&mut state)?;
        Ok(true)
    }

    pub fn history(&self) -> Vec<Notification> {
        self.lock().notifications.iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.lock().notifications.iter().find(|n| n.id == id).cloned()
    }

    /// Reserves `id` for one answer. Checked and set under the state lock, so
    /// of two concurrent callers exactly one is granted.
    pub fn claim_answer(&self, id: &str) -> Claim<'_> {
        let mut state = self.lock();
        let answered = match state.notifications.iter().find(|n| n.id == id) {
            Some(n) => n.answered(),
            None => return Claim::Unknown,
        };
        if answered || !state.answering.insert(id.to_string()) {
            return Claim::Taken;
        }
        Claim::Granted(AnswerClaim {
            store: self,
            id: id.to_string(),
        })
    }

    /// Writes pending high-water mark progress, if any.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }
        self.persist(&mut state)
    }

    pub fn mark_answered(
        &self,
        id: &str,
        body: &str,
        delivery: Delivery,
    ) -> Result<AnswerOutcome, StoreError> {
        let mut state = self.lock();
        let Some(n) = state.notifications.iter_mut().find(|n| n.id == id) else {
            return Ok(AnswerOutcome::Unknown);
        };
        if !n.mark_answered(body, delivery) {
            return Ok(AnswerOutcome::AlreadyAnswered);
        }
        let updated = n.clone();
        self.persist(&mut state)?;
        Ok(AnswerOutcome::Updated(updated))
    }

    /// Drops history but keeps the seen-set so cleared messages stay deduplicated.
    pub fn clear_history(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.notifications.clear();
        self.persist(&mut state)
    }

    pub fn settings(&self) -> UserSettings {
        self.lock().settings.clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut UserSettings)) -> Result<UserSettings, StoreError> {
        let mut state = self.lock();
        f(&mut state.settings);
        self.persist(&mut state)?;
        Ok(state.settings.clone())
    }
}

impl Watermark for LocalStore {
    fn high_water_mark(&self) -> Option<i64> {
        self.lock().high_water_mark
    }

    fn advance_high_water_mark(&self, time: i64) {
        let mut state = self.lock();
        if state.high_water_mark.is_some_and(|hwm| hwm >= time) {
            return;
        }
        // Written with the next record or on flush; the catch-up skew
        // covers anything lost to a crash in between.
        state.high_water_mark = Some(time);
        state.dirty = true;
    }
}

//! Resume state for date-window crawls

use crate::checkpoint::{CheckpointResult, CheckpointStore};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Progress of a crawl over a date window
///
/// Stored as JSON in the checkpoint log. The cursor is the offset of the
/// next item to fetch within `[from, to]`, and `total` is the size of the
/// window as last reported by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub cursor: u64,
    pub total: u64,
}

impl WindowState {
    /// Loads the latest state, or a fresh one if the log is empty
    pub async fn load(store: &dyn CheckpointStore) -> CheckpointResult<Self> {
        let buf = store.latest().await?;
        if buf.is_empty() {
            return Ok(Self::default());
        }
        Self::from_bytes(&buf)
    }

    pub fn from_bytes(buf: &[u8]) -> CheckpointResult<Self> {
        Ok(serde_json::from_slice(buf)?)
    }

    pub fn to_bytes(&self) -> CheckpointResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Forgets the window and all progress
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Reconciles saved progress with the configured window
    ///
    /// On restart all progress is discarded. Otherwise the upper bound is
    /// always taken from the configuration (an open end means `today`) and
    /// progress survives only if the lower bound is unchanged.
    pub fn sync(&mut self, restart: bool, from: NaiveDate, to: Option<NaiveDate>, today: NaiveDate) {
        if restart {
            self.clear();
        }
        self.to = Some(to.unwrap_or(today));
        if self.from == Some(from) {
            return;
        }
        self.from = Some(from);
        self.cursor = 0;
        self.total = 0;
    }

    /// Like [`WindowState::sync`] with today's UTC date
    pub fn sync_now(&mut self, restart: bool, from: NaiveDate, to: Option<NaiveDate>) {
        self.sync(restart, from, to, Utc::now().date_naive());
    }

    /// Records progress after a page
    pub fn update(&mut self, cursor: u64, total: u64) {
        self.cursor = cursor;
        self.total = total;
    }

    /// Appends this state to the checkpoint log
    pub async fn save(&self, store: &dyn CheckpointStore) -> CheckpointResult<String> {
        store.checkpoint("", &self.to_bytes()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SqliteCheckpoint;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn in_progress() -> WindowState {
        WindowState {
            from: Some(date(2020, 1, 1)),
            to: Some(date(2020, 1, 2)),
            cursor: 100,
            total: 120,
        }
    }

    #[test]
    fn test_sync_restart_clears_progress() {
        let mut state = in_progress();
        state.sync(true, date(2020, 1, 1), Some(date(2020, 1, 2)), date(2024, 5, 1));
        assert_eq!(state.cursor, 0);
        assert_eq!(state.total, 0);
        assert_eq!(state.from, Some(date(2020, 1, 1)));
        assert_eq!(state.to, Some(date(2020, 1, 2)));
    }

    #[test]
    fn test_sync_unchanged_from_keeps_progress() {
        let mut state = in_progress();
        state.sync(false, date(2020, 1, 1), Some(date(2020, 2, 1)), date(2024, 5, 1));
        assert_eq!(state.cursor, 100);
        assert_eq!(state.total, 120);
        assert_eq!(state.to, Some(date(2020, 2, 1)));
    }

    #[test]
    fn test_sync_changed_from_resets_progress() {
        let mut state = in_progress();
        state.sync(false, date(2019, 6, 1), Some(date(2020, 1, 2)), date(2024, 5, 1));
        assert_eq!(state.cursor, 0);
        assert_eq!(state.total, 0);
        assert_eq!(state.from, Some(date(2019, 6, 1)));
    }

    #[test]
    fn test_open_end_defaults_to_today() {
        let mut state = WindowState::default();
        state.sync(false, date(2020, 1, 1), None, date(2024, 5, 1));
        assert_eq!(state.to, Some(date(2024, 5, 1)));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteCheckpoint::in_memory().unwrap();
        assert_eq!(WindowState::load(&store).await.unwrap(), WindowState::default());

        let mut state = in_progress();
        state.save(&store).await.unwrap();
        state.update(120, 120);
        state.save(&store).await.unwrap();

        let loaded = WindowState::load(&store).await.unwrap();
        assert_eq!(loaded.cursor, 120);
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_json_layout() {
        let json = String::from_utf8(in_progress().to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"from\": \"2020-01-01\""));
        assert!(json.contains("\"cursor\": 100"));
    }
}

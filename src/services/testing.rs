//! In-memory collaborators for exercising the generation core in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::generation::MessageHandle;
use crate::services::chat::{ActionButton, ChatTransport};
use crate::services::store::{QuotaStatus, StatsRecord, UserSettings, UserStore};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    /// user id, text, callback data of attached buttons
    Text(i64, String, Vec<String>),
    /// user id, photo count, caption
    Photos(i64, usize, Option<String>),
    Edit(MessageHandle, String),
}

#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<Sent>>,
    next_message_id: AtomicI32,
    fail: AtomicBool,
}

impl FakeChat {
    pub fn failing() -> Self {
        let chat = FakeChat::default();
        chat.fail.store(true, Ordering::SeqCst);
        chat
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("chat unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn send_text(
        &self,
        user_id: i64,
        text: &str,
        actions: &[ActionButton],
    ) -> Result<MessageHandle> {
        self.check()?;
        self.sent.lock().push(Sent::Text(
            user_id,
            text.to_string(),
            actions.iter().map(|a| a.callback_data.clone()).collect(),
        ));
        Ok(MessageHandle {
            chat_id: user_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn send_photos(
        &self,
        user_id: i64,
        photos: Vec<Vec<u8>>,
        caption: Option<&str>,
    ) -> Result<()> {
        self.check()?;
        self.sent.lock().push(Sent::Photos(
            user_id,
            photos.len(),
            caption.map(str::to_string),
        ));
        Ok(())
    }

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> Result<()> {
        self.check()?;
        self.sent.lock().push(Sent::Edit(handle, text.to_string()));
        Ok(())
    }
}

pub struct MemoryUserStore {
    default_quota: i64,
    quotas: Mutex<HashMap<i64, i64>>,
    settings: Mutex<HashMap<i64, UserSettings>>,
    records: Mutex<HashMap<i64, Vec<StatsRecord>>>,
    fail_settings: AtomicBool,
    fail_statistics: AtomicBool,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        MemoryUserStore::with_quota(3)
    }
}

impl MemoryUserStore {
    pub fn with_quota(default_quota: i64) -> Self {
        MemoryUserStore {
            default_quota,
            quotas: Mutex::new(HashMap::new()),
            settings: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            fail_settings: AtomicBool::new(false),
            fail_statistics: AtomicBool::new(false),
        }
    }

    pub fn quota(&self, user_id: i64) -> i64 {
        *self
            .quotas
            .lock()
            .get(&user_id)
            .unwrap_or(&self.default_quota)
    }

    pub fn settings(&self, user_id: i64) -> UserSettings {
        self.settings
            .lock()
            .get(&user_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_settings(&self, user_id: i64, settings: UserSettings) {
        self.settings.lock().insert(user_id, settings);
    }

    pub fn records(&self, user_id: i64) -> Vec<StatsRecord> {
        self.records
            .lock()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_settings(&self, fail: bool) {
        self.fail_settings.store(fail, Ordering::SeqCst);
    }

    pub fn fail_statistics(&self, fail: bool) {
        self.fail_statistics.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn check_quota(&self, user_id: i64) -> Result<QuotaStatus> {
        Ok(QuotaStatus {
            active: true,
            remaining: self.quota(user_id),
        })
    }

    async fn decrement_quota(&self, user_id: i64) -> Result<bool> {
        let mut quotas = self.quotas.lock();
        let remaining = quotas.entry(user_id).or_insert(self.default_quota);
        if *remaining <= 0 {
            return Ok(false);
        }
        *remaining -= 1;
        Ok(true)
    }

    async fn record_statistics(&self, user_id: i64, record: &StatsRecord) -> Result<()> {
        if self.fail_statistics.load(Ordering::SeqCst) {
            return Err(anyhow!("statistics storage unavailable"));
        }
        self.records
            .lock()
            .entry(user_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn get_settings(&self, user_id: i64) -> Result<UserSettings> {
        if self.fail_settings.load(Ordering::SeqCst) {
            return Err(anyhow!("settings storage unavailable"));
        }
        Ok(self.settings(user_id))
    }

    async fn update_settings(&self, user_id: i64, settings: UserSettings) -> Result<()> {
        self.set_settings(user_id, settings);
        Ok(())
    }
}

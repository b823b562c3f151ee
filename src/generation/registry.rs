use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::generation::types::{GenerationContext, GenerationPhase};
use crate::provider::types::WebhookEvent;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_ORPHAN_WINDOW: Duration = Duration::from_secs(30);
const MAX_PARKED_PER_REQUEST: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request {0} is already registered")]
    Duplicate(String),
}

#[derive(Debug)]
struct ParkedEvent {
    event: WebhookEvent,
    parked_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    active: HashMap<String, GenerationContext>,
    // Events that arrived before their context was registered.
    orphans: HashMap<String, Vec<ParkedEvent>>,
    // Retired ids; late duplicates for these are never parked.
    retired: HashMap<String, DateTime<Utc>>,
}

/// In-flight generations keyed by provider request id. The only authority on
/// whether a webhook is recognized.
#[derive(Debug)]
pub struct GenerationRegistry {
    inner: Mutex<RegistryInner>,
    max_age: TimeDelta,
    orphan_window: TimeDelta,
}

fn to_delta(duration: Duration, fallback: TimeDelta) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(fallback)
}

impl Default for GenerationRegistry {
    fn default() -> Self {
        GenerationRegistry::new(DEFAULT_MAX_AGE, DEFAULT_ORPHAN_WINDOW)
    }
}

impl GenerationRegistry {
    pub fn new(max_age: Duration, orphan_window: Duration) -> Self {
        GenerationRegistry {
            inner: Mutex::new(RegistryInner::default()),
            max_age: to_delta(max_age, TimeDelta::hours(1)),
            orphan_window: to_delta(orphan_window, TimeDelta::seconds(30)),
        }
    }

    /// Registers a context and returns any events parked for its id, in
    /// arrival order, for the caller to replay.
    pub fn insert(&self, context: GenerationContext) -> Result<Vec<WebhookEvent>, RegistryError> {
        self.insert_at(context, Utc::now())
    }

    pub(crate) fn insert_at(
        &self,
        context: GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookEvent>, RegistryError> {
        let mut inner = self.inner.lock();
        self.sweep_locked(&mut inner, now);

        if inner.active.contains_key(&context.request_id) {
            warn!(
                "Refusing duplicate registration for request_id={}",
                context.request_id
            );
            return Err(RegistryError::Duplicate(context.request_id));
        }

        let request_id = context.request_id.clone();
        inner.retired.remove(&request_id);
        inner.active.insert(request_id.clone(), context);

        let window = self.orphan_window;
        let parked = inner
            .orphans
            .remove(&request_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|parked| now - parked.parked_at <= window)
            .map(|parked| parked.event)
            .collect::<Vec<_>>();
        if !parked.is_empty() {
            info!(
                "Releasing {} early webhook event(s) for request_id={}",
                parked.len(),
                request_id
            );
        }
        Ok(parked)
    }

    pub fn lookup(&self, request_id: &str) -> Option<GenerationContext> {
        self.inner.lock().active.get(request_id).cloned()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inner.lock().active.contains_key(request_id)
    }

    /// Records progress; returns false when the id is no longer registered.
    pub fn mark_progress(&self, request_id: &str, percent: f64) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.get_mut(request_id) {
            Some(context) => {
                context.phase = GenerationPhase::InProgress { percent };
                true
            }
            None => false,
        }
    }

    /// Removes and returns the context. Removing an absent id is a no-op.
    pub fn remove(&self, request_id: &str) -> Option<GenerationContext> {
        self.remove_at(request_id, Utc::now())
    }

    pub(crate) fn remove_at(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Option<GenerationContext> {
        let mut inner = self.inner.lock();
        let removed = inner.active.remove(request_id);
        if removed.is_some() {
            inner.retired.insert(request_id.to_string(), now);
        }
        removed
    }

    /// Holds an unrecognized event briefly in case its registration is still
    /// on the way. Returns false when the event was not parked.
    pub fn park_unrecognized(&self, event: WebhookEvent) -> bool {
        self.park_unrecognized_at(event, Utc::now())
    }

    pub(crate) fn park_unrecognized_at(&self, event: WebhookEvent, now: DateTime<Utc>) -> bool {
        if event.request_id.trim().is_empty() || self.orphan_window <= TimeDelta::zero() {
            return false;
        }

        let mut inner = self.inner.lock();
        self.sweep_locked(&mut inner, now);
        if inner.retired.contains_key(&event.request_id)
            || inner.active.contains_key(&event.request_id)
        {
            return false;
        }

        let queue = inner.orphans.entry(event.request_id.clone()).or_default();
        if queue.len() >= MAX_PARKED_PER_REQUEST {
            return false;
        }
        debug!(
            "Parking {} event for unregistered request_id={}",
            event.event.as_str(),
            event.request_id
        );
        queue.push(ParkedEvent {
            event,
            parked_at: now,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    fn sweep_locked(&self, inner: &mut RegistryInner, now: DateTime<Utc>) {
        let max_age = self.max_age;
        let expired = inner
            .active
            .iter()
            .filter(|(_, context)| now - context.start_time > max_age)
            .map(|(request_id, _)| request_id.clone())
            .collect::<Vec<_>>();
        for request_id in expired {
            if let Some(context) = inner.active.remove(&request_id) {
                warn!(
                    "Expiring abandoned generation request_id={} user_id={} style={}",
                    request_id, context.user_id, context.style
                );
                inner.retired.insert(request_id, now);
            }
        }

        let window = self.orphan_window;
        inner.orphans.retain(|_, queue| {
            queue.retain(|parked| now - parked.parked_at <= window);
            !queue.is_empty()
        });
        inner.retired.retain(|_, retired_at| now - *retired_at <= max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::EventKind;
    use crate::styles::{resolve_generation_params, QualityPreset, Style};

    fn context(request_id: &str, user_id: i64) -> GenerationContext {
        GenerationContext::new(
            request_id,
            user_id,
            Style::Cyberpunk,
            resolve_generation_params(Style::Cyberpunk, QualityPreset::Balanced, 2),
            None,
        )
    }

    fn event(request_id: &str, kind: EventKind) -> WebhookEvent {
        WebhookEvent {
            request_id: request_id.to_string(),
            event: kind,
            status: kind.as_str().to_string(),
            progress: None,
            result: None,
            error: None,
        }
    }

    #[test]
    fn lookup_returns_inserted_context_unchanged() {
        let registry = GenerationRegistry::default();
        let ctx = context("req-1", 7);
        registry.insert(ctx.clone()).unwrap();
        assert_eq!(registry.lookup("req-1"), Some(ctx));
        assert_eq!(registry.lookup("req-unknown"), None);
    }

    #[test]
    fn duplicate_insert_is_rejected_and_keeps_original() {
        let registry = GenerationRegistry::default();
        registry.insert(context("req-1", 7)).unwrap();
        let err = registry.insert(context("req-1", 8)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("req-1".to_string()));
        assert_eq!(registry.lookup("req-1").unwrap().user_id, 7);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = GenerationRegistry::default();
        registry.insert(context("req-1", 7)).unwrap();
        assert!(registry.remove("req-1").is_some());
        assert!(registry.remove("req-1").is_none());
        assert!(registry.remove("never-seen").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn progress_updates_phase_only_for_known_ids() {
        let registry = GenerationRegistry::default();
        registry.insert(context("req-1", 7)).unwrap();
        assert!(registry.mark_progress("req-1", 40.0));
        assert_eq!(
            registry.lookup("req-1").unwrap().phase,
            GenerationPhase::InProgress { percent: 40.0 }
        );
        assert!(!registry.mark_progress("req-2", 40.0));
    }

    #[test]
    fn early_events_are_released_on_registration() {
        let registry = GenerationRegistry::default();
        assert!(registry.park_unrecognized(event("req-1", EventKind::Progress)));
        assert!(registry.park_unrecognized(event("req-1", EventKind::Completed)));

        let released = registry.insert(context("req-1", 7)).unwrap();
        let kinds = released.iter().map(|e| e.event).collect::<Vec<_>>();
        assert_eq!(kinds, vec![EventKind::Progress, EventKind::Completed]);

        registry.remove("req-1");
        let released = registry.insert(context("req-1", 7)).unwrap();
        assert!(released.is_empty());
    }

    #[test]
    fn stale_orphans_are_dropped() {
        let registry = GenerationRegistry::new(DEFAULT_MAX_AGE, Duration::from_secs(30));
        let now = Utc::now();
        assert!(registry
            .park_unrecognized_at(event("req-1", EventKind::Progress), now - TimeDelta::seconds(60)));
        let released = registry.insert_at(context("req-1", 7), now).unwrap();
        assert!(released.is_empty());
    }

    #[test]
    fn retired_ids_are_not_parked() {
        let registry = GenerationRegistry::default();
        registry.insert(context("req-1", 7)).unwrap();
        registry.remove("req-1");
        assert!(!registry.park_unrecognized(event("req-1", EventKind::Failed)));
        assert!(registry.lookup("req-1").is_none());
    }

    #[test]
    fn abandoned_entries_expire_on_insert() {
        let registry = GenerationRegistry::new(Duration::from_secs(3600), DEFAULT_ORPHAN_WINDOW);
        let mut old = context("req-old", 1);
        old.start_time = Utc::now() - TimeDelta::hours(2);
        registry.insert(old).unwrap();
        assert!(registry.contains("req-old"));

        registry.insert(context("req-new", 2)).unwrap();
        assert!(!registry.contains("req-old"));
        assert!(registry.contains("req-new"));
    }

    #[test]
    fn blank_ids_are_never_parked() {
        let registry = GenerationRegistry::default();
        assert!(!registry.park_unrecognized(event("  ", EventKind::Completed)));
    }
}

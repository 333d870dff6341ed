//! Integration tests for the persistent session strategy: storage protocol,
//! rotation, overrides and convergence between contexts sharing storage.
//!
//! All collaborators are deterministic: a manual clock, scripted ids, a
//! counting sampler and in-memory storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use lm_domain::config::SessionTrackingConfig;
use lm_domain::error::{Error, Result};
use lm_domain::meta::MetaSession;
use lm_sessions::{
    EventSink, IdGenerator, ManualClock, MemoryStorage, MetaPublisher, PersistentSessionsManager,
    Sampler, SessionDeps, SessionEvent, SessionMetas, SessionOverride, StorageAdapter,
    SESSION_EXPIRATION_TIME, SESSION_INACTIVITY_TIME, SESSION_PERSISTENCE_TIME_BUFFER, STORAGE_KEY,
};

/// 2023-01-01T00:00:00Z
const T: i64 = 1_672_531_200_000;
const INACT: i64 = SESSION_INACTIVITY_TIME as i64;
const EXP: i64 = SESSION_EXPIRATION_TIME as i64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hands out the next scripted id, then numbered fallbacks.
#[derive(Default)]
struct ScriptedIds {
    next: Mutex<Vec<String>>,
    minted: AtomicUsize,
}

impl ScriptedIds {
    fn queue(&self, id: &str) {
        self.next.lock().insert(0, id.to_owned());
    }
}

impl IdGenerator for ScriptedIds {
    fn gen_short_id(&self) -> Result<String> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst);
        Ok(self.next.lock().pop().unwrap_or_else(|| format!("gen{n}")))
    }
}

struct CountingSampler {
    calls: AtomicUsize,
}

impl Sampler for CountingSampler {
    fn is_sampled(&self, _rate: f64) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Memory storage that counts writes and can be switched to failing.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    sets: AtomicUsize,
    broken: Mutex<bool>,
}

impl FlakyStorage {
    fn raw(&self) -> Option<serde_json::Value> {
        self.inner
            .get(STORAGE_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    fn put(&self, value: serde_json::Value) {
        self.inner.set(STORAGE_KEY, value.to_string()).unwrap();
    }

    fn break_writes(&self, broken: bool) {
        *self.broken.lock() = broken;
    }
}

impl StorageAdapter for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        if *self.broken.lock() {
            return Err(Error::Storage("quota exceeded".into()));
        }
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }
}

#[derive(Default)]
struct RecordingEvents(Mutex<Vec<SessionEvent>>);

impl EventSink for RecordingEvents {
    fn push_event(&self, event: SessionEvent) {
        self.0.lock().push(event);
    }
}

type Change = (Option<MetaSession>, MetaSession);

/// One execution context ("tab") plus handles on its collaborators.
struct Tab {
    clock: Arc<ManualClock>,
    ids: Arc<ScriptedIds>,
    sampler: Arc<CountingSampler>,
    metas: Arc<SessionMetas>,
    events: Arc<RecordingEvents>,
    changes: Arc<Mutex<Vec<Change>>>,
}

impl Tab {
    fn new(now: i64) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(now)),
            ids: Arc::new(ScriptedIds::default()),
            sampler: Arc::new(CountingSampler {
                calls: AtomicUsize::new(0),
            }),
            metas: Arc::new(SessionMetas::new()),
            events: Arc::new(RecordingEvents::default()),
            changes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn deps(&self, storage: Arc<dyn StorageAdapter>) -> SessionDeps {
        let changes = self.changes.clone();
        SessionDeps::default()
            .with_storage(storage)
            .with_clock(self.clock.clone())
            .with_ids(self.ids.clone())
            .with_sampler(self.sampler.clone())
            .with_publisher(self.metas.clone())
            .with_events(self.events.clone())
            .on_session_change(move |old, new| {
                changes.lock().push((old.cloned(), new.clone()));
            })
    }

    fn open(&self, storage: Arc<dyn StorageAdapter>, config: &SessionTrackingConfig) -> PersistentSessionsManager {
        PersistentSessionsManager::new(config, self.deps(storage)).unwrap()
    }

    fn reset_counters(&self) {
        self.sampler.calls.store(0, Ordering::SeqCst);
        self.changes.lock().clear();
        self.events.0.lock().clear();
    }

    fn sampler_calls(&self) -> usize {
        self.sampler.calls.load(Ordering::SeqCst)
    }
}

fn persistent() -> SessionTrackingConfig {
    SessionTrackingConfig {
        persistent: true,
        ..Default::default()
    }
}

fn stored_123() -> serde_json::Value {
    json!({ "sessionId": "123", "lastActivity": T, "started": T, "isSampled": true })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Refresh
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn valid_session_only_refreshes_last_activity() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T);

    let mut mgr = tab.open(storage.clone(), &persistent());
    mgr.update_session();

    // Adoption at the same instant does not write; the probe writes once.
    assert_eq!(storage.sets.load(Ordering::SeqCst), 1);
    assert_eq!(storage.raw().unwrap(), stored_123());
    assert!(!storage
        .inner
        .get(STORAGE_KEY)
        .unwrap()
        .unwrap()
        .contains("sessionMeta"));
    assert!(tab.changes.lock().is_empty());
    assert_eq!(tab.sampler_calls(), 0);
    assert_eq!(tab.metas.session_meta().unwrap().id, "123");
}

#[test]
fn refresh_within_limits_keeps_identity() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());

    tab.clock.set(T + INACT - 1);
    mgr.update_session();

    let stored = storage.raw().unwrap();
    assert_eq!(stored["sessionId"], "123");
    assert_eq!(stored["lastActivity"], T + INACT - 1);
    assert_eq!(stored["started"], T);
    assert!(tab.changes.lock().is_empty());
}

#[test]
fn resume_is_reported_without_hook() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T + 5_000);
    let mgr = tab.open(storage.clone(), &persistent());

    assert_eq!(mgr.current_session().session_id, "123");
    assert_eq!(storage.raw().unwrap()["lastActivity"], T + 5_000);
    assert!(tab.changes.lock().is_empty());
    assert_eq!(
        *tab.events.0.lock(),
        vec![SessionEvent::Resume {
            session_id: "123".into()
        }]
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rotation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn inactivity_rotates_session() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());

    tab.ids.queue("abcde");
    tab.clock.set(T + INACT);
    mgr.update_session();

    let expected_meta = json!({
        "id": "abcde",
        "attributes": { "previousSession": "123", "isSampled": "true" }
    });
    assert_eq!(
        storage.raw().unwrap(),
        json!({
            "sessionId": "abcde",
            "lastActivity": T + INACT,
            "started": T + INACT,
            "isSampled": true,
            "sessionMeta": expected_meta,
        })
    );
    let published = tab.metas.session_meta().unwrap();
    assert_eq!(serde_json::to_value(&published).unwrap(), expected_meta);

    let changes = tab.changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, None);
    assert_eq!(changes[0].1, published);
    assert_eq!(tab.sampler_calls(), 1);
}

#[test]
fn lifetime_rotates_session_with_stored_meta_as_old() {
    let storage = Arc::new(FlakyStorage::default());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());
    tab.reset_counters();

    // Another writer replaces the auto-created session.
    let old_meta = json!({
        "id": "aaaa",
        "attributes": { "previousSession": "bbbb", "isSampled": "true" }
    });
    let mut stored = stored_123();
    stored["sessionMeta"] = old_meta.clone();
    storage.put(stored);

    tab.ids.queue("abcde");
    tab.clock.set(T + EXP);
    mgr.update_session();

    let session = storage.raw().unwrap();
    assert_eq!(session["sessionId"], "abcde");
    assert_eq!(session["started"], T + EXP);
    assert_eq!(session["lastActivity"], T + EXP);
    assert_eq!(session["sessionMeta"]["attributes"]["previousSession"], "123");

    let changes = tab.changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(serde_json::to_value(&changes[0].0).unwrap(), old_meta);
    assert_eq!(changes[0].1.id, "abcde");
    assert_eq!(
        *tab.events.0.lock(),
        vec![SessionEvent::Extend {
            session_id: "abcde".into(),
            previous_session: "123".into()
        }]
    );
}

#[test]
fn lifetime_applies_even_with_recent_activity() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(json!({
        "sessionId": "123", "lastActivity": T + EXP - 1_000, "started": T, "isSampled": false
    }));
    let tab = Tab::new(T + EXP - 500);
    let mut mgr = tab.open(storage.clone(), &persistent());
    assert_eq!(mgr.current_session().session_id, "123");

    tab.clock.set(T + EXP);
    mgr.update_session();
    assert_ne!(mgr.current_session().session_id, "123");
    assert_eq!(tab.changes.lock().len(), 1);
}

#[test]
fn expired_stored_session_rotates_at_startup() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T + INACT + 1);
    tab.ids.queue("fresh");

    let mgr = tab.open(storage.clone(), &persistent());

    assert_eq!(mgr.current_session().session_id, "fresh");
    assert_eq!(
        storage.raw().unwrap()["sessionMeta"]["attributes"]["previousSession"],
        "123"
    );
    let changes = tab.changes.lock();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].0.is_none());
}

#[test]
fn unrecoverable_stored_session_is_purged() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T + EXP + SESSION_PERSISTENCE_TIME_BUFFER as i64);
    tab.ids.queue("fresh");

    let mgr = tab.open(storage.clone(), &persistent());

    assert_eq!(mgr.current_session().session_id, "fresh");
    let stored = storage.raw().unwrap();
    assert_eq!(stored["sessionId"], "fresh");
    assert!(stored["sessionMeta"]["attributes"].get("previousSession").is_none());
    assert_eq!(
        *tab.events.0.lock(),
        vec![SessionEvent::Start {
            session_id: "fresh".into()
        }]
    );
}

#[test]
fn malformed_stored_session_is_replaced() {
    let storage = Arc::new(FlakyStorage::default());
    storage.inner.set(STORAGE_KEY, "{\"sessionId\":".into()).unwrap();
    let tab = Tab::new(T);
    tab.ids.queue("fresh");

    let mgr = tab.open(storage.clone(), &persistent());

    assert_eq!(mgr.current_session().session_id, "fresh");
    assert_eq!(storage.raw().unwrap()["sessionId"], "fresh");
    assert_eq!(tab.changes.lock().len(), 1);
    assert_eq!(tab.sampler_calls(), 1);
}

#[test]
fn sampling_is_stable_across_refreshes() {
    let storage = Arc::new(FlakyStorage::default());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());
    assert_eq!(tab.sampler_calls(), 1);

    for _ in 0..10 {
        tab.clock.advance(60_000);
        mgr.update_session();
    }
    assert_eq!(tab.sampler_calls(), 1);
    assert_eq!(storage.raw().unwrap()["isSampled"], true);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manual override
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn override_replaces_session_and_redraws_sampling() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(json!({ "sessionId": "123", "isSampled": true }));
    let config = SessionTrackingConfig {
        persistent: true,
        session: Some(lm_domain::config::InitialSession {
            id: "123".into(),
            attributes: Default::default(),
        }),
        ..Default::default()
    };
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &config);
    assert_eq!(storage.raw().unwrap()["sessionId"], "123");
    let before = tab.metas.session_meta();
    tab.reset_counters();

    mgr.set_session(SessionOverride::new("xyz"));

    assert_eq!(tab.sampler_calls(), 1);
    assert_eq!(storage.raw().unwrap()["sessionId"], "xyz");
    let changes = tab.changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, before);
    assert_eq!(changes[0].1.id, "xyz");
    assert_eq!(
        changes[0].1.attributes.previous_session.as_deref(),
        Some("123")
    );
}

#[test]
fn override_with_attributes_is_persisted() {
    let storage = Arc::new(FlakyStorage::default());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());

    mgr.set_session(SessionOverride::new("xyz").with_attribute("tenant", "acme"));

    let stored = storage.raw().unwrap();
    assert_eq!(stored["sessionMeta"]["attributes"]["tenant"], "acme");
    assert_eq!(stored["sessionMeta"]["attributes"]["isSampled"], "true");
    assert_eq!(tab.metas.session_meta().unwrap().attributes.extra["tenant"], "acme");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage failures and cross-context convergence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn failing_storage_degrades_to_memory() {
    let storage = Arc::new(FlakyStorage::default());
    storage.break_writes(true);
    let tab = Tab::new(T);
    tab.ids.queue("mem");

    let mut mgr = tab.open(storage.clone(), &persistent());
    assert_eq!(mgr.current_session().session_id, "mem");
    assert!(storage.raw().is_none());

    tab.clock.advance(60_000);
    mgr.update_session();
    assert_eq!(mgr.current_session().session_id, "mem");
    assert_eq!(mgr.current_session().last_activity, T + 60_000);
    assert_eq!(tab.changes.lock().len(), 1);

    storage.break_writes(false);
    tab.clock.advance(60_000);
    mgr.update_session();
    assert_eq!(storage.raw().unwrap()["sessionId"], "mem");
}

#[test]
fn full_storage_keeps_rotated_session_over_stale_record() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());
    storage.break_writes(true);

    tab.ids.queue("rot1");
    tab.clock.set(T + INACT);
    mgr.update_session();
    assert_eq!(mgr.current_session().session_id, "rot1");

    // Storage still holds the expired "123"; it must not rotate again.
    for step in 1..=2 {
        tab.clock.set(T + INACT + step * 1_000);
        mgr.update_session();
        assert_eq!(mgr.current_session().session_id, "rot1");
        assert_eq!(mgr.current_session().last_activity, T + INACT + step * 1_000);
    }
    assert_eq!(tab.metas.session_meta().unwrap().id, "rot1");
    assert_eq!(tab.changes.lock().len(), 1);
    assert_eq!(tab.sampler_calls(), 1);
    assert_eq!(storage.raw().unwrap(), stored_123());

    // The next tick after storage recovers persists the in-memory session.
    storage.break_writes(false);
    tab.clock.advance(1_000);
    mgr.update_session();
    let stored = storage.raw().unwrap();
    assert_eq!(stored["sessionId"], "rot1");
    assert_eq!(stored["started"], T + INACT);
    assert_eq!(stored["sessionMeta"]["attributes"]["previousSession"], "123");
    assert_eq!(tab.changes.lock().len(), 1);
}

#[test]
fn full_storage_keeps_override_over_stale_record() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());
    storage.break_writes(true);

    mgr.set_session(SessionOverride::new("xyz"));
    tab.clock.advance(1_000);
    mgr.update_session();

    assert_eq!(mgr.current_session().session_id, "xyz");
    assert_eq!(tab.metas.session_meta().unwrap().id, "xyz");
    assert_eq!(tab.changes.lock().len(), 1);
    assert_eq!(storage.raw().unwrap()["sessionId"], "123");

    storage.break_writes(false);
    tab.clock.advance(1_000);
    mgr.update_session();
    assert_eq!(storage.raw().unwrap()["sessionId"], "xyz");
}

#[test]
fn full_storage_at_startup_keeps_rotated_session() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    storage.break_writes(true);
    let tab = Tab::new(T + INACT + 1);
    tab.ids.queue("fresh");

    let mut mgr = tab.open(storage.clone(), &persistent());
    assert_eq!(mgr.current_session().session_id, "fresh");

    tab.clock.advance(1_000);
    mgr.update_session();
    assert_eq!(mgr.current_session().session_id, "fresh");
    assert_eq!(tab.changes.lock().len(), 1);
}

#[test]
fn full_storage_still_adopts_newer_writes() {
    let storage = Arc::new(FlakyStorage::default());
    storage.put(stored_123());
    let tab = Tab::new(T);
    let mut mgr = tab.open(storage.clone(), &persistent());
    storage.break_writes(true);

    tab.ids.queue("rot1");
    tab.clock.set(T + INACT);
    mgr.update_session();

    // Another context manages a write after ours failed.
    storage.put(json!({
        "sessionId": "theirs", "lastActivity": T + INACT, "started": T + INACT, "isSampled": true
    }));
    tab.clock.advance(1_000);
    mgr.update_session();

    assert_eq!(mgr.current_session().session_id, "theirs");
    assert_eq!(tab.metas.session_meta().unwrap().id, "theirs");
    assert_eq!(tab.changes.lock().len(), 1);
}

#[test]
fn tabs_converge_on_latest_rotation() {
    let storage = Arc::new(FlakyStorage::default());
    let tab_a = Tab::new(T);
    tab_a.ids.queue("first");
    let mut a = tab_a.open(storage.clone(), &persistent());

    let tab_b = Tab::new(T + 1_000);
    let mut b = tab_b.open(storage.clone(), &persistent());
    assert_eq!(b.current_session().session_id, "first");

    // Tab A goes idle long enough to rotate on its next probe.
    tab_a.ids.queue("second");
    tab_a.clock.set(T + 1_000 + INACT);
    a.update_session();
    assert_eq!(a.current_session().session_id, "second");

    // Tab B picks the new session up on its next probe without rotating.
    tab_b.clock.set(T + 1_000 + INACT + 10);
    b.update_session();
    assert_eq!(b.current_session().session_id, "second");
    assert_eq!(tab_b.metas.session_meta().unwrap().id, "second");
    assert!(tab_b.changes.lock().is_empty());
}

#[test]
fn storage_notification_adopts_other_context_session() {
    let storage = Arc::new(FlakyStorage::default());
    let tab = Tab::new(T);
    tab.ids.queue("mine");
    let mut mgr = tab.open(storage.clone(), &persistent());
    tab.reset_counters();

    let theirs = json!({
        "sessionId": "theirs", "lastActivity": T, "started": T, "isSampled": false
    })
    .to_string();
    mgr.on_storage_change("unrelated", Some(&theirs));
    assert_eq!(mgr.current_session().session_id, "mine");

    mgr.on_storage_change(STORAGE_KEY, Some("garbage"));
    assert_eq!(mgr.current_session().session_id, "mine");

    mgr.on_storage_change(STORAGE_KEY, Some(&theirs));
    assert_eq!(mgr.current_session().session_id, "theirs");
    let meta = tab.metas.session_meta().unwrap();
    assert_eq!(meta.id, "theirs");
    assert_eq!(meta.attributes.is_sampled, Some(false));
    assert!(tab.changes.lock().is_empty());
}

#[test]
fn shared_record_keeps_freshest_activity() {
    let storage = Arc::new(FlakyStorage::default());
    let tab_a = Tab::new(T);
    let mut a = tab_a.open(storage.clone(), &persistent());
    let tab_b = Tab::new(T);
    let mut b = tab_b.open(storage.clone(), &persistent());

    tab_a.clock.set(T + 10_000);
    a.update_session();
    // B's clock lags behind A's.
    tab_b.clock.set(T + 4_000);
    b.update_session();

    assert_eq!(storage.raw().unwrap()["lastActivity"], T + 10_000);
}

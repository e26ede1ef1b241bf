//! Identity resolution and per-user visit profiles
//!
//! ## Locking
//!
//! Two tiers, always taken in the same order:
//! 1. the store lock guards the `unauthenticated` / `authenticated` maps
//! 2. each profile has its own lock guarding its window and sessions
//!
//! The store lock is released before a visit is recorded, so scoring one
//! identity never blocks the lookup or scoring of another. Promotion is the
//! only place that touches a profile while the store lock is held.

use super::types::{Clock, Identity};
use super::window::{VisitWindow, WindowPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

pub type SharedProfile = Arc<Mutex<UserProfile>>;

#[derive(Debug, Clone)]
pub struct UserProfile {
    primary_user_id: Option<String>,
    sessions: HashSet<String>,
    window: VisitWindow,
}

/// Result of recording one visit, copied out of the profile lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitOutcome {
    pub user_id: Option<String>,
    pub frequency_score: u32,
    pub is_frequent_visitor: bool,
}

impl UserProfile {
    pub fn new(session_id: Option<&str>, user_id: Option<&str>, policy: WindowPolicy) -> Self {
        Self {
            primary_user_id: user_id.map(str::to_string),
            sessions: session_id.map(str::to_string).into_iter().collect(),
            window: VisitWindow::new(policy),
        }
    }

    fn adopt_user_id(&mut self, user_id: &str) {
        if self.primary_user_id.is_none() {
            self.primary_user_id = Some(user_id.to_string());
        }
    }

    pub fn record_visit(
        &mut self,
        session_id: Option<&str>,
        user_id: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> VisitOutcome {
        if let Some(user) = user_id {
            self.adopt_user_id(user);
        }
        if self.primary_user_id.is_some() {
            if let Some(session) = session_id {
                self.sessions.insert(session.to_string());
            }
        }

        let frequent = self.window.record_visit(now);
        log::debug!(
            "Recorded visit {:?}/{:?}: score={} frequent={}",
            session_id,
            self.primary_user_id,
            self.window.frequency_score(),
            frequent
        );

        VisitOutcome {
            user_id: self.primary_user_id.clone(),
            frequency_score: self.window.frequency_score(),
            is_frequent_visitor: frequent,
        }
    }

    pub fn primary_user_id(&self) -> Option<&str> {
        self.primary_user_id.as_deref()
    }

    pub fn sessions(&self) -> &HashSet<String> {
        &self.sessions
    }

    pub fn frequency_score(&self) -> u32 {
        self.window.frequency_score()
    }

    pub fn is_frequent_visitor(&self) -> bool {
        self.window.is_frequent_visitor()
    }

    pub fn window(&self) -> &VisitWindow {
        &self.window
    }
}

#[derive(Default)]
struct IdentityMaps {
    unauthenticated: HashMap<String, SharedProfile>,
    authenticated: HashMap<String, SharedProfile>,
}

/// Process-wide profile store shared by every shard dispatcher
pub struct ProfileStore {
    maps: Mutex<IdentityMaps>,
    policy: WindowPolicy,
    clock: Clock,
}

impl ProfileStore {
    pub fn new(policy: WindowPolicy, clock: Clock) -> Self {
        Self {
            maps: Mutex::new(IdentityMaps::default()),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Resolve the visit to a profile, then record it on that profile
    ///
    /// Returns `None` when the visit carries neither a session nor a user id.
    pub fn record_visit(&self, session_id: Option<&str>, user_id: Option<&str>) -> Option<VisitOutcome> {
        let profile = self.resolve(session_id, user_id)?;
        let mut guard = lock_profile(&profile);
        // Read the clock under the profile lock so visits apply in time order
        let now = (self.clock)();
        Some(guard.record_visit(session_id, user_id, now))
    }

    /// Find or create the profile for a (session, user) pair
    pub fn resolve(&self, session_id: Option<&str>, user_id: Option<&str>) -> Option<SharedProfile> {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());

        match (user_id, session_id) {
            (None, None) => None,
            (None, Some(session)) => Some(
                maps.unauthenticated
                    .entry(session.to_string())
                    .or_insert_with(|| {
                        log::debug!("New anonymous profile for session {}", session);
                        Arc::new(Mutex::new(UserProfile::new(Some(session), None, self.policy)))
                    })
                    .clone(),
            ),
            (Some(user), session) => {
                if let Some(profile) = maps.authenticated.get(user) {
                    return Some(profile.clone());
                }

                let promoted = session.and_then(|s| maps.unauthenticated.remove(s));
                let profile = match promoted {
                    Some(profile) => {
                        log::info!(
                            "Session {} authenticated as {}, merging anonymous history",
                            session.unwrap_or_default(),
                            user
                        );
                        lock_profile(&profile).adopt_user_id(user);
                        profile
                    }
                    None => Arc::new(Mutex::new(UserProfile::new(session, Some(user), self.policy))),
                };

                maps.authenticated.insert(user.to_string(), profile.clone());
                Some(profile)
            }
        }
    }

    /// Look up an existing profile without creating or recording anything
    pub fn lookup(&self, identity: &Identity) -> Option<SharedProfile> {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        match identity {
            Identity::User(user) => maps.authenticated.get(user).cloned(),
            Identity::Session(session) => maps.unauthenticated.get(session).cloned(),
        }
    }

    /// (anonymous, authenticated) profile counts
    pub fn profile_counts(&self) -> (usize, usize) {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        (maps.unauthenticated.len(), maps.authenticated.len())
    }
}

/// Lock a profile, recovering the guard if a previous holder panicked
pub fn lock_profile(profile: &SharedProfile) -> MutexGuard<'_, UserProfile> {
    profile.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn stepped_clock(start: DateTime<Utc>) -> (Clock, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(start.timestamp()));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || {
            Utc.timestamp_opt(handle.load(Ordering::SeqCst), 0).unwrap()
        });
        (clock, now)
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_anonymous_session_reuses_profile() {
        let (clock, now) = stepped_clock(start());
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        let first = store.record_visit(Some("s1"), None).unwrap();
        assert_eq!(first.frequency_score, 1);
        assert!(!first.is_frequent_visitor);

        now.fetch_add(120, Ordering::SeqCst);
        let second = store.record_visit(Some("s1"), None).unwrap();
        assert_eq!(second.frequency_score, 2);
        assert!(second.is_frequent_visitor);
        assert_eq!(second.user_id, None);
        assert_eq!(store.profile_counts(), (1, 0));
    }

    #[test]
    fn test_authentication_promotes_session_history() {
        let (clock, now) = stepped_clock(start());
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        store.record_visit(Some("s1"), None);
        now.fetch_add(120, Ordering::SeqCst);
        store.record_visit(Some("s1"), None);

        let merged = store.record_visit(Some("s1"), Some("u1")).unwrap();
        assert_eq!(merged.user_id.as_deref(), Some("u1"));
        assert_eq!(merged.frequency_score, 2);
        assert_eq!(store.profile_counts(), (0, 1));

        let profile = store.lookup(&Identity::User("u1".to_string())).unwrap();
        let guard = lock_profile(&profile);
        assert_eq!(guard.primary_user_id(), Some("u1"));
        assert!(guard.sessions().contains("s1"));
        assert!(store.lookup(&Identity::Session("s1".to_string())).is_none());
    }

    #[test]
    fn test_new_sessions_route_to_authenticated_user() {
        let (clock, now) = stepped_clock(start());
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        store.record_visit(Some("s1"), Some("u1"));
        now.fetch_add(60, Ordering::SeqCst);
        let outcome = store.record_visit(Some("s2"), Some("u1")).unwrap();

        assert!(outcome.is_frequent_visitor);
        let profile = store.lookup(&Identity::User("u1".to_string())).unwrap();
        let guard = lock_profile(&profile);
        assert_eq!(guard.sessions().len(), 2);
        assert_eq!(store.profile_counts(), (0, 1));
    }

    #[test]
    fn test_anonymous_profile_keeps_single_session() {
        let (clock, _) = stepped_clock(start());
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        store.record_visit(Some("s1"), None);
        store.record_visit(Some("s1"), None);

        let profile = store.lookup(&Identity::Session("s1".to_string())).unwrap();
        assert_eq!(lock_profile(&profile).sessions().len(), 1);
    }

    #[test]
    fn test_no_identity_is_not_recorded() {
        let (clock, _) = stepped_clock(start());
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        assert!(store.record_visit(None, None).is_none());
        assert_eq!(store.profile_counts(), (0, 0));
    }

    #[test]
    fn test_user_without_session() {
        let (clock, _) = stepped_clock(start());
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        let outcome = store.record_visit(None, Some("u7")).unwrap();
        assert_eq!(outcome.user_id.as_deref(), Some("u7"));
        let profile = store.lookup(&Identity::User("u7".to_string())).unwrap();
        assert!(lock_profile(&profile).sessions().is_empty());
    }

    #[test]
    fn test_clock_is_read_while_profile_is_locked() {
        let watched: Arc<Mutex<Option<SharedProfile>>> = Arc::new(Mutex::new(None));
        let read_under_lock = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let slot = watched.clone();
        let flag = read_under_lock.clone();
        let clock: Clock = Arc::new(move || {
            if let Some(profile) = slot.lock().unwrap().as_ref() {
                flag.store(profile.try_lock().is_err(), Ordering::SeqCst);
            }
            start()
        });
        let store = ProfileStore::new(WindowPolicy::demo(), clock);

        store.record_visit(Some("s1"), None);
        *watched.lock().unwrap() = store.lookup(&Identity::Session("s1".to_string()));

        store.record_visit(Some("s1"), None);
        assert!(read_under_lock.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_visits_same_identity_are_serialized() {
        let (clock, _) = stepped_clock(start());
        let store = Arc::new(ProfileStore::new(WindowPolicy::demo(), clock));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let session = format!("s{}", i % 2);
                        store.record_visit(Some(&session), Some("shared"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let profile = store.lookup(&Identity::User("shared".to_string())).unwrap();
        let guard = lock_profile(&profile);
        assert_eq!(guard.frequency_score(), 1);
        assert_eq!(guard.sessions().len(), 2);
        assert_eq!(store.profile_counts(), (0, 1));
    }
}

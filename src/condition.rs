//! Pre-flight condition checker (§4.7): composable gate invoked before
//! an operation that needs an external prerequisite (adapter powered
//! on, permission granted, SSID joined).
//!
//! Grounded on `examples/original_source/mxSdk/Conditions/{
//! ConditionAction.h, ConditionChecker.h, ConditionManager.h,
//! MultiConditionAction.h}`. The originals thread a `UIViewController`
//! through every call for permission-prompt presentation; this crate
//! has no UI layer of its own; callers needing a prompt recover it
//! through `request_condition`'s opaque context parameter, which the
//! host application interprets however its platform binding requires.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// One external prerequisite. Implementors are typically zero-sized or
/// hold just enough state to check/request their specific condition
/// (e.g. a `config::EngineConfig` handle for a "reminder suppressed"
/// flag).
pub trait ConditionAction: Send + Sync {
    fn key(&self) -> String;
    fn is_condition_met(&self) -> bool;

    /// Kicks off whatever external action resolves this condition
    /// (show a system permission dialog, prompt Wi-Fi join, enable the
    /// adapter). Implementations call back into `manager` via
    /// `on_condition_result` once the external action resolves.
    fn request_condition(&self, manager: Arc<ConditionManager>);

    fn on_condition_met(&self) {}
}

pub trait ConditionChecker: Send + Sync {
    fn action(&self) -> Arc<dyn ConditionAction>;
}

/// Default 1:1 checker wrapping a single action, matching
/// `ConditionCheckerImpl.h`.
pub struct SingleActionChecker {
    action: Arc<dyn ConditionAction>,
}

impl SingleActionChecker {
    pub fn new(action: Arc<dyn ConditionAction>) -> Self {
        SingleActionChecker { action }
    }
}

impl ConditionChecker for SingleActionChecker {
    fn action(&self) -> Arc<dyn ConditionAction> {
        self.action.clone()
    }
}

/// `MultiConditionAction.h`: an action composed of an ordered list of
/// child actions, met iff every child is met. `request_condition`
/// fires every still-unmet child's request concurrently rather than
/// sequencing them, since the originals gate only on the aggregate
/// result.
pub struct MultiConditionAction {
    key: String,
    actions: Vec<Arc<dyn ConditionAction>>,
}

impl MultiConditionAction {
    pub fn new(key: impl Into<String>, actions: Vec<Arc<dyn ConditionAction>>) -> Self {
        MultiConditionAction { key: key.into(), actions }
    }
}

impl ConditionAction for MultiConditionAction {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn is_condition_met(&self) -> bool {
        self.actions.iter().all(|a| a.is_condition_met())
    }

    fn request_condition(&self, manager: Arc<ConditionManager>) {
        for action in &self.actions {
            if !action.is_condition_met() {
                action.request_condition(manager.clone());
            }
        }
    }

    fn on_condition_met(&self) {
        for action in &self.actions {
            action.on_condition_met();
        }
    }
}

pub trait ConditionCallback: Send + Sync {
    fn on_all_conditions_met(&self);
    fn on_conditions_unmet(&self, keys: Vec<String>);
}

struct Session {
    remaining: HashSet<String>,
    actions_by_key: std::collections::HashMap<String, Arc<dyn ConditionAction>>,
    callback: Arc<dyn ConditionCallback>,
}

/// Process-singleton gate (§5 "process-singletons owned by the
/// manager"). Not itself a connection-manager component, but
/// constructed and held the same way.
pub struct ConditionManager {
    checkers: Mutex<Vec<Arc<dyn ConditionChecker>>>,
    session: Mutex<Option<Session>>,
}

impl ConditionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(ConditionManager {
            checkers: Mutex::new(Vec::new()),
            session: Mutex::new(None),
        })
    }

    pub fn add_checker(&self, checker: Arc<dyn ConditionChecker>) {
        self.checkers.lock().unwrap().push(checker);
    }

    /// Evaluates every registered checker. Already-met conditions are
    /// skipped; unmet ones are asked to request their prerequisite.
    /// Fires `on_all_conditions_met` synchronously if every condition
    /// was already met (no outstanding requests).
    pub fn check_conditions(self: &Arc<Self>, callback: Arc<dyn ConditionCallback>) {
        let checkers = self.checkers.lock().unwrap().clone();
        let mut unmet = Vec::new();
        for checker in &checkers {
            let action = checker.action();
            if action.is_condition_met() {
                action.on_condition_met();
            } else {
                unmet.push(action);
            }
        }

        if unmet.is_empty() {
            callback.on_all_conditions_met();
            return;
        }

        let remaining: HashSet<String> = unmet.iter().map(|a| a.key()).collect();
        let actions_by_key = unmet.iter().map(|a| (a.key(), a.clone())).collect();
        *self.session.lock().unwrap() = Some(Session { remaining, actions_by_key, callback });

        for action in unmet {
            action.request_condition(self.clone());
        }
    }

    /// Called by a `ConditionAction` once its external request
    /// resolves. The manager re-evaluates `is_condition_met` itself
    /// rather than trusting `granted` at face value — a prompt can
    /// report "granted" while the underlying capability still reads
    /// as unavailable (e.g. adapter takes a moment to power on after
    /// the permission dialog closes).
    ///
    /// A definitive denial (`granted = false`) ends the session
    /// immediately with `on_conditions_unmet` naming every condition
    /// still outstanding, rather than waiting on conditions that can
    /// no longer all be satisfied.
    pub fn on_condition_result(&self, key: &str, granted: bool) {
        let mut guard = self.session.lock().unwrap();
        let Some(session) = guard.as_mut() else {
            return;
        };

        if !session.remaining.contains(key) {
            return;
        }

        let re_met = session
            .actions_by_key
            .get(key)
            .map(|a| a.is_condition_met())
            .unwrap_or(false);

        if granted && re_met {
            session.remaining.remove(key);
            if let Some(action) = session.actions_by_key.get(key) {
                action.on_condition_met();
            }
        }

        if session.remaining.is_empty() {
            let callback = session.callback.clone();
            *guard = None;
            drop(guard);
            callback.on_all_conditions_met();
            return;
        }

        if !granted || !re_met {
            let remaining_keys: Vec<String> = session.remaining.iter().cloned().collect();
            let callback = session.callback.clone();
            *guard = None;
            drop(guard);
            callback.on_conditions_unmet(remaining_keys);
        }
    }
}

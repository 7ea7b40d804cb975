// Integration coverage of the pre-flight condition checker
// (condition.rs) composed the way a real caller would: several
// independent checkers gating a single operation, plus a composed
// MultiConditionAction whose children observe the "already satisfied"
// notification cascade.

use mxprint_engine::condition::{
    ConditionAction, ConditionCallback, ConditionChecker, ConditionManager, MultiConditionAction,
    SingleActionChecker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct ToggleAction {
    key: &'static str,
    met: AtomicBool,
    grants_on_request: bool,
    notified_met: AtomicBool,
}

impl ToggleAction {
    fn met(key: &'static str) -> Arc<Self> {
        Arc::new(ToggleAction {
            key,
            met: AtomicBool::new(true),
            grants_on_request: true,
            notified_met: AtomicBool::new(false),
        })
    }

    fn unmet_then_granted(key: &'static str) -> Arc<Self> {
        Arc::new(ToggleAction {
            key,
            met: AtomicBool::new(false),
            grants_on_request: true,
            notified_met: AtomicBool::new(false),
        })
    }

    fn unmet_and_denied(key: &'static str) -> Arc<Self> {
        Arc::new(ToggleAction {
            key,
            met: AtomicBool::new(false),
            grants_on_request: false,
            notified_met: AtomicBool::new(false),
        })
    }
}

impl ConditionAction for ToggleAction {
    fn key(&self) -> String {
        self.key.to_string()
    }

    fn is_condition_met(&self) -> bool {
        self.met.load(Ordering::SeqCst)
    }

    fn request_condition(&self, manager: Arc<ConditionManager>) {
        if self.grants_on_request {
            self.met.store(true, Ordering::SeqCst);
        }
        manager.on_condition_result(self.key, self.grants_on_request);
    }

    fn on_condition_met(&self) {
        self.notified_met.store(true, Ordering::SeqCst);
    }
}

struct RecordingCallback {
    all_met: Mutex<bool>,
    unmet_keys: Mutex<Option<Vec<String>>>,
}

impl RecordingCallback {
    fn new() -> Arc<Self> {
        Arc::new(RecordingCallback { all_met: Mutex::new(false), unmet_keys: Mutex::new(None) })
    }
}

impl ConditionCallback for RecordingCallback {
    fn on_all_conditions_met(&self) {
        *self.all_met.lock().unwrap() = true;
    }

    fn on_conditions_unmet(&self, keys: Vec<String>) {
        *self.unmet_keys.lock().unwrap() = Some(keys);
    }
}

#[test]
fn independent_preconditions_all_resolve_before_the_gated_operation_proceeds() {
    let manager = ConditionManager::new();

    // "ble adapter powered on" — already satisfied.
    manager.add_checker(Arc::new(SingleActionChecker::new(ToggleAction::met("ble-powered"))));

    // "location permission" — needs a prompt that ends up granting it.
    manager.add_checker(Arc::new(SingleActionChecker::new(ToggleAction::unmet_then_granted(
        "location-permission",
    ))));

    let callback = RecordingCallback::new();
    manager.check_conditions(callback.clone());

    assert!(*callback.all_met.lock().unwrap());
    assert!(callback.unmet_keys.lock().unwrap().is_none());
}

#[test]
fn a_single_outright_denial_ends_the_session_even_with_other_conditions_pending() {
    let manager = ConditionManager::new();

    manager.add_checker(Arc::new(SingleActionChecker::new(ToggleAction::unmet_then_granted(
        "location-permission",
    ))));
    manager.add_checker(Arc::new(SingleActionChecker::new(ToggleAction::unmet_and_denied("ble-permission"))));

    let callback = RecordingCallback::new();
    manager.check_conditions(callback.clone());

    assert!(!*callback.all_met.lock().unwrap());
    let unmet = callback.unmet_keys.lock().unwrap().clone().unwrap();
    assert_eq!(unmet, vec!["ble-permission".to_string()]);
}

#[test]
fn checkers_registered_across_independent_sessions_do_not_leak_state() {
    let manager = ConditionManager::new();
    manager.add_checker(Arc::new(SingleActionChecker::new(ToggleAction::unmet_then_granted("a"))));

    let first = RecordingCallback::new();
    manager.check_conditions(first.clone());
    assert!(*first.all_met.lock().unwrap());

    // A second independent run against the now-larger checker set must
    // resolve again from its own session state, not the first call's
    // leftover "remaining" set.
    manager.add_checker(Arc::new(SingleActionChecker::new(ToggleAction::unmet_and_denied("b"))));
    let second = RecordingCallback::new();
    manager.check_conditions(second.clone());
    assert!(!*second.all_met.lock().unwrap());
    assert_eq!(second.unmet_keys.lock().unwrap().clone().unwrap(), vec!["b".to_string()]);
}

#[test]
fn already_satisfied_multi_condition_action_notifies_every_child() {
    let manager = ConditionManager::new();

    let wifi_joined = ToggleAction::met("wifi-joined");
    let ap_reachable = ToggleAction::met("ap-reachable");
    let combined: Arc<dyn ConditionAction> = Arc::new(MultiConditionAction::new(
        "network-ready",
        vec![wifi_joined.clone(), ap_reachable.clone()],
    ));
    manager.add_checker(Arc::new(SingleActionChecker::new(combined)));

    let callback = RecordingCallback::new();
    manager.check_conditions(callback.clone());

    assert!(*callback.all_met.lock().unwrap());
    assert!(wifi_joined.notified_met.load(Ordering::SeqCst));
    assert!(ap_reachable.notified_met.load(Ordering::SeqCst));
}

#[test]
fn multi_condition_action_with_any_unmet_child_is_not_met() {
    let wifi_joined = ToggleAction::unmet_and_denied("wifi-joined");
    let ap_reachable = ToggleAction::met("ap-reachable");
    let combined = MultiConditionAction::new("network-ready", vec![wifi_joined, ap_reachable]);
    assert!(!combined.is_condition_met());
}

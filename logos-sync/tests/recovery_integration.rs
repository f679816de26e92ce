//! Crash recovery and teardown integration tests.
//!
//! Verifies:
//! - A crashed session is replaced and rebuilt from external state
//! - The crash limit stops restarts and the controller reports it
//! - A failed restart is reported with the `Restart` phase
//! - Destroy racing with creation never leaks a session
//! - Setter calls made while a session is being created are not lost
//! - Teardown failures are reported and disposal still completes
//! - `initialize` during recovery never creates a second session
//! - Crashes raised off the async runtime still restart
//! - A replacement that rejects the external roots is never published

use std::sync::{Arc, Mutex};

use indexmap::indexmap;
use logos_core::{Editor, EngineError, RootAttributes, RootData, RootsAttributes};
use logos_engine::{YrsEditor, YrsEditorFactory};
use logos_sync::{
    Callbacks, ControllerConfig, ControllerState, ErrorPhase, MultiRootController, SyncError,
    WatchdogConfig, WatchdogState,
};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};

type Controller = MultiRootController<YrsEditorFactory>;
type Reports = Arc<Mutex<Vec<(SyncError, ErrorPhase, bool)>>>;

fn attrs(value: Value) -> RootAttributes {
    serde_json::from_value(value).unwrap()
}

fn sample_data() -> RootData {
    indexmap! {
        "intro".to_string() => "<h2>Sample</h2>".to_string(),
        "content".to_string() => "<p>It is the custom content</p>".to_string(),
    }
}

fn sample_attributes() -> RootsAttributes {
    indexmap! {
        "intro".to_string() => attrs(json!({ "row": "1", "order": 10 })),
        "content".to_string() => attrs(json!({ "row": "1", "order": 20 })),
    }
}

fn config(factory: &YrsEditorFactory, reports: &Reports) -> ControllerConfig<YrsEditorFactory> {
    let sink = reports.clone();
    ControllerConfig::new(factory.clone())
        .roots(sample_data(), sample_attributes())
        .callbacks(Callbacks::new().on_error(move |err, details| {
            sink.lock()
                .unwrap()
                .push((err.clone(), details.phase, details.will_restart))
        }))
}

/// Wait until the controller publishes `state`.
async fn wait_for_state(controller: &Controller, state: ControllerState) {
    let mut rx = controller.subscribe();
    let reached = timeout(Duration::from_secs(2), rx.wait_for(|status| status.state == state))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
    assert!(reached, "controller never reached {state:?}, stuck at {:?}", controller.state());
}

#[tokio::test]
async fn test_crash_replaces_session_and_keeps_state() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();
    let first = controller.editor().unwrap();
    let first_editables = controller.editables();

    first.crash("a-custom-error");

    assert!(controller.editor().is_none());
    assert!(controller.editables().is_empty());
    assert_eq!(controller.state(), ControllerState::Initializing);

    wait_for_state(&controller, ControllerState::Ready).await;

    let second: Arc<YrsEditor> = controller.editor().unwrap();
    assert_ne!(second.id(), first.id());
    assert!(first.is_destroyed());
    assert_eq!(factory.created_count(), 2);

    assert_eq!(controller.data(), sample_data());
    assert_eq!(controller.attributes(), sample_attributes());
    assert_eq!(second.get_full_data(), sample_data());
    assert_eq!(
        second.get_root_attributes("intro").unwrap(),
        sample_attributes()["intro"]
    );

    let editables = controller.editables();
    assert_eq!(editables.len(), first_editables.len());
    assert!(editables.iter().all(|d| d.editor_id == second.id()));

    assert_eq!(
        *reports.lock().unwrap(),
        vec![(
            SyncError::Engine(EngineError::Crash("a-custom-error".into())),
            ErrorPhase::Runtime,
            true
        )]
    );
}

#[tokio::test]
async fn test_restarted_session_receives_later_updates() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();

    controller.editor().unwrap().crash("boom");
    wait_for_state(&controller, ControllerState::Ready).await;
    let editor = controller.editor().unwrap();

    let mut data = sample_data();
    data.insert("intro".into(), "<p>After restart</p>".into());
    controller.set_data(data).unwrap();

    assert_eq!(editor.get_data("intro").unwrap(), "<p>After restart</p>");
    assert_eq!(editor.stats().set_data_calls, 1);
}

#[tokio::test]
async fn test_updates_during_recovery_reach_replacement() {
    let factory = YrsEditorFactory::new().with_creation_delay(Duration::from_millis(20));
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();

    controller.editor().unwrap().crash("boom");
    let mut data = sample_data();
    data.insert("outro".into(), "<p>Outro</p>".into());
    let mut attributes = sample_attributes();
    attributes.insert("outro".into(), attrs(json!({ "row": "2", "order": 10 })));
    controller.set_roots(data.clone(), attributes).unwrap();

    wait_for_state(&controller, ControllerState::Ready).await;

    let editor = controller.editor().unwrap();
    assert_eq!(editor.get_full_data(), data);
    assert_eq!(controller.editables().len(), 3);
}

#[tokio::test]
async fn test_crash_limit_stops_restarting() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let config = config(&factory, &reports).watchdog(WatchdogConfig {
        crash_number_limit: 0,
    });
    let controller = Controller::start(config).await.unwrap();

    controller.editor().unwrap().crash("boom");

    assert_eq!(controller.state(), ControllerState::Uninitialized);
    assert_eq!(controller.watchdog_state(), Some(WatchdogState::CrashedPermanently));
    assert!(controller.editor().is_none());
    assert_eq!(factory.created_count(), 1);
    assert_eq!(reports.lock().unwrap()[0].1, ErrorPhase::Runtime);
    assert!(!reports.lock().unwrap()[0].2);
}

#[tokio::test]
async fn test_failed_restart_is_reported() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();

    factory.fail_next_creation("engine gone");
    controller.editor().unwrap().crash("boom");
    wait_for_state(&controller, ControllerState::Uninitialized).await;

    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 2);
    assert_eq!(
        reports[1],
        (
            SyncError::Engine(EngineError::Creation("engine gone".into())),
            ErrorPhase::Restart,
            false
        )
    );
    assert!(controller.editor().is_none());
}

#[tokio::test]
async fn test_direct_mode_reports_crash_without_restart() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let config = config(&factory, &reports).disable_watchdog(true);
    let controller = Controller::start(config).await.unwrap();
    let editor = controller.editor().unwrap();

    editor.crash("boom");

    assert_eq!(
        *reports.lock().unwrap(),
        vec![(
            SyncError::Engine(EngineError::Crash("boom".into())),
            ErrorPhase::Runtime,
            false
        )]
    );
    assert_eq!(controller.editor().unwrap().id(), editor.id());
    assert_eq!(factory.created_count(), 1);
}

#[tokio::test]
async fn test_initialize_during_recovery_keeps_one_session() {
    let factory = YrsEditorFactory::new().with_creation_delay(Duration::from_millis(30));
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();

    controller.editor().unwrap().crash("boom");
    controller.initialize().await.unwrap();
    wait_for_state(&controller, ControllerState::Ready).await;
    sleep(Duration::from_millis(50)).await;

    let current = controller.editor().unwrap();
    let live: Vec<Arc<YrsEditor>> = factory
        .created()
        .into_iter()
        .filter(|editor| !editor.is_destroyed())
        .collect();
    assert_eq!(factory.created_count(), 2);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id(), current.id());
    assert_eq!(current.get_full_data(), sample_data());
}

#[tokio::test]
async fn test_initialize_after_final_crash_starts_over() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let config = config(&factory, &reports).watchdog(WatchdogConfig {
        crash_number_limit: 0,
    });
    let controller = Controller::start(config).await.unwrap();

    controller.editor().unwrap().crash("boom");
    assert_eq!(controller.state(), ControllerState::Uninitialized);

    controller.initialize().await.unwrap();
    assert_eq!(controller.state(), ControllerState::Ready);
    assert_eq!(factory.created_count(), 2);
}

#[tokio::test]
async fn test_crash_on_engine_thread_restarts() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();
    let editor = controller.editor().unwrap();
    let first_id = editor.id();

    std::thread::spawn(move || editor.crash("engine thread"))
        .join()
        .unwrap();
    wait_for_state(&controller, ControllerState::Ready).await;

    assert_eq!(
        *reports.lock().unwrap(),
        vec![(
            SyncError::Engine(EngineError::Crash("engine thread".into())),
            ErrorPhase::Runtime,
            true
        )]
    );
    assert_ne!(controller.editor().unwrap().id(), first_id);
    assert_eq!(controller.watchdog_state(), Some(WatchdogState::Ready));
    assert_eq!(controller.editor().unwrap().get_full_data(), sample_data());
}

#[tokio::test]
async fn test_replacement_rejecting_roots_is_not_published() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();

    factory.fail_root_additions_in_next_editor("quota");
    controller.editor().unwrap().crash("boom");
    wait_for_state(&controller, ControllerState::Uninitialized).await;
    sleep(Duration::from_millis(10)).await;

    assert!(controller.editor().is_none());
    assert!(controller.editables().is_empty());
    let rejected = factory.last().unwrap();
    assert!(rejected.is_destroyed());
    assert_eq!(
        reports.lock().unwrap()[1],
        (
            SyncError::Engine(EngineError::Write("quota".into())),
            ErrorPhase::Restart,
            false
        )
    );

    controller.initialize().await.unwrap();
    let editor = controller.editor().unwrap();
    assert_eq!(editor.get_full_data(), sample_data());
    assert_eq!(factory.created_count(), 3);
}

#[tokio::test]
async fn test_fresh_session_rejecting_roots_fails_initialize() {
    let factory = YrsEditorFactory::new().with_creation_delay(Duration::from_millis(30));
    let reports: Reports = Default::default();
    let controller = Controller::new(config(&factory, &reports)).unwrap();
    factory.fail_root_additions_in_next_editor("quota");

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.initialize().await })
    };
    sleep(Duration::from_millis(5)).await;
    let mut data = sample_data();
    data.insert("outro".into(), "<p>Outro</p>".into());
    let mut attributes = sample_attributes();
    attributes.insert("outro".into(), attrs(json!({ "row": "2", "order": 10 })));
    controller.set_roots(data.clone(), attributes).unwrap();

    let error = SyncError::Engine(EngineError::Write("quota".into()));
    assert_eq!(pending.await.unwrap(), Err(error.clone()));
    assert_eq!(controller.state(), ControllerState::Initializing);
    assert!(controller.editor().is_none());
    assert!(factory.last().unwrap().is_destroyed());
    assert_eq!(
        *reports.lock().unwrap(),
        vec![(error, ErrorPhase::Initialization, false)]
    );

    controller.initialize().await.unwrap();
    assert_eq!(controller.editor().unwrap().get_full_data(), data);
}

#[tokio::test]
async fn test_destroy_during_creation_discards_session() {
    let factory = YrsEditorFactory::new().with_creation_delay(Duration::from_millis(50));
    let reports: Reports = Default::default();
    let controller = Controller::new(config(&factory, &reports)).unwrap();

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.initialize().await })
    };
    sleep(Duration::from_millis(10)).await;
    controller.destroy().await.unwrap();

    let result = pending.await.unwrap();

    assert_eq!(result, Err(SyncError::ControllerDestroyed));
    assert!(controller.editor().is_none());
    assert_eq!(controller.state(), ControllerState::Destroyed);
    let created = factory.last().expect("creation finished");
    assert!(created.is_destroyed());
    assert!(reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_destroy_during_direct_creation_discards_session() {
    let factory = YrsEditorFactory::new().with_creation_delay(Duration::from_millis(50));
    let reports: Reports = Default::default();
    let controller = Controller::new(config(&factory, &reports).disable_watchdog(true)).unwrap();

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.initialize().await })
    };
    sleep(Duration::from_millis(10)).await;
    controller.destroy().await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(SyncError::ControllerDestroyed));
    assert!(factory.last().expect("creation finished").is_destroyed());
}

#[tokio::test]
async fn test_setters_during_creation_are_applied() {
    let factory = YrsEditorFactory::new().with_creation_delay(Duration::from_millis(30));
    let reports: Reports = Default::default();
    let controller = Controller::new(config(&factory, &reports)).unwrap();

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.initialize().await })
    };
    sleep(Duration::from_millis(5)).await;
    assert_eq!(controller.state(), ControllerState::Initializing);

    let mut data = sample_data();
    data.insert("intro".into(), "<p>Typed while loading</p>".into());
    controller.set_data(data.clone()).unwrap();

    pending.await.unwrap().unwrap();

    let editor = controller.editor().unwrap();
    assert_eq!(editor.get_full_data(), data);
    assert_eq!(controller.data(), data);
}

#[tokio::test]
async fn test_teardown_failure_is_reported() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports)).await.unwrap();
    let editor = controller.editor().unwrap();
    editor.fail_next_destroy("stuck");

    let result = controller.destroy().await;

    assert_eq!(result, Err(SyncError::Engine(EngineError::Destroy("stuck".into()))));
    assert_eq!(controller.state(), ControllerState::Destroyed);
    assert!(controller.editor().is_none());
    assert_eq!(
        *reports.lock().unwrap(),
        vec![(
            SyncError::Engine(EngineError::Destroy("stuck".into())),
            ErrorPhase::Teardown,
            false
        )]
    );

    editor.crash("late");
    assert_eq!(reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_engine_edits_after_destroy_are_ignored() {
    let factory = YrsEditorFactory::new();
    let reports: Reports = Default::default();
    let controller = Controller::start(config(&factory, &reports).disable_watchdog(true))
        .await
        .unwrap();
    let editor = controller.editor().unwrap();
    editor.fail_next_destroy("stuck");
    let _ = controller.destroy().await;

    editor
        .set_data(&indexmap! { "intro".to_string() => "<p>Ghost</p>".to_string() })
        .unwrap();

    assert_eq!(controller.data(), sample_data());
}

//! Logos Demo — scripted multi-root editing session.
//!
//! Drives a `MultiRootController` over the yrs-backed engine through the
//! usual life of a session: creation, external updates, engine-side edits,
//! a crash with watchdog recovery, and teardown. Each step prints the
//! controller snapshot as JSON.
//!
//! Run with `RUST_LOG=debug` to see the controller and watchdog logs.

use std::time::Duration;

use indexmap::indexmap;
use log::info;
use logos_core::{AddRootOptions, Editor, RootAttributes, RootData, RootsAttributes};
use logos_engine::{YrsEditor, YrsEditorFactory};
use logos_sync::{
    Callbacks, ControllerConfig, ControllerState, MultiRootController, SyncError,
};
use serde_json::json;

type Controller = MultiRootController<YrsEditorFactory>;

fn attrs(value: serde_json::Value) -> RootAttributes {
    serde_json::from_value(value).unwrap_or_default()
}

fn initial_roots() -> (RootData, RootsAttributes) {
    let data = indexmap! {
        "intro".to_string() => "<h2>Sample</h2><p>This is an instance of the multi-root editor.</p>".to_string(),
        "content".to_string() => "<p>It is the custom content</p>".to_string(),
    };
    let attributes = indexmap! {
        "intro".to_string() => attrs(json!({ "row": "1", "order": 10 })),
        "content".to_string() => attrs(json!({ "row": "1", "order": 20 })),
    };
    (data, attributes)
}

fn print_snapshot(step: &str, controller: &Controller) {
    match serde_json::to_string_pretty(&controller.snapshot()) {
        Ok(json) => println!("── {step}\n{json}"),
        Err(e) => log::error!("Cannot serialize snapshot: {e}"),
    }
}

async fn wait_until_ready(controller: &Controller) -> bool {
    let mut rx = controller.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|status| status.state == ControllerState::Ready),
    )
    .await
    .map(|result| result.is_ok())
    .unwrap_or(false)
}

async fn run() -> Result<(), SyncError> {
    let (data, attributes) = initial_roots();
    let callbacks = Callbacks::<YrsEditor>::new()
        .on_ready(|editor| info!("Editor {} is ready", editor.id()))
        .on_change(|change, _| info!("Change {:?} on {:?}", change.kind, change.roots))
        .on_error(|error, details| {
            log::warn!(
                "Editor error ({:?}, will_restart: {}): {}",
                details.phase,
                details.will_restart,
                error
            )
        });

    let config = ControllerConfig::new(YrsEditorFactory::new())
        .roots(data, attributes)
        .callbacks(callbacks);
    let controller = Controller::start(config).await?;
    print_snapshot("created", &controller);

    let mut data = controller.data();
    data.insert("intro".into(), "<h2>Sample</h2><p>Edited from outside.</p>".into());
    controller.set_data(data)?;
    print_snapshot("external set_data", &controller);

    let mut data = controller.data();
    let mut attributes = controller.attributes();
    data.insert("outro".into(), "<p>Closing words</p>".into());
    attributes.insert("outro".into(), attrs(json!({ "row": "2", "order": 10 })));
    controller.set_roots(data, attributes)?;
    print_snapshot("root added", &controller);

    let mut data = controller.data();
    data.shift_remove("content");
    if let Err(e) = controller.set_data(data) {
        info!("Rejected as expected: {e}");
    }

    if let Some(editor) = controller.editor() {
        editor.add_root(
            "aside",
            AddRootOptions {
                data: "Added by the engine".into(),
                ..AddRootOptions::default()
            },
        )?;
        print_snapshot("engine-side root", &controller);

        editor.crash("simulated engine failure");
        if wait_until_ready(&controller).await {
            print_snapshot("recovered", &controller);
        } else {
            log::error!("Editor did not recover, state {:?}", controller.state());
        }
    }

    controller.destroy().await?;
    print_snapshot("destroyed", &controller);
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("Demo failed: {e}");
        std::process::exit(1);
    }
}

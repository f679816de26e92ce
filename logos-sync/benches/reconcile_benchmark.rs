use criterion::{criterion_group, criterion_main, Criterion};
use logos_core::{EditorConfig, RootAttributes, RootData, RootsAttributes};
use logos_engine::YrsEditor;
use logos_sync::RootSynchronizer;
use serde_json::json;
use std::hint::black_box;

fn roots(count: usize) -> (RootData, RootsAttributes) {
    let mut data = RootData::with_capacity(count);
    let mut attributes = RootsAttributes::with_capacity(count);
    for i in 0..count {
        let root = format!("root-{i}");
        data.insert(root.clone(), format!("<p>Paragraph {i}</p>"));
        let attrs: RootAttributes =
            serde_json::from_value(json!({ "row": (i / 4).to_string(), "order": i })).unwrap();
        attributes.insert(root, attrs);
    }
    (data, attributes)
}

fn bench_reconcile_noop(c: &mut Criterion) {
    let (data, attributes) = roots(50);
    let editor = YrsEditor::with_config(&EditorConfig::new(data.clone(), attributes.clone())).unwrap();
    let sync = RootSynchronizer::new();

    c.bench_function("reconcile_noop_50_roots", |b| {
        b.iter(|| {
            black_box(
                sync.reconcile_from_external(&editor, black_box(&data), black_box(&attributes))
                    .unwrap(),
            );
        })
    });
}

fn bench_reconcile_one_changed(c: &mut Criterion) {
    let (data, attributes) = roots(50);
    let editor = YrsEditor::with_config(&EditorConfig::new(data.clone(), attributes.clone())).unwrap();
    let sync = RootSynchronizer::new();

    let mut toggled = data.clone();
    let mut flip = false;

    c.bench_function("reconcile_one_changed_50_roots", |b| {
        b.iter(|| {
            flip = !flip;
            let content = if flip { "<p>Changed</p>" } else { "<p>Paragraph 0</p>" };
            toggled.insert("root-0".into(), content.into());
            black_box(sync.reconcile_from_external(&editor, &toggled, &attributes).unwrap());
        })
    });
}

fn bench_rebuild_empty_session(c: &mut Criterion) {
    let (data, attributes) = roots(50);
    let sync = RootSynchronizer::new();

    c.bench_function("rebuild_empty_session_50_roots", |b| {
        b.iter(|| {
            let editor = YrsEditor::with_config(&EditorConfig::default()).unwrap();
            black_box(sync.reconcile_from_external(&editor, &data, &attributes).unwrap());
        })
    });
}

fn bench_mirror(c: &mut Criterion) {
    let (data, attributes) = roots(50);
    let editor = YrsEditor::with_config(&EditorConfig::new(data.clone(), attributes.clone())).unwrap();
    let sync = RootSynchronizer::new();

    c.bench_function("mirror_unchanged_50_roots", |b| {
        b.iter(|| {
            black_box(sync.mirror_from_session(&editor, black_box(&data), black_box(&attributes)));
        })
    });
}

criterion_group!(
    benches,
    bench_reconcile_noop,
    bench_reconcile_one_changed,
    bench_rebuild_empty_session,
    bench_mirror,
);
criterion_main!(benches);

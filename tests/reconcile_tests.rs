//! Reconciliation lifecycle tests driven through the in-memory engine.

use crossbeam_channel::{unbounded, Receiver};
use stratum::engine::{EngineOp, MemoryEngine, MemoryFactory};
use stratum::{
    Composer, FactoryRegistry, LayerDescriptor, LayerKind, LayerRole, LoadingUpdate, MapView,
    RequestParams, ScaleRange, SourceKind, ThemeContents,
};

struct Fixture {
    composer: Composer,
    engine: MemoryEngine,
    wms: MemoryFactory,
    vector: MemoryFactory,
    updates: Receiver<LoadingUpdate>,
}

fn fixture() -> Fixture {
    fixture_with(MemoryFactory::new(SourceKind::Tiled))
}

fn fixture_with(wms: MemoryFactory) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let vector = MemoryFactory::new(SourceKind::Static);
    let mut registry = FactoryRegistry::new();
    registry.register(LayerKind::Wms, Box::new(wms.clone()));
    registry.register(LayerKind::Wmts, Box::new(MemoryFactory::new(SourceKind::Tiled)));
    registry.register(LayerKind::Vector, Box::new(vector.clone()));
    let (tx, rx) = unbounded();
    Fixture {
        composer: Composer::new(registry, tx),
        engine: MemoryEngine::new(),
        wms,
        vector,
        updates: rx,
    }
}

fn view() -> MapView {
    MapView::new("EPSG:3857", 25000.0)
}

fn wms_layer(id: &str) -> LayerDescriptor {
    let mut layer = LayerDescriptor::new(id, LayerKind::Wms);
    layer.params.layers = "all".to_string();
    layer
}

fn theme_layer(id: &str, sublayers: &str) -> LayerDescriptor {
    let mut layer = LayerDescriptor::new(id, LayerKind::Wms);
    layer.role = LayerRole::Theme;
    layer.params = RequestParams {
        layers: sublayers.to_string(),
        opacities: sublayers.split(',').map(|_| "255").collect::<Vec<_>>().join(","),
        map: "demo".to_string(),
    };
    layer.theme = Some(ThemeContents::default());
    layer
}

fn drain_loading(rx: &Receiver<LoadingUpdate>) -> Vec<LoadingUpdate> {
    rx.try_iter().collect()
}

#[test]
fn test_first_pass_realizes_each_entry_once() {
    let mut f = fixture();
    let layers = vec![wms_layer("a"), LayerDescriptor::new("b", LayerKind::Vector)];
    f.composer.apply(&mut f.engine, &layers, &view(), None);

    assert_eq!(f.composer.len(), 2);
    assert!(f.composer.contains("a"));
    assert!(f.composer.contains("b"));
    assert_eq!(
        f.engine.take_ops(),
        vec![
            EngineOp::LayerAdded("a".to_string()),
            EngineOp::LayerAdded("b".to_string()),
        ]
    );
    assert_eq!(f.wms.create_calls(), 1);
    assert_eq!(f.vector.create_calls(), 1);
    // Stacking: first descriptor is top-most.
    assert_eq!(f.wms.created()[0].z_index(), 2);
    assert_eq!(f.vector.created()[0].z_index(), 0);
}

#[test]
fn test_unchanged_plan_is_convergent() {
    let mut f = fixture();
    let layers = vec![wms_layer("a"), LayerDescriptor::new("b", LayerKind::Vector)];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    f.engine.take_ops();

    f.composer.apply(&mut f.engine, &layers, &view(), None);
    f.composer.apply(&mut f.engine, &layers, &view(), None);

    assert!(f.engine.ops().is_empty());
    assert_eq!(f.wms.create_calls(), 1);
    assert_eq!(f.wms.update_calls(), 0);
}

#[test]
fn test_cheap_changes_bypass_the_factory() {
    let mut f = fixture();
    let mut layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    f.engine.take_ops();

    layers[0].visibility = false;
    layers[0].opacity = 128;
    layers[0].z_index = Some(40);
    f.composer.apply(&mut f.engine, &layers, &view(), None);

    assert_eq!(f.wms.update_calls(), 0);
    assert!(f.engine.ops().is_empty());
    let native = &f.wms.created()[0];
    assert!(!native.visible());
    assert!((native.opacity() - 128.0 / 255.0).abs() < 1e-9);
    assert_eq!(native.z_index(), 40);
}

#[test]
fn test_structural_change_goes_through_the_factory() {
    let mut f = fixture();
    let mut layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    f.engine.take_ops();

    layers[0].params.layers = "roads,water".to_string();
    f.composer.apply(&mut f.engine, &layers, &view(), None);

    assert_eq!(f.wms.update_calls(), 1);
    assert_eq!(f.wms.create_calls(), 1);
    assert!(f.engine.ops().is_empty());
}

#[test]
fn test_loading_pseudo_field_never_triggers_update() {
    let mut f = fixture();
    let mut layers = vec![wms_layer("a")];
    layers[0].options = serde_json::json!({"format": "image/png"});
    f.composer.apply(&mut f.engine, &layers, &view(), None);

    layers[0].options = serde_json::json!({"format": "image/png", "loading": true});
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    assert_eq!(f.wms.update_calls(), 0);
}

#[test]
fn test_projection_change_goes_through_the_factory() {
    let mut f = fixture();
    let layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);

    let reprojected = MapView::new("EPSG:2056", 25000.0);
    f.composer.apply(&mut f.engine, &layers, &reprojected, None);
    assert_eq!(f.wms.update_calls(), 1);
    // Settles again afterwards.
    f.composer.apply(&mut f.engine, &layers, &reprojected, None);
    assert_eq!(f.wms.update_calls(), 1);
}

#[test]
fn test_removed_layer_destroyed_exactly_once() {
    let mut f = fixture();
    let layers = vec![wms_layer("a"), LayerDescriptor::new("b", LayerKind::Vector)];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    f.engine.take_ops();

    let remaining = vec![layers[1].clone()];
    f.composer.apply(&mut f.engine, &remaining, &view(), None);
    f.composer.apply(&mut f.engine, &remaining, &view(), None);

    let removals: Vec<&EngineOp> = f
        .engine
        .ops()
        .iter()
        .filter(|op| matches!(op, EngineOp::LayerRemoved(_)))
        .collect();
    assert_eq!(removals, vec![&EngineOp::LayerRemoved("a".to_string())]);
    assert!(!f.composer.contains("a"));
}

#[test]
fn test_no_events_attributed_after_destroy() {
    let mut f = fixture();
    let layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    let native = f.wms.created()[0].handle();

    native.begin_load();
    assert_eq!(drain_loading(&f.updates).len(), 1);

    f.composer.apply(&mut f.engine, &[], &view(), None);
    // Destroying while loading publishes the final loading=false.
    assert_eq!(
        drain_loading(&f.updates),
        vec![LoadingUpdate {
            layer_id: "a".to_string(),
            loading: false
        }]
    );

    // The in-flight tile settles after teardown; nobody hears about it.
    native.finish_load();
    native.begin_load();
    assert!(drain_loading(&f.updates).is_empty());
    assert_eq!(f.composer.tracker().state("a"), None);
}

#[test]
fn test_create_failure_is_skipped_and_retried_next_pass() {
    let f = fixture();
    let Fixture {
        mut composer,
        mut engine,
        wms,
        ..
    } = f;
    wms.fail_next_create();
    let layers = vec![wms_layer("a")];

    composer.apply(&mut engine, &layers, &view(), None);
    assert!(!composer.contains("a"));
    assert!(engine.take_ops().is_empty());

    composer.apply(&mut engine, &layers, &view(), None);
    assert!(composer.contains("a"));
    assert_eq!(wms.create_calls(), 2);
    assert_eq!(engine.take_ops(), vec![EngineOp::LayerAdded("a".to_string())]);
}

#[test]
fn test_invalid_native_object_is_recreated() {
    let mut f = fixture();
    let layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    f.engine.take_ops();

    f.wms.set_valid(false);
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    assert_eq!(
        f.engine.take_ops(),
        vec![
            EngineOp::LayerRemoved("a".to_string()),
            EngineOp::LayerAdded("a".to_string()),
        ]
    );
    assert_eq!(f.wms.create_calls(), 2);

    f.wms.set_valid(true);
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    assert_eq!(f.wms.create_calls(), 2);
}

#[test]
fn test_factory_rebuild_rebinds_load_listeners() {
    let mut f = fixture_with(MemoryFactory::new(SourceKind::Tiled).with_rebuild_on_update());
    let mut layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    let original = f.wms.created()[0].handle();

    layers[0].params.layers = "roads".to_string();
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    assert_eq!(f.wms.created().len(), 2);
    let rebuilt = f.wms.created()[1].handle();

    // The discarded object lost its listeners with the swap.
    assert_eq!(original.listener_count(), 0);
    original.begin_load();
    assert!(drain_loading(&f.updates).is_empty());

    rebuilt.begin_load();
    assert!(f.composer.tracker().is_loading("a"));
    rebuilt.finish_load();
    assert_eq!(drain_loading(&f.updates).len(), 2);
}

#[test]
fn test_scale_change_restructures_theme_entries() {
    let mut f = fixture();
    let mut theme = theme_layer("theme0", "a,b,c");
    {
        let contents = theme.theme.as_mut().unwrap();
        let mut external = LayerDescriptor::new("ext-b", LayerKind::Wmts);
        external.visibility = false;
        contents.external.insert("b".to_string(), external);
        contents.scales.insert(
            "b".to_string(),
            ScaleRange {
                min_scale: None,
                max_scale: Some(50000.0),
            },
        );
    }
    let layers = vec![theme];

    f.composer.apply(&mut f.engine, &layers, &MapView::new("EPSG:3857", 25000.0), None);
    assert!(f.composer.contains("theme0-0"));
    assert!(f.composer.contains("theme0#b"));
    assert!(f.composer.contains("theme0-2"));
    f.engine.take_ops();

    // Zooming out past maxScale drops the external sublayer and lets the
    // neighbors merge into the surviving first entry.
    f.composer.apply(&mut f.engine, &layers, &MapView::new("EPSG:3857", 100000.0), None);
    assert_eq!(f.composer.len(), 1);
    assert!(f.composer.contains("theme0-0"));
    let removals = f
        .engine
        .ops()
        .iter()
        .filter(|op| matches!(op, EngineOp::LayerRemoved(_)))
        .count();
    assert_eq!(removals, 2);
    // The surviving entry absorbed "c" through a structural update.
    assert_eq!(f.wms.update_calls(), 1);
}

#[test]
fn test_split_theme_entries_share_one_loading_bucket() {
    let mut f = fixture();
    let mut theme = theme_layer("theme0", "a,b,c");
    theme
        .theme
        .as_mut()
        .unwrap()
        .external
        .insert("b".to_string(), LayerDescriptor::new("ext-b", LayerKind::Wmts));
    f.composer.apply(&mut f.engine, &[theme], &view(), None);

    // Entries theme0-0 and theme0-2 both attribute to logical id theme0.
    let natives = f.wms.created();
    assert_eq!(natives.len(), 2);
    natives[0].begin_load();
    natives[1].begin_load();
    natives[0].finish_load();
    assert!(f.composer.tracker().is_loading("theme0"));
    natives[1].finish_load();
    assert!(!f.composer.tracker().is_loading("theme0"));

    let transitions: Vec<bool> = drain_loading(&f.updates).iter().map(|u| u.loading).collect();
    assert_eq!(transitions, vec![true, false]);
}

#[test]
fn test_self_managing_layer_bypasses_engine_registration() {
    let mut f = fixture_with(MemoryFactory::new(SourceKind::Image).with_managed_removal());
    let layers = vec![wms_layer("a")];
    f.composer.apply(&mut f.engine, &layers, &view(), None);
    assert!(f.composer.contains("a"));
    assert!(f.engine.ops().is_empty());

    let native = f.wms.created()[0].handle();
    f.composer.apply(&mut f.engine, &[], &view(), None);
    assert!(f.engine.ops().is_empty());
    assert!(native.removed());
}

#[test]
fn test_zoom_to_extent_fits_viewport_on_create() {
    let extent = [2600000.0, 1200000.0, 2610000.0, 1210000.0];
    let mut f = fixture_with(MemoryFactory::new(SourceKind::Tiled).with_extent(extent));
    let mut layer = wms_layer("a");
    layer.zoom_to_extent = true;
    f.composer.apply(&mut f.engine, &[layer.clone()], &view(), None);
    assert!(f.engine.ops().contains(&EngineOp::ExtentFit(extent)));

    // Only on creation, not on subsequent passes.
    f.engine.take_ops();
    f.composer.apply(&mut f.engine, &[layer], &view(), None);
    assert!(f.engine.ops().is_empty());
}

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{DialProbe, MockRenderer};
use lib_scene::{
    EngineConfig, EvictionBudget, ManualClock, PressureLevel, SceneContext, SceneError,
    SceneState, SceneType, TrimLevel,
};
use serde_json::Value;

fn context(config: &EngineConfig) -> (SceneContext, Arc<MockRenderer>, DialProbe, Arc<ManualClock>) {
    let renderer = Arc::new(MockRenderer::default());
    let probe = DialProbe::default();
    let clock = Arc::new(ManualClock::new(0));
    let ctx = SceneContext::new(renderer.clone(), Box::new(probe.clone()), clock.clone(), config);
    (ctx, renderer, probe, clock)
}

fn active_count(ctx: &SceneContext) -> usize {
    ctx.scenes()
        .live_records()
        .filter(|r| r.state == SceneState::Active)
        .count()
}

#[test]
fn test_critical_sample_evicts_old_inactive_scenes() {
    let (mut ctx, _renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);

    ctx.create_scene("A", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(1));
    ctx.create_scene("B", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(1));
    ctx.create_scene("C", SceneType::Scene, Value::Null).unwrap();
    ctx.activate_scene("A").unwrap();

    clock.advance(Duration::from_secs(31));
    probe.set(95);
    let report = ctx.on_tick().expect("critical edge triggers cleanup");

    assert!(report.aggressive);
    assert_eq!(report.evicted_scenes, vec!["B".to_string(), "C".to_string()]);
    assert_eq!(ctx.scenes().scene_ids(), vec!["A".to_string()]);
    assert_eq!(ctx.active_scene_id().as_deref(), Some("A"));
    assert_eq!(report.scenes_before, 3);
    assert_eq!(report.scenes_after, 1);
}

#[test]
fn test_rounded_up_budget_keeps_half() {
    let config = EngineConfig {
        eviction_budget: EvictionBudget::HalfRoundedUp,
        ..Default::default()
    };
    let (mut ctx, _renderer, probe, clock) = context(&config);
    probe.set(10);
    for id in ["A", "B", "C"] {
        ctx.create_scene(id, SceneType::Scene, Value::Null).unwrap();
        clock.advance(Duration::from_secs(1));
    }
    ctx.activate_scene("A").unwrap();

    clock.advance(Duration::from_secs(31));
    probe.set(95);
    let report = ctx.on_tick().unwrap();
    assert_eq!(report.evicted_scenes, vec!["B".to_string()]);
    assert_eq!(ctx.scene_state("C"), Some(SceneState::Loaded));
}

#[test]
fn test_young_scenes_survive_explicit_aggressive_cleanup() {
    let (mut ctx, _renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("old", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(40));
    ctx.create_scene("young", SceneType::Scene, Value::Null).unwrap();

    let report = ctx.perform_memory_cleanup(true);
    assert_eq!(report.evicted_scenes, vec!["old".to_string()]);
    assert_eq!(ctx.scene_state("young"), Some(SceneState::Loaded));
}

#[test]
fn test_warning_cleans_once_until_pressure_clears() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(85);

    assert!(ctx.on_tick().is_some());
    assert!(ctx.on_tick().is_none());
    assert!(ctx.on_tick().is_none());
    assert_eq!(renderer.count("release_cached_resources"), 1);

    probe.set(20);
    assert!(ctx.on_tick().is_none());
    probe.set(85);
    let report = ctx.on_tick().unwrap();
    assert!(!report.aggressive);
    assert_eq!(renderer.count("release_cached_resources"), 2);
}

#[test]
fn test_warning_cleanup_only_reaps_stale_entries() {
    let (mut ctx, renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("kept", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(60));

    probe.set(85);
    let report = ctx.on_tick().unwrap();
    assert!(report.evicted_scenes.is_empty());
    assert_eq!(ctx.scene_state("kept"), Some(SceneState::Loaded));

    renderer.drop_scenes();
    let report = ctx.perform_memory_cleanup(false);
    assert_eq!(report.stale_scenes, vec!["kept".to_string()]);
    assert_eq!(ctx.scenes().scene_count(), 0);
}

#[test]
fn test_single_active_across_operation_sequences() {
    let (mut ctx, _renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);
    let ids = ["a", "b", "c", "d"];
    for id in ids {
        ctx.create_scene(id, SceneType::Scene, Value::Null).unwrap();
        assert!(active_count(&ctx) <= 1);
    }
    for (step, id) in ids.iter().cycle().take(12).enumerate() {
        clock.advance(Duration::from_secs(3));
        match step % 3 {
            0 => {
                let _ = ctx.activate_scene(id);
            }
            1 => {
                let _ = ctx.deactivate_scene(id);
            }
            _ => {
                let _ = ctx.activate_scene(id);
                let _ = ctx.destroy_scene(id);
                let _ = ctx.create_scene(id, SceneType::ArScene, Value::Null);
            }
        }
        assert!(active_count(&ctx) <= 1, "step {step}");
    }
    probe.set(99);
    ctx.on_low_memory();
    assert!(active_count(&ctx) <= 1);
}

#[test]
fn test_destroy_twice_tears_down_once() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("x", SceneType::Scene, Value::Null).unwrap();
    ctx.destroy_scene("x").unwrap();
    assert_eq!(ctx.destroy_scene("x"), Err(SceneError::NotFound("x".into())));
    assert_eq!(renderer.count("teardown "), 1);
}

#[test]
fn test_activate_missing_leaves_current() {
    let (mut ctx, _renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("a", SceneType::Scene, Value::Null).unwrap();
    ctx.activate_scene("a").unwrap();
    assert_eq!(
        ctx.activate_scene("missing"),
        Err(SceneError::NotFound("missing".into()))
    );
    assert_eq!(ctx.active_scene_id().as_deref(), Some("a"));
}

#[test]
fn test_double_create_keeps_one_record() {
    let (mut ctx, _renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    let first = ctx.create_scene("x", SceneType::Scene, Value::Null).unwrap();
    let second = ctx.create_scene("x", SceneType::Scene, Value::Null).unwrap();
    assert_eq!(first, second);
    assert_eq!(ctx.scenes().scene_count(), 1);
}

#[test]
fn test_trim_memory_and_cooldown() {
    let (mut ctx, _renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("a", SceneType::Scene, Value::Null).unwrap();
    ctx.create_scene("b", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(31));

    let report = ctx.on_trim_memory(TrimLevel::RunningCritical).unwrap();
    assert!(report.aggressive);
    assert_eq!(report.evicted_scenes.len(), 2);

    ctx.create_scene("c", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(31));
    let report = ctx.on_trim_memory(TrimLevel::Complete).unwrap();
    assert!(report.aggressive);

    ctx.create_scene("d", SceneType::Scene, Value::Null).unwrap();
    clock.advance(Duration::from_secs(5));
    let report = ctx.on_trim_memory(TrimLevel::Complete).unwrap();
    assert!(!report.aggressive);
    assert_eq!(ctx.scene_state("d"), Some(SceneState::Loaded));
}

#[test]
fn test_memory_stats_report() {
    let (mut ctx, _renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("a", SceneType::Scene, Value::Null).unwrap();
    ctx.create_scene("b", SceneType::Scene, Value::Null).unwrap();
    ctx.activate_scene("b").unwrap();
    ctx.create_node("n", "node", Value::Null).unwrap();
    clock.advance(Duration::from_secs(12));
    probe.set(85);

    let stats = ctx.memory_stats();
    assert_eq!(stats.total_scenes, 2);
    assert_eq!(stats.active_scene_id.as_deref(), Some("b"));
    assert_eq!(stats.managed_components, 1);
    assert_eq!(stats.oldest_scene_age_secs, 12);
    assert_eq!(stats.pressure_level, PressureLevel::Warning);
    assert!((stats.heap_usage_percent - 85.0).abs() < 1e-9);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["activeSceneId"], "b");
    assert_eq!(json["pressureLevel"], "warning");
}

#[test]
fn test_aggressive_cleanup_sweeps_orphan_components() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_node("root", "node", Value::Null).unwrap();
    ctx.create_node("child", "box", Value::Null).unwrap();
    ctx.create_node("loose", "text", Value::Null).unwrap();
    ctx.add_child("root", "child").unwrap();

    let report = ctx.perform_memory_cleanup(true);
    assert_eq!(report.removed_components, vec!["loose".to_string()]);
    assert!(ctx.node("loose").is_none());
    assert_eq!(renderer.count("teardown_node"), 1);
}

#[test]
fn test_teardown_all() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("a", SceneType::Scene, Value::Null).unwrap();
    ctx.create_scene("b", SceneType::Scene, Value::Null).unwrap();
    ctx.activate_scene("a").unwrap();
    ctx.create_node("n", "node", Value::Null).unwrap();

    assert_eq!(ctx.teardown_all(), (2, 1));
    assert_eq!(ctx.active_scene_id(), None);
    assert_eq!(renderer.count("teardown "), 2);
}

#[test]
fn test_scene_components_survive_aggressive_sweep() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("S", SceneType::Scene, Value::Null).unwrap();
    ctx.activate_scene("S").unwrap();
    ctx.create_node("box", "box", Value::Null).unwrap();
    ctx.create_node("loose", "sphere", Value::Null).unwrap();

    ctx.add_child("S", "box").unwrap();
    assert_eq!(ctx.node("box").unwrap().scene.as_deref(), Some("S"));
    assert!(renderer.calls().contains(&"scene_attach 1<-2".to_string()));

    let report = ctx.perform_memory_cleanup(true);
    assert_eq!(report.removed_components, vec!["loose".to_string()]);
    assert!(ctx.node("box").is_some());
    assert_eq!(ctx.scene_nodes("S"), vec!["box".to_string()]);
}

#[test]
fn test_destroy_scene_removes_its_components() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("S", SceneType::Scene, Value::Null).unwrap();
    ctx.create_node("group", "node", Value::Null).unwrap();
    ctx.create_node("box2", "box", Value::Null).unwrap();
    ctx.create_node("elsewhere", "node", Value::Null).unwrap();
    ctx.add_child("S", "group").unwrap();
    ctx.add_child("group", "box2").unwrap();

    ctx.destroy_scene("S").unwrap();

    assert!(ctx.node("box2").is_none());
    assert!(ctx.node("group").is_none());
    assert!(ctx.node("elsewhere").is_some());
    assert!(ctx.scene_nodes("S").is_empty());
    assert_eq!(renderer.count("teardown_node"), 2);
}

#[test]
fn test_eviction_takes_scene_components_along() {
    let (mut ctx, _renderer, probe, clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("A", SceneType::Scene, Value::Null).unwrap();
    ctx.create_scene("B", SceneType::Scene, Value::Null).unwrap();
    ctx.create_node("a-root", "node", Value::Null).unwrap();
    ctx.create_node("b-root", "node", Value::Null).unwrap();
    ctx.add_child("A", "a-root").unwrap();
    ctx.add_child("B", "b-root").unwrap();
    ctx.activate_scene("A").unwrap();

    clock.advance(Duration::from_secs(31));
    probe.set(95);
    let report = ctx.on_tick().unwrap();

    assert_eq!(report.evicted_scenes, vec!["B".to_string()]);
    assert_eq!(report.removed_components, vec!["b-root".to_string()]);
    assert!(ctx.node("a-root").is_some());
    assert!(ctx.node("b-root").is_none());
}

#[test]
fn test_moving_node_between_scene_and_node_parents() {
    let (mut ctx, renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("S", SceneType::Scene, Value::Null).unwrap();
    ctx.create_node("group", "node", Value::Null).unwrap();
    ctx.create_node("box", "box", Value::Null).unwrap();
    ctx.add_child("S", "group").unwrap();
    ctx.add_child("S", "box").unwrap();

    ctx.add_child("group", "box").unwrap();
    assert_eq!(ctx.node("box").unwrap().scene, None);
    assert_eq!(ctx.scene_nodes("S"), vec!["box".to_string(), "group".to_string()]);
    assert!(renderer.calls().contains(&"scene_detach 1<-3".to_string()));

    ctx.remove_child("S", "group").unwrap();
    assert!(ctx.scene_nodes("S").is_empty());
    assert_eq!(
        ctx.add_child("missing", "box"),
        Err(SceneError::NotFound("missing".into()))
    );
}

#[test]
fn test_aggressive_trim_clears_event_bindings_despite_cooldown() {
    let (mut ctx, _renderer, probe, _clock) = context(&EngineConfig::default());
    probe.set(10);
    ctx.create_scene("S", SceneType::Scene, Value::Null).unwrap();
    ctx.activate_scene("S").unwrap();
    ctx.create_node("btn", "box", Value::Null).unwrap();
    ctx.add_child("S", "btn").unwrap();

    ctx.bind_event("btn", "onClick", "cb-1").unwrap();
    ctx.bind_event("btn", "onHover", "cb-2").unwrap();
    let report = ctx.on_trim_memory(TrimLevel::Complete).unwrap();
    assert!(report.aggressive);
    assert_eq!(report.cleared_event_bindings, 2);
    assert!(ctx.node("btn").unwrap().event_bindings.is_empty());

    // Still inside the aggressive cooldown: eviction is skipped, bindings go.
    ctx.bind_event("btn", "onClick", "cb-3").unwrap();
    let report = ctx.on_trim_memory(TrimLevel::RunningLow).unwrap();
    assert!(!report.aggressive);
    assert_eq!(report.cleared_event_bindings, 1);

    ctx.bind_event("btn", "onClick", "cb-4").unwrap();
    let report = ctx.on_trim_memory(TrimLevel::UiHidden).unwrap();
    assert_eq!(report.cleared_event_bindings, 0);
    assert_eq!(
        ctx.node("btn").unwrap().event_bindings.get("onClick").map(String::as_str),
        Some("cb-4")
    );
    assert_eq!(ctx.scene_nodes("S"), vec!["btn".to_string()]);
}

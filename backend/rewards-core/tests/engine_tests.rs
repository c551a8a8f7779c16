mod common;

use quizcraft_rewards::services::loot::{ExpeditionKind, LootParams};
use quizcraft_rewards::SideEffect;
use std::collections::BTreeSet;

fn loot_params(session_id: &str, delta_xp: i64, correct_rate: f64) -> LootParams {
    LootParams {
        session_id: session_id.to_string(),
        biome: "math".to_string(),
        expedition: ExpeditionKind::Build,
        delta_xp,
        correct_rate,
        leveled_up: false,
    }
}

#[tokio::test]
async fn test_side_effect_wrappers_report_skips_and_applies() {
    let (engine, _) = common::test_engine();
    let uid = common::test_uid("wrapper");

    // Nothing earned yet, so the badge sweep has nothing to do.
    assert_eq!(engine.try_evaluate_badges(&uid).await, SideEffect::Skipped);

    engine
        .award_session_rewards(&uid, "s1", 100, 0)
        .await
        .unwrap();
    let badges = engine.try_evaluate_badges(&uid).await;
    assert_eq!(
        badges.applied(),
        Some(&vec!["first_steps".to_string()])
    );

    // A gated loot roll is a skip, not a failure.
    let gated = engine
        .try_award_malocraft_loot(&uid, &loot_params("s2", 0, 0.0))
        .await;
    assert!(matches!(gated, SideEffect::Skipped));

    let rolled = engine
        .try_award_malocraft_loot(&uid, &loot_params("s2", 25, 0.9))
        .await;
    assert!(rolled.is_applied());
    assert!(rolled.applied().unwrap().is_some());

    // Replay folds to a skip as well.
    let replay = engine
        .try_award_malocraft_loot(&uid, &loot_params("s2", 25, 0.9))
        .await;
    assert!(matches!(replay, SideEffect::Skipped));
}

#[tokio::test]
async fn test_side_effect_failures_carry_the_reason() {
    let (engine, _) = common::test_engine();
    let uid = common::test_uid("failure");

    let failed = engine
        .try_award_malocraft_loot(&uid, &loot_params("s1", 25, 1.5))
        .await;
    assert!(failed.is_failed());
    match failed {
        SideEffect::Failed { reason } => assert!(reason.contains("correct_rate")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_daily_wrapper_skips_replayed_sessions() {
    let (engine, _) = common::test_engine();
    let uid = common::test_uid("dailywrap");

    let attempt = common::attempt("s1", vec![common::item("sp_1", &["spelling"], true)]);
    let first = engine.try_update_daily_progress(&uid, &attempt).await;
    assert!(first.is_applied());

    let replay = engine.try_update_daily_progress(&uid, &attempt).await;
    assert!(matches!(replay, SideEffect::Skipped));
}

#[tokio::test]
async fn test_zone_question_selection_balances_tags() {
    let (engine, _) = common::test_engine();
    let zone_tags: Vec<String> = ["fractions", "decimals", "geometry"]
        .iter()
        .map(|t| t.to_string())
        .collect();

    let selected = engine.select_rebuild_zone_questions(&zone_tags, 9, false);
    assert_eq!(selected.len(), 9);

    let ids: BTreeSet<&str> = selected.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids.len(), 9);
    // Without the harder-question allowance nothing above difficulty 2
    // sneaks in, and the three easy questions per tag spread evenly.
    assert!(selected.iter().all(|e| e.difficulty <= 2));
    for tag in &zone_tags {
        let per_tag = selected
            .iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .count();
        assert_eq!(per_tag, 3);
    }
}

#[tokio::test]
async fn test_zone_question_selection_caps_harder_questions() {
    let (engine, _) = common::test_engine();
    let zone_tags: Vec<String> = ["fractions", "decimals", "geometry"]
        .iter()
        .map(|t| t.to_string())
        .collect();

    let selected = engine.select_rebuild_zone_questions(&zone_tags, 12, true);
    assert_eq!(selected.len(), 12);
    let hard = selected.iter().filter(|e| e.difficulty > 2).count();
    assert!(hard <= 3);
}

#[tokio::test]
async fn test_zone_readings_filter_by_theme() {
    let (engine, _) = common::test_engine();

    let numbers = engine.select_zone_readings("numbers", 5);
    assert_eq!(numbers.len(), 2);
    assert!(numbers.iter().all(|r| r.theme == "numbers"));

    let words = engine.select_zone_readings("words", 5);
    assert_eq!(words.len(), 1);

    assert!(engine.select_zone_readings("unknown", 5).is_empty());
}

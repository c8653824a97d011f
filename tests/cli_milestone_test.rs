//! Integration tests for status changes, the auto-fail cascade and undo.

mod common;

use common::{NOW, TestEnv, milestone_id, parse_json};
use predicates::prelude::*;
use serde_json::Value;

fn set(env: &TestEnv, now: &str, id: &str, status: &str) -> Value {
    let output = env
        .tm_at(now)
        .args(["milestone", "set", id, status])
        .output()
        .unwrap();
    assert!(output.status.success(), "milestone set failed: {:?}", output);
    parse_json(&output.stdout)
}

fn raw_status(env: &TestEnv, id: &str) -> Value {
    let output = env.tm().args(["milestone", "show", id]).output().unwrap();
    parse_json(&output.stdout)["milestone"]["raw_status"].clone()
}

fn ids(value: &Value) -> Vec<String> {
    let mut ids: Vec<String> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

#[test]
fn test_completing_later_stage_fails_earlier_ones() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");
    let day14 = milestone_id(&created, "day14");
    let day30 = milestone_id(&created, "day30");

    let result = set(&env, NOW, &day30, "yes");
    assert_eq!(result["changed"], true);
    assert_eq!(ids(&result["cascaded"]), sorted(vec![day1.clone(), day14.clone()]));
    assert!(result["undo_until"].is_string());

    assert_eq!(raw_status(&env, &day1), "no");
    assert_eq!(raw_status(&env, &day14), "no");
    assert_eq!(raw_status(&env, &day30), "yes");
}

#[test]
fn test_cascade_stays_within_family() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let month4 = milestone_id(&created, "month-4");

    let result = set(&env, NOW, &month4, "yes");
    let cascaded = ids(&result["cascaded"]);
    assert_eq!(
        cascaded,
        sorted(vec![
            milestone_id(&created, "month-2"),
            milestone_id(&created, "month-3"),
        ])
    );
    assert_eq!(raw_status(&env, &milestone_id(&created, "day1")), "pending");
}

#[test]
fn test_reverting_trigger_restores_cascade() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");
    let day14 = milestone_id(&created, "day14");

    set(&env, NOW, &day14, "yes");
    assert_eq!(raw_status(&env, &day1), "no");

    let result = set(&env, "2026-02-24T12:05:00Z", &day14, "pending");
    assert_eq!(ids(&result["reverted"]), vec![day1.clone()]);
    assert_eq!(raw_status(&env, &day1), "pending");

    env.tm()
        .args(["check"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""ok":true"#));
}

#[test]
fn test_setting_same_status_is_noop() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");

    let result = set(&env, NOW, &day1, "pending");
    assert_eq!(result["changed"], false);

    env.tm()
        .args(["undo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to undo"));
}

#[test]
fn test_undo_restores_whole_transaction() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");
    let day14 = milestone_id(&created, "day14");
    let day30 = milestone_id(&created, "day30");

    set(&env, NOW, &day30, "yes");

    let output = env
        .tm_at("2026-02-24T12:05:00Z")
        .args(["undo"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let undone = parse_json(&output.stdout);
    assert_eq!(undone["trigger_id"], day30.as_str());
    assert_eq!(
        ids(&undone["restored"]),
        sorted(vec![day1.clone(), day14.clone(), day30.clone()])
    );

    for id in [&day1, &day14, &day30] {
        assert_eq!(raw_status(&env, id), "pending");
    }
    env.tm()
        .args(["check"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""ok":true"#));

    // Undoing the undo re-applies the cascade
    env.tm_at("2026-02-24T12:06:00Z")
        .args(["undo"])
        .assert()
        .success();
    assert_eq!(raw_status(&env, &day1), "no");
    assert_eq!(raw_status(&env, &day30), "yes");

    // and the tracker is consistent again: reverting the trigger restores day1
    let result = set(&env, "2026-02-24T12:07:00Z", &day30, "pending");
    assert_eq!(
        ids(&result["reverted"]),
        sorted(vec![day1.clone(), day14.clone()])
    );
}

#[test]
fn test_undo_window_expires() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day14 = milestone_id(&created, "day14");

    set(&env, NOW, &day14, "yes");
    env.tm_at("2026-02-24T12:10:01Z")
        .args(["undo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to undo"));
    assert_eq!(raw_status(&env, &day14), "yes");
}

#[test]
fn test_undo_window_is_configurable() {
    let env = TestEnv::init();
    env.tm()
        .args(["config", "set", "undo-window-secs", "30"])
        .assert()
        .success();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");

    set(&env, NOW, &day1, "yes");
    env.tm_at("2026-02-24T12:01:00Z")
        .args(["undo"])
        .assert()
        .failure();
}

#[test]
fn test_done_late_derivation() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");

    set(&env, "2026-02-27T09:00:00Z", &day1, "yes");
    let output = env
        .tm_at("2026-02-27T09:00:00Z")
        .args(["milestone", "show", &day1])
        .output()
        .unwrap();
    let detail = parse_json(&output.stdout);
    assert_eq!(detail["view"]["status"], "done_late");
    assert_eq!(detail["milestone"]["completed_at"], "2026-02-27T09:00:00Z");
}

#[test]
fn test_custom_due_overrides_and_clears() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");

    let output = env
        .tm()
        .args(["milestone", "due", &day1, "2026-03-01T17:00:00Z"])
        .output()
        .unwrap();
    let due = parse_json(&output.stdout);
    assert_eq!(due["custom_due_at"], "2026-03-01T17:00:00Z");
    assert_eq!(due["view"]["due_at"], "2026-03-01T17:00:00Z");

    let output = env
        .tm()
        .args(["milestone", "due", &day1, "--clear"])
        .output()
        .unwrap();
    let due = parse_json(&output.stdout);
    assert!(due["custom_due_at"].is_null());
    assert_eq!(due["view"]["due_at"], "2026-02-25T23:59:00Z");
}

#[test]
fn test_invalid_status_and_id() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day1 = milestone_id(&created, "day1");

    env.tm()
        .args(["milestone", "set", &day1, "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("maybe"));

    env.tm()
        .args(["milestone", "set", "tme-zzzz", "yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid ID"));

    env.tm()
        .args(["milestone", "show", "tme-ffff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_human_status_change() {
    let env = TestEnv::init();
    let created = env.create_client("2026-02-24");
    let day14 = milestone_id(&created, "day14");

    env.tm()
        .args(["-H", "milestone", "set", &day14, "yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Set {} to yes", day14)))
        .stdout(predicate::str::contains("auto-failed"));
}

use image_guardian::{
    model::RiskLevel,
    risk::{Adjusted, RiskInput, RiskPolicy, ThresholdPolicy},
};
use serde_json::{Value, json};

fn input(pct: Option<f64>, count: Option<u64>, raw: &Value) -> RiskInput<'_> {
    RiskInput {
        match_percentage: pct,
        match_count: count,
        raw_result: raw,
    }
}

#[test]
fn percentage_thresholds() {
    let p = ThresholdPolicy::default();
    let raw = Value::Null;
    assert_eq!(p.classify(&input(Some(100.0), Some(1), &raw)), RiskLevel::High);
    assert_eq!(p.classify(&input(Some(80.0), Some(1), &raw)), RiskLevel::High);
    assert_eq!(p.classify(&input(Some(79.9), Some(1), &raw)), RiskLevel::Medium);
    assert_eq!(p.classify(&input(Some(50.0), Some(1), &raw)), RiskLevel::Medium);
    assert_eq!(p.classify(&input(Some(49.9), Some(1), &raw)), RiskLevel::Low);
}

#[test]
fn zero_matches_is_low_not_unknown() {
    let p = ThresholdPolicy::default();
    let raw = json!({"matches": []});
    assert_eq!(p.classify(&input(Some(0.0), Some(0), &raw)), RiskLevel::Low);
    assert_eq!(p.classify(&input(None, Some(0), &raw)), RiskLevel::Low);
}

#[test]
fn count_is_used_without_percentage() {
    let p = ThresholdPolicy::default();
    let raw = Value::Null;
    assert_eq!(p.classify(&input(None, Some(1), &raw)), RiskLevel::Medium);
    assert_eq!(p.classify(&input(None, Some(3), &raw)), RiskLevel::Medium);
    assert_eq!(p.classify(&input(None, Some(4), &raw)), RiskLevel::High);
}

#[test]
fn no_signal_is_unknown() {
    let p = ThresholdPolicy::default();
    assert_eq!(p.classify(&input(None, None, &Value::Null)), RiskLevel::Unknown);
}

#[test]
fn closures_are_policies() {
    let always_high = |_: &RiskInput<'_>| RiskLevel::High;
    let raw = Value::Null;
    assert_eq!(always_high.classify(&input(Some(0.0), Some(0), &raw)), RiskLevel::High);

    let boxed: Box<dyn RiskPolicy> = Box::new(|i: &RiskInput<'_>| match i.match_count {
        Some(n) if n > 10 => RiskLevel::High,
        _ => RiskLevel::Low,
    });
    assert_eq!(boxed.classify(&input(None, Some(11), &raw)), RiskLevel::High);
    assert_eq!(boxed.classify(&input(None, Some(2), &raw)), RiskLevel::Low);
}

#[test]
fn adjusted_policy_can_rewrite_verdict() {
    // Matches on stock sites only count as medium.
    let policy = Adjusted::new(
        ThresholdPolicy::default(),
        |level: RiskLevel, i: &RiskInput<'_>| {
            let stock = i.raw_result["stock"].as_bool().unwrap_or(false);
            if level == RiskLevel::High && stock {
                RiskLevel::Medium
            } else {
                level
            }
        },
    );
    let stock = json!({"stock": true});
    let plain = json!({});
    assert_eq!(policy.classify(&input(Some(95.0), Some(8), &stock)), RiskLevel::Medium);
    assert_eq!(policy.classify(&input(Some(95.0), Some(8), &plain)), RiskLevel::High);
    assert_eq!(policy.classify(&input(Some(10.0), Some(1), &stock)), RiskLevel::Low);
}

use std::time::Duration;

use watchrun::engine::RetryPolicy;

#[test]
fn delay_grows_linearly_with_attempt_and_factor() {
    let policy = RetryPolicy::retries(5)
        .with_delays(Duration::from_millis(100), Duration::from_secs(10))
        .with_factor(2.0);

    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    assert_eq!(policy.delay_for(3), Duration::from_millis(600));
}

#[test]
fn delay_is_capped_at_max() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for(15), Duration::from_secs(30));
    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
}

#[test]
fn defaults() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_retries, 0);
    assert_eq!(policy.min_delay, Duration::from_secs(1));
    assert_eq!(policy.max_delay, Duration::from_secs(30));
    assert_eq!(policy.factor, 2.0);
}

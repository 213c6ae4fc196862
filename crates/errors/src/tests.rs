use super::*;

#[test]
fn code_follows_error_kind() {
    assert_eq!(SchedError::Unauthorized.code(), 401);
    assert_eq!(SchedError::not_found("workflow").code(), 404);
    assert_eq!(SchedError::conflict("busy").code(), 409);
    assert_eq!(SchedError::invalid_dag("1/a").code(), 400);
    assert_eq!(SchedError::WorkflowFailed.code(), 500);
    assert_eq!(SchedError::transient("etcd down").code(), 503);
    assert_eq!(SchedError::fatal("bug").code(), 500);
}

#[test]
fn only_conflict_and_transient_are_retryable() {
    assert!(SchedError::conflict("stm").is_retryable());
    assert!(SchedError::transient("io").is_retryable());
    assert!(!SchedError::Unauthorized.is_retryable());
    assert!(!SchedError::WorkflowFailed.is_retryable());
    assert!(!SchedError::fatal("bug").is_retryable());
}

#[test]
fn fatal_classification() {
    assert!(SchedError::fatal("invariant").is_fatal());
    assert!(!SchedError::conflict("stm").is_fatal());
}

#[test]
fn serde_errors_map_to_serialization() {
    let err = serde_json::from_str::<i64>("not a number").unwrap_err();
    let mapped: SchedError = err.into();
    assert!(matches!(mapped, SchedError::Serialization(_)));
    assert_eq!(mapped.code(), 500);
}

#[test]
fn display_messages_are_chinese() {
    let err = SchedError::not_found("workflow 42");
    assert_eq!(err.to_string(), "workflow 42 不存在");
    assert_eq!(SchedError::WorkflowFailed.to_string(), "workflow任务失败");
}

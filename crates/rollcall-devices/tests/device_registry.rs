//! Integration tests for the device registry.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use rollcall_devices::{DeviceError, DeviceRegistry, RegistryConfig};
use rollcall_protocol::{DeviceId, DeviceMeta, DeviceStatus, ErrorKind, StudentId};
use rollcall_tick::ManualClock;

// =========================================================================
// Helpers
// =========================================================================

fn registry() -> (Arc<ManualClock>, DeviceRegistry) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry = DeviceRegistry::new(RegistryConfig::default(), clock.clone());
    (clock, registry)
}

fn s(id: &str) -> StudentId {
    StudentId::from(id)
}

fn d(id: &str) -> DeviceId {
    DeviceId::from(id)
}

fn phone() -> DeviceMeta {
    DeviceMeta {
        device_name: Some("Pixel".into()),
        os: Some("android".into()),
        os_version: Some("15".into()),
    }
}

// =========================================================================
// register
// =========================================================================

#[tokio::test]
async fn test_register_new_device_is_active() {
    let (_clock, reg) = registry();
    let r = reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    assert_eq!(r.status, DeviceStatus::Active);
    assert_eq!(r.student_id, s("S1"));
    assert!(reg.is_valid(&s("S1"), &d("D1")).await);
}

#[tokio::test]
async fn test_register_device_of_another_student_conflicts() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();

    let err = reg.register(&s("S2"), d("D1"), phone()).await.unwrap_err();
    assert!(matches!(err, DeviceError::BoundToAnotherStudent(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!reg.is_valid(&s("S2"), &d("D1")).await);
}

#[tokio::test]
async fn test_register_same_device_twice_is_idempotent() {
    let (_clock, reg) = registry();
    let first = reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    let again = reg
        .register(&s("S1"), d("D1"), DeviceMeta::default())
        .await
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(reg.list(&s("S1")).await.len(), 1);
}

#[tokio::test]
async fn test_register_third_active_device_conflicts() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    reg.register(&s("S1"), d("D2"), phone()).await.unwrap();

    let err = reg.register(&s("S1"), d("D3"), phone()).await.unwrap_err();
    assert!(matches!(err, DeviceError::LimitReached { max: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_register_after_blocking_one_succeeds() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    reg.register(&s("S1"), d("D2"), phone()).await.unwrap();
    reg.block(&d("D1")).await.unwrap();

    let r = reg.register(&s("S1"), d("D3"), phone()).await.unwrap();
    assert_eq!(r.status, DeviceStatus::Active);
}

#[tokio::test]
async fn test_register_concurrently_never_exceeds_cap() {
    let (_clock, reg) = registry();
    let reg = Arc::new(reg);

    let mut handles = Vec::new();
    for i in 0..6 {
        let reg = Arc::clone(&reg);
        handles.push(tokio::spawn(async move {
            reg.register(&s("S1"), d(&format!("D{i}")), DeviceMeta::default())
                .await
                .is_ok()
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap() {
            ok += 1;
        }
    }
    assert_eq!(ok, 2);
}

// =========================================================================
// block / unblock
// =========================================================================

#[tokio::test]
async fn test_block_makes_device_invalid() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();

    let blocked = reg.block(&d("D1")).await.unwrap();
    assert_eq!(blocked.status, DeviceStatus::Blocked);
    assert!(!reg.is_valid(&s("S1"), &d("D1")).await);

    reg.unblock(&d("D1")).await.unwrap();
    assert!(reg.is_valid(&s("S1"), &d("D1")).await);
}

#[tokio::test]
async fn test_block_unknown_device_not_found() {
    let (_clock, reg) = registry();
    let err = reg.block(&d("nope")).await.unwrap_err();
    assert!(matches!(err, DeviceError::NotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(
        reg.unblock(&d("nope")).await,
        Err(DeviceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unblock_when_slot_refilled_conflicts() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    reg.register(&s("S1"), d("D2"), phone()).await.unwrap();
    reg.block(&d("D1")).await.unwrap();
    reg.register(&s("S1"), d("D3"), phone()).await.unwrap();

    let err = reg.unblock(&d("D1")).await.unwrap_err();
    assert!(matches!(err, DeviceError::LimitReached { .. }));
}

// =========================================================================
// remove / list
// =========================================================================

#[tokio::test]
async fn test_remove_is_scoped_to_owner() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();

    let err = reg.remove(&s("S2"), &d("D1")).await.unwrap_err();
    assert!(matches!(err, DeviceError::NotFound(_)));
    assert!(reg.is_valid(&s("S1"), &d("D1")).await);

    reg.remove(&s("S1"), &d("D1")).await.unwrap();
    assert!(!reg.is_valid(&s("S1"), &d("D1")).await);
    assert!(reg.list(&s("S1")).await.is_empty());
}

#[tokio::test]
async fn test_removed_device_can_be_registered_by_another_student() {
    let (_clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    reg.remove(&s("S1"), &d("D1")).await.unwrap();
    reg.register(&s("S2"), d("D1"), phone()).await.unwrap();
    assert!(reg.is_valid(&s("S2"), &d("D1")).await);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let (clock, reg) = registry();
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    clock.advance(TimeDelta::minutes(1));
    reg.register(&s("S1"), d("D2"), phone()).await.unwrap();
    reg.register(&s("S2"), d("D9"), phone()).await.unwrap();

    let ids: Vec<_> = reg
        .list(&s("S1"))
        .await
        .into_iter()
        .map(|r| r.device_id)
        .collect();
    assert_eq!(ids, vec![d("D2"), d("D1")]);
}

#[tokio::test]
async fn test_custom_cap_is_honored() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let reg = DeviceRegistry::new(RegistryConfig { max_active_devices: 1 }, clock);
    reg.register(&s("S1"), d("D1"), phone()).await.unwrap();
    assert!(reg.register(&s("S1"), d("D2"), phone()).await.is_err());
}

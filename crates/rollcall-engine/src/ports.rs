//! Collaborator ports: the classroom roster the engine reads from, and the
//! downstream sink it emits domain events to.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rollcall_protocol::{ClassId, DomainEvent, SessionRef, StudentId};
use tracing::warn;

use crate::AttendanceError;

/// Failure reported by a collaborator implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// What the classroom collaborator knows about one class meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSessionInfo {
    pub class_id: ClassId,
}

/// Read-only access to class meetings and enrolment.
#[async_trait]
pub trait Classroom: Send + Sync + 'static {
    /// `Ok(None)` when the reference is unknown.
    async fn session_info(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<ClassSessionInfo>, CollaboratorError>;

    async fn enrolled_student_ids(
        &self,
        class_id: &ClassId,
    ) -> Result<Vec<StudentId>, CollaboratorError>;
}

/// Downstream consumers (notifications, reporting). Delivery is
/// at-least-once, so consumers must be idempotent.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, event: DomainEvent) -> Result<(), CollaboratorError>;
}

/// Runs a collaborator call under `limit`, folding timeouts and failures
/// into [`AttendanceError::CollaboratorUnavailable`].
pub(crate) async fn call_with_timeout<T>(
    collaborator: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, AttendanceError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AttendanceError::CollaboratorUnavailable {
            collaborator,
            reason: e.0,
        }),
        Err(_) => Err(AttendanceError::CollaboratorUnavailable {
            collaborator,
            reason: format!("timed out after {limit:?}"),
        }),
    }
}

/// Publishes `event`, logging and swallowing any failure. A committed
/// change is never rolled back because a consumer is down.
pub(crate) async fn emit(sink: &dyn EventSink, limit: Duration, event: DomainEvent) {
    let pattern = event.pattern();
    if let Err(e) = call_with_timeout("event sink", limit, sink.publish(event)).await {
        warn!(pattern, error = %e, "domain event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_times_out_slow_call() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, CollaboratorError>(())
        };
        let err = call_with_timeout("roster", Duration::from_secs(3), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::CollaboratorUnavailable { collaborator: "roster", .. }
        ));
    }

    #[tokio::test]
    async fn test_call_with_timeout_maps_failure() {
        let failing = async { Err::<(), _>(CollaboratorError::new("connection refused")) };
        let err = call_with_timeout("roster", Duration::from_secs(3), failing)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "roster unavailable: connection refused");
    }

    #[tokio::test]
    async fn test_call_with_timeout_passes_value_through() {
        let ok = async { Ok::<_, CollaboratorError>(7) };
        assert_eq!(
            call_with_timeout("roster", Duration::from_secs(3), ok).await.unwrap(),
            7
        );
    }
}

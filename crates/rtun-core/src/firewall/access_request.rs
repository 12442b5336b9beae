//! Access-request workflow (C9): list/approve/reject/revoke blocked-request
//! records with a bounded approval lifetime.

use chrono::{Duration, Utc};

use crate::error::{CoreError, Result};
use crate::models::{AccessRequestStatus, FirewallAccessRequest, Id};
use crate::store::Store;

/// Clamp to `[1, 60]` minutes per §4.9.
pub fn clamp_duration_minutes(duration_minutes: i64) -> i64 {
    duration_minutes.clamp(1, 60)
}

pub async fn list(
    store: &dyn Store,
    project_id: Id,
    status: Option<AccessRequestStatus>,
) -> Vec<FirewallAccessRequest> {
    store.access_requests(project_id, status).await
}

pub async fn approve(
    store: &dyn Store,
    id: Id,
    duration_minutes: i64,
) -> Result<FirewallAccessRequest> {
    let existing = store
        .get_access_request(id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))?;

    // Idempotent on terminal states (§4.9): re-approving an already-rejected
    // or already-revoked request is a no-op that returns the record as-is.
    if matches!(
        existing.status,
        AccessRequestStatus::Rejected | AccessRequestStatus::Revoked
    ) {
        return Ok(existing);
    }

    let minutes = clamp_duration_minutes(duration_minutes);
    let approved_until = Utc::now() + Duration::minutes(minutes);
    store
        .set_access_request_status(id, AccessRequestStatus::Approved, Some(approved_until))
        .await?;
    store
        .get_access_request(id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))
}

pub async fn reject(store: &dyn Store, id: Id) -> Result<FirewallAccessRequest> {
    let existing = store
        .get_access_request(id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))?;
    if existing.status == AccessRequestStatus::Revoked {
        return Ok(existing);
    }
    store
        .set_access_request_status(id, AccessRequestStatus::Rejected, None)
        .await?;
    store
        .get_access_request(id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))
}

/// Revoke `approved` records matching `id`, or by `project`/`ip` filter.
/// Setting `approved_until = now` rather than deleting, so the record
/// remains as an audit trail.
pub async fn revoke_by_id(store: &dyn Store, id: Id) -> Result<FirewallAccessRequest> {
    let existing = store
        .get_access_request(id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))?;
    if existing.status != AccessRequestStatus::Approved {
        return Ok(existing);
    }
    store
        .set_access_request_status(id, AccessRequestStatus::Revoked, Some(Utc::now()))
        .await?;
    store
        .get_access_request(id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("access request {id}")))
}

pub async fn revoke_matching(
    store: &dyn Store,
    project_id: Option<Id>,
    ip_address: Option<&str>,
) -> Result<u64> {
    store.revoke_approved(project_id, ip_address).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn approve_clamps_duration_and_allows_bypass_scope() {
        let store = InMemoryStore::new();
        let req = store
            .create_access_request(1, "1.2.3.4".into(), "GET".into(), "/admin".into(), None, "blocked".into())
            .await
            .unwrap();

        let approved = approve(&store, req.id, 9999).await.unwrap();
        assert_eq!(approved.status, AccessRequestStatus::Approved);
        let until = approved.approved_until.unwrap();
        let delta = until - Utc::now();
        assert!(delta.num_minutes() <= 60 && delta.num_minutes() >= 59);

        // exact tuple bypasses
        let hit = store
            .find_approved(1, "1.2.3.4", "GET", "/admin", Utc::now())
            .await;
        assert!(hit.is_some());

        // different path does not
        let miss = store
            .find_approved(1, "1.2.3.4", "GET", "/other", Utc::now())
            .await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn revoke_expires_immediately() {
        let store = InMemoryStore::new();
        let req = store
            .create_access_request(1, "1.2.3.4".into(), "GET".into(), "/admin".into(), None, "blocked".into())
            .await
            .unwrap();
        approve(&store, req.id, 5).await.unwrap();
        revoke_by_id(&store, req.id).await.unwrap();

        let hit = store
            .find_approved(1, "1.2.3.4", "GET", "/admin", Utc::now())
            .await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn reject_is_idempotent_on_revoked() {
        let store = InMemoryStore::new();
        let req = store
            .create_access_request(1, "1.2.3.4".into(), "GET".into(), "/admin".into(), None, "blocked".into())
            .await
            .unwrap();
        approve(&store, req.id, 5).await.unwrap();
        revoke_by_id(&store, req.id).await.unwrap();
        let after = reject(&store, req.id).await.unwrap();
        assert_eq!(after.status, AccessRequestStatus::Revoked);
    }
}

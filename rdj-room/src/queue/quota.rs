//! Per-submitter intake accounting

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rdj_common::{QueueEntry, SubmitterQuota};

/// Number of entries `submitter_id` currently has queued
pub fn queued_by(queue: &[QueueEntry], submitter_id: &str) -> usize {
    queue.iter().filter(|e| e.submitter_id == submitter_id).count()
}

/// Accept or reject one more request under `quota`
///
/// Suspension is checked first so a suspended submitter with a full queue
/// is told about the suspension.
pub fn check_admission(quota: &SubmitterQuota, cap: usize, now: DateTime<Utc>) -> Result<()> {
    if let Some(until) = quota.suspended_until.filter(|_| quota.is_suspended(now)) {
        return Err(Error::SuspendedSubmitter {
            submitter: quota.submitter_id.clone(),
            until,
        });
    }
    if quota.current_queue_count >= cap {
        return Err(Error::QuotaExceeded {
            submitter: quota.submitter_id.clone(),
            cap,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quota(count: usize, suspended_until: Option<DateTime<Utc>>) -> SubmitterQuota {
        SubmitterQuota {
            submitter_id: "alice".to_string(),
            current_queue_count: count,
            total_played: 0,
            suspended_until,
        }
    }

    #[test]
    fn test_cap_is_inclusive_limit() {
        let now = Utc::now();
        assert!(check_admission(&quota(2, None), 3, now).is_ok());
        assert!(matches!(
            check_admission(&quota(3, None), 3, now),
            Err(Error::QuotaExceeded { cap: 3, .. })
        ));
    }

    #[test]
    fn test_suspension_wins_over_quota() {
        let now = Utc::now();
        let q = quota(3, Some(now + Duration::hours(1)));
        assert!(matches!(
            check_admission(&q, 3, now),
            Err(Error::SuspendedSubmitter { .. })
        ));
    }

    #[test]
    fn test_expired_suspension_ignored() {
        let now = Utc::now();
        let q = quota(0, Some(now - Duration::seconds(1)));
        assert!(check_admission(&q, 3, now).is_ok());
    }
}

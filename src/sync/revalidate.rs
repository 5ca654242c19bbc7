use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::models::RevalidationOutcome;
use crate::store::RevalidationStore;
use crate::utils::PkdError;

/// Re-checks the expiry status of every stored validation result and keeps
/// the per-upload rollup counts consistent with the rows.
pub struct Revalidator;

impl Revalidator {
    pub fn run<S: RevalidationStore>(store: &mut S) -> Result<RevalidationOutcome, PkdError> {
        Self::run_at(store, Utc::now())
    }

    /// Sweep with an explicit clock, which the scheduler tests pin.
    pub fn run_at<S: RevalidationStore>(
        store: &mut S,
        now: DateTime<Utc>,
    ) -> Result<RevalidationOutcome, PkdError> {
        let started = Instant::now();
        let validations = store.validations_with_expiry()?;

        let mut outcome = RevalidationOutcome {
            run_at: now,
            total_processed: 0,
            newly_expired: 0,
            newly_valid: 0,
            unchanged: 0,
            errors: 0,
            duration_ms: 0,
        };

        for validation in &validations {
            outcome.total_processed += 1;
            let Some(not_after) = validation.not_after else {
                outcome.unchanged += 1;
                continue;
            };
            let expired_now = now > not_after;

            let update = if expired_now && !validation.is_expired {
                // The certificate ran out since the last sweep.
                Some((true, "INVALID".to_string()))
            } else if !expired_now && validation.is_expired {
                // An expiry recorded in error, or a corrected notAfter. The
                // INVALID label came from the expiry alone, so restore VALID
                // when the remaining checks hold.
                let status = if validation.trust_chain_valid && validation.signature_valid {
                    "VALID".to_string()
                } else {
                    validation.validation_status.clone()
                };
                Some((false, status))
            } else {
                None
            };

            match update {
                Some((is_expired, status)) => {
                    match store.update_validation_expiry(validation.id, is_expired, &status) {
                        Ok(()) => {
                            if is_expired {
                                outcome.newly_expired += 1;
                            } else {
                                outcome.newly_valid += 1;
                            }
                        }
                        Err(e) => {
                            error!("revalidation update for row {} failed: {}", validation.id, e);
                            outcome.errors += 1;
                        }
                    }
                }
                None => outcome.unchanged += 1,
            }
        }

        store.recompute_upload_expired_counts()?;
        outcome.duration_ms = started.elapsed().as_millis() as i64;
        store.insert_revalidation_history(&outcome)?;
        info!(
            "revalidation processed {} rows ({} newly expired, {} newly valid)",
            outcome.total_processed, outcome.newly_expired, outcome.newly_valid
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredValidation;
    use crate::sync::reconcile::testing::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn validation(
        id: i64,
        upload_id: i64,
        not_after: Option<DateTime<Utc>>,
        is_expired: bool,
    ) -> StoredValidation {
        // A row flagged expired always carries the INVALID label the forward
        // transition wrote.
        StoredValidation {
            id,
            certificate_id: id,
            upload_id,
            validation_status: if is_expired { "INVALID" } else { "VALID" }.to_string(),
            trust_chain_valid: true,
            signature_valid: true,
            validity_period_valid: !is_expired,
            revocation_status: Some("NOT_REVOKED".to_string()),
            not_after,
            is_expired,
        }
    }

    #[test]
    fn test_sweep_transitions() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();
        store.validations = vec![
            // Ran out a day ago, not yet flagged.
            validation(1, 10, Some(now - Duration::days(1)), false),
            // Still valid, correctly unflagged.
            validation(2, 10, Some(now + Duration::days(300)), false),
            // Flagged expired but notAfter is in the future.
            validation(3, 11, Some(now + Duration::days(5)), true),
            // Already flagged, still expired.
            validation(4, 11, Some(now - Duration::days(90)), true),
        ];

        let outcome = Revalidator::run_at(&mut store, now).unwrap();
        assert_eq!(outcome.total_processed, 4);
        assert_eq!(outcome.newly_expired, 1);
        assert_eq!(outcome.newly_valid, 1);
        assert_eq!(outcome.unchanged, 2);
        assert_eq!(outcome.errors, 0);

        let row1 = store.validations.iter().find(|v| v.id == 1).unwrap();
        assert!(row1.is_expired);
        assert_eq!(row1.validation_status, "INVALID");
        // The reverse transition clears the expiry-induced INVALID label.
        let row3 = store.validations.iter().find(|v| v.id == 3).unwrap();
        assert!(!row3.is_expired);
        assert_eq!(row3.validation_status, "VALID");
    }

    #[test]
    fn test_reverse_transition_keeps_status_when_other_checks_fail() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();
        let mut row = validation(1, 10, Some(now + Duration::days(5)), true);
        row.trust_chain_valid = false;
        store.validations = vec![row];

        let outcome = Revalidator::run_at(&mut store, now).unwrap();
        assert_eq!(outcome.newly_valid, 1);
        // The INVALID label stands on its own here; only the expiry flag
        // clears.
        let row = &store.validations[0];
        assert!(!row.is_expired);
        assert_eq!(row.validation_status, "INVALID");
    }

    #[test]
    fn test_rollup_counts_follow_rows() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();
        store.validations = vec![
            validation(1, 10, Some(now - Duration::days(1)), false),
            validation(2, 10, Some(now - Duration::days(2)), false),
            validation(3, 11, Some(now + Duration::days(30)), false),
        ];

        Revalidator::run_at(&mut store, now).unwrap();
        assert_eq!(store.upload_expired_counts.get(&10), Some(&2));
        assert_eq!(store.upload_expired_counts.get(&11), None);
    }

    #[test]
    fn test_history_row_written() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();
        store.validations = vec![validation(1, 10, Some(now - Duration::days(1)), false)];

        Revalidator::run_at(&mut store, now).unwrap();
        assert_eq!(store.revalidation_history.len(), 1);
        assert_eq!(store.revalidation_history[0].newly_expired, 1);
    }
}

use chrono::{DateTime, Duration, Utc};

/// Bounded, cooldown-gated retry policy for failed payouts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_cooldown_secs: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_cooldown_secs: u64) -> Self {
        Self {
            max_retries,
            base_cooldown_secs,
        }
    }

    pub fn from_env() -> Self {
        Self {
            max_retries: std::env::var("PAYOUT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            base_cooldown_secs: std::env::var("PAYOUT_RETRY_COOLDOWN_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(300),
        }
    }

    /// Cooldown grows with the attempt count; a payout is never re-tried
    /// back-to-back.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let multiplier = 1_u64 << retry_count.min(6);
        now + Duration::seconds((self.base_cooldown_secs * multiplier) as i64)
    }

    pub fn attempts_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

/// Classify a provider payout failure as worth retrying or permanent.
/// Transient conditions (operator float exhausted, timeouts, internal
/// processing hiccups) resolve on their own; account-level rejections do
/// not.
pub fn should_retry_payout(failure_reason: Option<&str>) -> bool {
    let reason = match failure_reason {
        Some(r) => r.to_uppercase(),
        None => return true, // no diagnosis from the provider; assume transient
    };

    const PERMANENT: &[&str] = &[
        "INVALID_PAYEE",
        "INVALID_PAYER",
        "INVALID_ACCOUNT",
        "ACCOUNT_NOT_FOUND",
        "PAYEE_NOT_FOUND",
        "PAYER_NOT_FOUND",
        "NOT_ALLOWED",
        "REJECTED",
        "INVALID_PAYER_FORMAT",
        "BLOCKED",
        "BARRED",
    ];
    const TRANSIENT: &[&str] = &[
        "INSUFFICIENT_BALANCE",
        "NOT_ENOUGH_FUNDS",
        "LIMIT_REACHED",
        "TIMEOUT",
        "TIMED OUT",
        "INTERNAL_PROCESSING_ERROR",
        "SERVICE_UNAVAILABLE",
        "TEMPORARILY",
        "TRY AGAIN",
    ];

    if PERMANENT.iter().any(|marker| reason.contains(marker)) {
        return false;
    }
    if TRANSIENT.iter().any(|marker| reason.contains(marker)) {
        return true;
    }
    // Unknown failure vocabulary: retrying a disbursement is safe (the
    // provider dedupes by reference), giving up is not.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(should_retry_payout(Some("INSUFFICIENT_BALANCE")));
        assert!(should_retry_payout(Some("request timed out")));
        assert!(should_retry_payout(Some("INTERNAL_PROCESSING_ERROR")));
        assert!(should_retry_payout(None));
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(!should_retry_payout(Some("INVALID_PAYEE")));
        assert!(!should_retry_payout(Some("payee_not_found")));
        assert!(!should_retry_payout(Some("REJECTED")));
    }

    #[test]
    fn permanent_marker_wins_over_transient_wording() {
        assert!(!should_retry_payout(Some(
            "REJECTED: try again with a valid account"
        )));
    }

    #[test]
    fn budget_is_exhausted_at_max_retries() {
        let policy = RetryPolicy::new(3, 300);
        assert!(!policy.attempts_exhausted(2));
        assert!(policy.attempts_exhausted(3));
        assert!(policy.attempts_exhausted(4));
    }

    #[test]
    fn cooldown_grows_with_attempts() {
        let policy = RetryPolicy::new(3, 300);
        let now = Utc::now();
        let first = policy.next_attempt_at(now, 0);
        let second = policy.next_attempt_at(now, 1);
        let third = policy.next_attempt_at(now, 2);
        assert_eq!(first, now + Duration::seconds(300));
        assert_eq!(second, now + Duration::seconds(600));
        assert_eq!(third, now + Duration::seconds(1200));
    }
}

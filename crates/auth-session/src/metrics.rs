//! Reconciliation counters
//!
//! Emitted through the `metrics` facade; without an installed recorder these
//! calls are no-ops.
//!
//! - `backend_token_validations_total` (counter): label `outcome`
//! - `backend_token_exchanges_total` (counter): label `outcome`
//! - `backend_reconciliations_discarded_total` (counter)

/// Record a cached-token validation: `valid`, `invalid` or `timeout`.
pub fn record_validation(outcome: &'static str) {
    metrics::counter!("backend_token_validations_total", "outcome" => outcome).increment(1);
}

/// Record a token exchange: `success`, `failure` or `timeout`.
pub fn record_exchange(outcome: &'static str) {
    metrics::counter!("backend_token_exchanges_total", "outcome" => outcome).increment(1);
}

/// Record a reconciliation result dropped because a newer one superseded it.
pub fn record_discarded() {
    metrics::counter!("backend_reconciliations_discarded_total").increment(1);
}

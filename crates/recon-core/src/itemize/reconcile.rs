//! Proportional scaling of candidate items against the authoritative total
//!
//! Extracted line items rarely sum to the expense amount recorded by the
//! user (taxes folded differently, currency rounding, model noise). The
//! persisted invariant is that they must: items are scaled uniformly and any
//! residual cents are absorbed by the last item in list order.

use tracing::debug;

use crate::models::CandidateItem;
use crate::normalize::round2;

/// Relative difference below which the candidate sum is accepted as-is
const SCALE_THRESHOLD: f64 = 0.01;
/// Smallest drift worth correcting (one cent)
const DRIFT_EPSILON: f64 = 0.01;

/// Sum of candidate amounts, rounded to cents
pub fn candidate_sum(items: &[CandidateItem]) -> f64 {
    round2(items.iter().map(|i| i.amount).sum())
}

/// Scale candidates so their sum matches the authoritative total
///
/// No-op unless both the total and the candidate sum are positive and they
/// disagree by more than 1% relative. When scaling applies, every amount is
/// multiplied by `total / sum` and rounded to cents, then the accumulated
/// rounding drift is added to the last item so the sum lands exactly on the
/// total. Order is preserved throughout; the drift target is always the last
/// item in list order. Returns the applied scale factor, if any.
///
/// Re-running on an already reconciled list is a no-op, which keeps repeated
/// reconciliation idempotent.
pub fn scale_to_total(items: &mut [CandidateItem], total: f64) -> Option<f64> {
    if items.is_empty() {
        return None;
    }
    let sum: f64 = items.iter().map(|i| i.amount).sum();
    if total <= 0.0 || sum <= 0.0 {
        return None;
    }
    if (sum - total).abs() / total <= SCALE_THRESHOLD {
        return None;
    }

    let scale = total / sum;
    debug!(scale, sum, total, "Scaling candidate items to expense total");
    let mut running = 0.0;
    for item in items.iter_mut() {
        item.amount = round2(item.amount * scale);
        running += item.amount;
    }

    let drift = round2(total - running);
    if drift.abs() >= DRIFT_EPSILON {
        if let Some(last) = items.last_mut() {
            last.amount = round2(last.amount + drift);
            debug!(drift, "Adjusted last item for rounding drift");
        }
    }

    Some(scale)
}

//! Receipt-to-expense match scoring and proposal
//!
//! Scoring is a weighted blend of merchant, amount, and date similarity over
//! normalized extracted fields. Proposal selection is a local per-receipt
//! greedy argmax over the caller's expense list, not a global assignment;
//! conflicting proposals are resolved downstream at confirmation time.

use tracing::{debug, info};

use crate::models::{Expense, MatchComponents, MatchProposal, Receipt};
use crate::normalize::{normalize_merchant, parse_date, round2};

/// Matching weight configuration
const MERCHANT_WEIGHT: f64 = 0.5;
const AMOUNT_WEIGHT: f64 = 0.3;
const DATE_WEIGHT: f64 = 0.2;

/// Amount difference treated as an exact match (absorbs rounding)
const AMOUNT_EXACT_TOLERANCE: f64 = 0.5;
/// Relative error at which the amount score decays to zero
const AMOUNT_DECAY_LIMIT: f64 = 0.05;

/// A scored expense-receipt pairing with its advisory breakdown
#[derive(Debug, Clone)]
pub struct MatchScore {
    pub total: f64,
    pub rationale: String,
    pub components: MatchComponents,
}

/// Levenshtein edit distance over char slices (single-row DP)
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev_diag + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev_diag = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Substring-tolerant fuzzy similarity in [0, 1]
///
/// Slides the shorter string across every same-length window of the longer
/// one and keeps the best Levenshtein similarity. An exact substring scores
/// 1.0, which is what makes "jw marriott" line up against
/// "jw marriott pune receipt".
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    if short.is_empty() || long.is_empty() {
        return 0.0;
    }

    let m = short.len();
    let mut best = 0.0_f64;
    for start in 0..=(long.len() - m) {
        let window = &long[start..start + m];
        let dist = levenshtein(&short, window);
        let ratio = 1.0 - dist as f64 / m as f64;
        if ratio > best {
            best = ratio;
        }
        if best >= 1.0 {
            break;
        }
    }
    best
}

fn merchant_component(expense: &Expense, receipt: &Receipt) -> f64 {
    let receipt_field = receipt.merchant_or_vendor();
    if receipt_field.is_none() || expense.merchant.trim().is_empty() {
        return 0.0;
    }
    let rec_merch = normalize_merchant(receipt_field).filter(|s| !s.is_empty());
    let exp_merch = normalize_merchant(Some(&expense.merchant)).filter(|s| !s.is_empty());
    match (rec_merch, exp_merch) {
        (Some(rec), Some(exp)) => partial_ratio(&rec, &exp),
        _ => 0.0,
    }
}

fn amount_component(expense: &Expense, receipt: &Receipt) -> f64 {
    let rec_amount = match receipt.extracted_amount {
        Some(a) => round2(a),
        None => return 0.0,
    };
    let exp_amount = round2(expense.amount);
    if exp_amount == 0.0 {
        // No meaningful relative comparison against a zero expense
        return 0.0;
    }
    let delta = (exp_amount - rec_amount).abs();
    if delta <= AMOUNT_EXACT_TOLERANCE {
        return 1.0;
    }
    let pct = delta / exp_amount;
    (1.0 - pct / AMOUNT_DECAY_LIMIT).max(0.0)
}

/// Score ladder shared by the range and single-date paths:
/// exact/inside 1.0, one day off 0.6, two days 0.3, beyond 0.0
fn day_distance_score(days: i64) -> f64 {
    match days {
        0 => 1.0,
        1 => 0.6,
        2 => 0.3,
        _ => 0.0,
    }
}

fn date_component(expense: &Expense, receipt: &Receipt) -> f64 {
    let exp_date = expense.date;

    // A present service range takes precedence over the single date, even
    // when the range fails to parse.
    let range_start = receipt.extracted_service_start.as_deref();
    let range_end = receipt.extracted_service_end.as_deref();
    if range_start.is_some() && range_end.is_some() {
        let (start, end) = match (parse_date(range_start), parse_date(range_end)) {
            (Some(s), Some(e)) => (s, e),
            _ => return 0.0,
        };
        if start <= exp_date && exp_date <= end {
            return 1.0;
        }
        let days = if exp_date < start {
            (start - exp_date).num_days()
        } else {
            (exp_date - end).num_days()
        };
        return day_distance_score(days);
    }

    match parse_date(receipt.extracted_date.as_deref()) {
        Some(rec_date) => day_distance_score((rec_date - exp_date).num_days().abs()),
        None => 0.0,
    }
}

/// Score one expense against one receipt's extracted fields
///
/// Returns the weighted total, a human-readable rationale, and the raw
/// per-factor scores. Never fails: missing or malformed fields degrade the
/// affected factor to 0.0.
pub fn score_match(expense: &Expense, receipt: &Receipt) -> MatchScore {
    let merchant_score = merchant_component(expense, receipt);
    let amount_score = amount_component(expense, receipt);
    let date_score = date_component(expense, receipt);

    let total = merchant_score * MERCHANT_WEIGHT
        + amount_score * AMOUNT_WEIGHT
        + date_score * DATE_WEIGHT;

    let mut rationale_parts = vec![
        format!("merchant:{:.2}*{}", merchant_score, MERCHANT_WEIGHT),
        format!("amount:{:.2}*{}", amount_score, AMOUNT_WEIGHT),
        format!("date:{:.2}*{}", date_score, DATE_WEIGHT),
    ];
    if receipt.extracted_service_start.is_some() || receipt.extracted_service_end.is_some() {
        rationale_parts.push(format!(
            "range:{}->{}",
            receipt.extracted_service_start.as_deref().unwrap_or("None"),
            receipt.extracted_service_end.as_deref().unwrap_or("None"),
        ));
    }
    if receipt.extracted_vendor_name.is_some() && receipt.extracted_merchant.is_none() {
        rationale_parts.push("vendor_used".to_string());
    }

    MatchScore {
        total,
        rationale: rationale_parts.join("; "),
        components: MatchComponents {
            merchant_score,
            amount_score,
            date_score,
        },
    }
}

/// Propose the best expense for each eligible receipt
///
/// Receipts with an extraction error, or with neither a merchant/vendor name
/// nor an amount, are skipped. For the rest the strictly highest-scoring
/// expense wins; on an exact tie the earlier expense in the caller's list is
/// kept, so the input order is significant.
pub fn propose_matches(expenses: &[Expense], receipts: &[Receipt]) -> Vec<MatchProposal> {
    let mut proposals = Vec::new();

    for receipt in receipts {
        if receipt.error_message.is_some() || receipt.status.is_error() {
            info!(receipt_id = receipt.id, "Skipping receipt with extraction error");
            continue;
        }
        if receipt.merchant_or_vendor().is_none() && receipt.extracted_amount.is_none() {
            info!(
                receipt_id = receipt.id,
                "Skipping receipt due to missing merchant/vendor and amount"
            );
            continue;
        }

        debug!(
            receipt_id = receipt.id,
            file = %receipt.original_filename,
            merchant = ?receipt.extracted_merchant,
            vendor = ?receipt.extracted_vendor_name,
            amount = ?receipt.extracted_amount,
            date = ?receipt.extracted_date,
            "Matching receipt"
        );

        let mut best: Option<(f64, MatchScore, i64)> = None;
        for expense in expenses {
            let scored = score_match(expense, receipt);
            debug!(
                expense_id = expense.id,
                merchant = %expense.merchant,
                score = scored.total,
                merchant_score = scored.components.merchant_score,
                amount_score = scored.components.amount_score,
                date_score = scored.components.date_score,
                "Scored pair"
            );
            let better = match &best {
                Some((best_score, _, _)) => scored.total > *best_score,
                None => true,
            };
            if better {
                best = Some((scored.total, scored, expense.id));
            }
        }

        if let Some((total, scored, expense_id)) = best {
            info!(
                receipt_id = receipt.id,
                expense_id,
                score = total,
                rationale = %scored.rationale,
                "Selected match"
            );
            proposals.push(MatchProposal {
                receipt_id: receipt.id,
                expense_id,
                score: (total * 10_000.0).round() / 10_000.0,
                rationale: scored.rationale,
                components: scored.components,
            });
        }
    }

    proposals
}

//! Expense itemization pipeline
//!
//! For a confirmed hotel expense with linked receipts, this drives the full
//! flow: invoke the line-item provider on the primary receipt, parse its raw
//! output defensively, scale the surviving candidates to the expense total,
//! persist them, and run a final drift check against what storage actually
//! holds. Data problems surface as warnings in the outcome, never as errors;
//! `Err` is reserved for caller-contract and storage faults.

pub mod parser;
pub mod reconcile;

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::LineItem;
use crate::normalize::round2;
use crate::providers::LineItemExtractor;

use parser::{parse_line_item_response, ParsedResponse};
use reconcile::scale_to_total;

/// Only hotel expenses decompose into nightly charges
const ITEMIZABLE_CATEGORY: &str = "hotel";
/// Smallest drift worth correcting (one cent)
const DRIFT_EPSILON: f64 = 0.01;

/// How to treat items already persisted for the expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemizeStrategy {
    /// Reuse existing items when present
    #[default]
    Auto,
    /// Discard existing items and recompute from the receipt
    Rebuild,
}

impl std::str::FromStr for ItemizeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "rebuild" => Ok(Self::Rebuild),
            _ => Err(Error::InvalidData(format!("Unknown itemize strategy: {}", s))),
        }
    }
}

/// Result of one itemization run
#[derive(Debug, Clone, Serialize)]
pub struct ItemizeOutcome {
    pub expense_id: i64,
    pub items: Vec<LineItem>,
    /// True when existing persisted items were returned untouched
    pub reused: bool,
    /// Set when the run produced no items for a recoverable reason
    pub warning: Option<String>,
    /// Set when the provider returned a structured error envelope
    pub provider_error: Option<String>,
}

impl ItemizeOutcome {
    fn warning(expense_id: i64, message: &str) -> Self {
        Self {
            expense_id,
            items: Vec::new(),
            reused: false,
            warning: Some(message.to_string()),
            provider_error: None,
        }
    }
}

/// Removes the expense id from the in-flight set when the run ends
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    expense_id: i64,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<i64>>, expense_id: i64) -> Result<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(expense_id) {
            return Err(Error::ItemizationInProgress(expense_id));
        }
        Ok(Self {
            in_flight,
            expense_id,
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.expense_id);
    }
}

/// Drives itemization for one expense at a time
///
/// Runs for the same expense id are serialized: a second concurrent call
/// fails fast with `Error::ItemizationInProgress` instead of interleaving
/// with the persist/re-read phase.
pub struct Itemizer<P> {
    db: Database,
    provider: P,
    in_flight: Mutex<HashSet<i64>>,
}

impl<P: LineItemExtractor> Itemizer<P> {
    pub fn new(db: Database, provider: P) -> Self {
        Self {
            db,
            provider,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Itemize one expense
    ///
    /// Errors only for unknown expenses, non-hotel categories, concurrent
    /// runs, and storage faults. Everything the provider can get wrong comes
    /// back as a warning or provider_error in the outcome.
    pub async fn itemize(
        &self,
        expense_id: i64,
        strategy: ItemizeStrategy,
    ) -> Result<ItemizeOutcome> {
        let _guard = InFlightGuard::acquire(&self.in_flight, expense_id)?;

        let expense = self
            .db
            .get_expense(expense_id)?
            .ok_or_else(|| Error::NotFound(format!("Expense {}", expense_id)))?;
        info!(expense_id, strategy = ?strategy, category = %expense.category, "Itemization start");

        if !expense.category.eq_ignore_ascii_case(ITEMIZABLE_CATEGORY) {
            return Err(Error::Unsupported(format!(
                "itemization currently supported only for hotel expenses, got '{}'",
                expense.category
            )));
        }

        if strategy == ItemizeStrategy::Rebuild {
            let purged = self.db.delete_items_for_expense(expense_id)?;
            debug!(expense_id, purged, "Rebuild requested, existing items deleted");
        } else {
            let existing = self.db.items_for_expense(expense_id)?;
            if !existing.is_empty() {
                info!(expense_id, count = existing.len(), "Reusing existing items");
                return Ok(ItemizeOutcome {
                    expense_id,
                    items: existing,
                    reused: true,
                    warning: None,
                    provider_error: None,
                });
            }
        }

        let links = self.db.receipts_for_expense(expense_id)?;
        if links.is_empty() {
            info!(expense_id, "No linked receipts, cannot itemize");
            return Ok(ItemizeOutcome::warning(expense_id, "No receipts linked"));
        }

        // The first linked receipt carries the invoice to decompose
        let primary = &links[0];
        debug!(
            expense_id,
            receipt_id = primary.id,
            stored_path = %primary.stored_path,
            "Invoking line-item provider"
        );
        let raw = match self.provider.extract_line_items(&primary.stored_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(expense_id, error = %e, "Line-item provider call failed");
                String::new()
            }
        };

        let mut candidates = match parse_line_item_response(&raw) {
            ParsedResponse::ProviderError { message } => {
                warn!(expense_id, %message, "Provider returned error envelope");
                return Ok(ItemizeOutcome {
                    expense_id,
                    items: Vec::new(),
                    reused: false,
                    warning: None,
                    provider_error: Some(message),
                });
            }
            ParsedResponse::Empty => {
                return Ok(ItemizeOutcome::warning(
                    expense_id,
                    "Provider returned empty content",
                ));
            }
            ParsedResponse::Items(items) => items,
        };

        if candidates.is_empty() {
            info!(expense_id, "No valid items after normalization");
            return Ok(ItemizeOutcome::warning(expense_id, "No valid line items"));
        }

        let total = round2(expense.amount);
        scale_to_total(&mut candidates, total);

        self.db.insert_items(expense_id, &candidates)?;
        let mut items = self.db.items_for_expense(expense_id)?;

        // Storage may reintroduce rounding; nudge the last row once more so
        // the persisted sum lands exactly on the expense amount.
        let persisted_sum = self.db.sum_items_for_expense(expense_id)?;
        let final_drift = round2(total - persisted_sum);
        if final_drift.abs() >= DRIFT_EPSILON {
            if let Some(last) = items.last() {
                info!(expense_id, final_drift, item_id = last.id, "Post-persist drift correction");
                self.db.adjust_item_amount(last.id, final_drift)?;
                items = self.db.items_for_expense(expense_id)?;
            }
        }

        info!(expense_id, count = items.len(), "Itemization complete");
        Ok(ItemizeOutcome {
            expense_id,
            items,
            reused: false,
            warning: None,
            provider_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionStatus, NewExpense, NewReceipt, ReceiptLink};
    use crate::providers::MockExtractor;
    use chrono::NaiveDate;

    fn setup(category: &str, amount: f64) -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        let expense_id = db
            .create_expense(&NewExpense {
                date: NaiveDate::from_ymd_opt(2024, 9, 24).unwrap(),
                category: category.into(),
                merchant: "JW Marriott".into(),
                amount,
                tagged: false,
            })
            .unwrap();
        let receipt_id = db
            .create_receipt(&NewReceipt {
                original_filename: "invoice.pdf".into(),
                stored_path: "blob-1.pdf".into(),
                status: ExtractionStatus::Extracted,
                ..Default::default()
            })
            .unwrap();
        db.save_links(&[ReceiptLink {
            expense_id,
            receipt_id,
            match_score: 1.0,
        }])
        .unwrap();
        (db, expense_id)
    }

    const THREE_ITEMS: &str = r#"```json
[
  {"date": "23-09-24", "description": "Room Charge", "debit": 300},
  {"date": "24-09-24", "description": "Room Charge", "debit": 300},
  {"description": "Taxes", "debit": 300}
]
```"#;

    #[tokio::test]
    async fn test_scaling_pipeline_hits_total_exactly() {
        let (db, expense_id) = setup("Hotel", 1000.0);
        let itemizer = Itemizer::new(db.clone(), MockExtractor::with_line_items(THREE_ITEMS));

        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert!(!outcome.reused);
        assert!(outcome.warning.is_none());

        let amounts: Vec<f64> = outcome.items.iter().map(|i| i.amount).collect();
        assert_eq!(amounts, vec![333.33, 333.33, 333.34]);
        assert_eq!(db.sum_items_for_expense(expense_id).unwrap(), 1000.0);
        assert_eq!(
            outcome.items[0].item_date,
            NaiveDate::from_ymd_opt(2024, 9, 23)
        );
    }

    #[tokio::test]
    async fn test_empty_array_yields_warning_and_no_rows() {
        let (db, expense_id) = setup("Hotel", 1000.0);
        let itemizer = Itemizer::new(db.clone(), MockExtractor::with_line_items("```json\n[]\n```"));

        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert_eq!(outcome.warning.as_deref(), Some("No valid line items"));
        assert!(outcome.items.is_empty());
        assert!(db.items_for_expense(expense_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_envelope_propagated() {
        let (db, expense_id) = setup("Hotel", 1000.0);
        let raw = r#"{"error": true, "message": "deployment not found"}"#;
        let itemizer = Itemizer::new(db.clone(), MockExtractor::with_line_items(raw));

        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert_eq!(
            outcome.provider_error.as_deref(),
            Some("deployment not found")
        );
        assert!(db.items_for_expense(expense_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_provider_degrades_to_warning() {
        let (db, expense_id) = setup("Hotel", 1000.0);
        let itemizer = Itemizer::new(db, MockExtractor::failing());

        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert_eq!(
            outcome.warning.as_deref(),
            Some("Provider returned empty content")
        );
    }

    #[tokio::test]
    async fn test_reuse_then_rebuild() {
        let (db, expense_id) = setup("Hotel", 1000.0);
        let provider = MockExtractor::with_line_items(THREE_ITEMS);
        let itemizer = Itemizer::new(db, provider);

        let first = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert!(!first.reused);

        let second = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert!(second.reused);
        assert_eq!(
            second.items.iter().map(|i| i.amount).collect::<Vec<_>>(),
            first.items.iter().map(|i| i.amount).collect::<Vec<_>>()
        );

        let rebuilt = itemizer
            .itemize(expense_id, ItemizeStrategy::Rebuild)
            .await
            .unwrap();
        assert!(!rebuilt.reused);
        // Stable candidates reconcile to identical amounts
        assert_eq!(
            rebuilt.items.iter().map(|i| i.amount).collect::<Vec<_>>(),
            first.items.iter().map(|i| i.amount).collect::<Vec<_>>()
        );

        // Auto + auto + rebuild = two provider invocations
        assert_eq!(itemizer.provider.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_hotel_category_rejected() {
        let (db, expense_id) = setup("Flight", 450.0);
        let itemizer = Itemizer::new(db, MockExtractor::with_line_items(THREE_ITEMS));

        let result = itemizer.itemize(expense_id, ItemizeStrategy::Auto).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_unknown_expense_rejected() {
        let db = Database::in_memory().unwrap();
        let itemizer = Itemizer::new(db, MockExtractor::with_line_items(THREE_ITEMS));

        let result = itemizer.itemize(42, ItemizeStrategy::Auto).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_no_linked_receipts_warns() {
        let db = Database::in_memory().unwrap();
        let expense_id = db
            .create_expense(&NewExpense {
                date: NaiveDate::from_ymd_opt(2024, 9, 24).unwrap(),
                category: "hotel".into(),
                merchant: "Marriott".into(),
                amount: 500.0,
                tagged: false,
            })
            .unwrap();
        let itemizer = Itemizer::new(db, MockExtractor::with_line_items(THREE_ITEMS));

        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert_eq!(outcome.warning.as_deref(), Some("No receipts linked"));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("auto".parse::<ItemizeStrategy>().unwrap(), ItemizeStrategy::Auto);
        assert_eq!(
            "REBUILD".parse::<ItemizeStrategy>().unwrap(),
            ItemizeStrategy::Rebuild
        );
        assert!(matches!(
            "weekly".parse::<ItemizeStrategy>(),
            Err(Error::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_run_for_same_expense_rejected() {
        let (db, expense_id) = setup("Hotel", 1000.0);
        let itemizer = Itemizer::new(db, MockExtractor::with_line_items(THREE_ITEMS));

        // Simulate a run already holding the expense id
        itemizer.in_flight.lock().unwrap().insert(expense_id);

        let result = itemizer.itemize(expense_id, ItemizeStrategy::Auto).await;
        assert!(matches!(
            result,
            Err(Error::ItemizationInProgress(id)) if id == expense_id
        ));
        // The rejected caller must not release the holder's slot
        assert!(itemizer.in_flight.lock().unwrap().contains(&expense_id));

        // Once the holder finishes, the next run goes through
        itemizer.in_flight.lock().unwrap().remove(&expense_id);
        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 3);

        // A normal run releases its own slot on completion
        assert!(itemizer.in_flight.lock().unwrap().is_empty());
        assert!(itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_within_tolerance_amounts_kept_verbatim() {
        let (db, expense_id) = setup("Hotel", 900.0);
        let raw = r#"[{"description": "Room", "debit": 600}, {"description": "Tax", "debit": 300}]"#;
        let itemizer = Itemizer::new(db.clone(), MockExtractor::with_line_items(raw));

        let outcome = itemizer
            .itemize(expense_id, ItemizeStrategy::Auto)
            .await
            .unwrap();
        let amounts: Vec<f64> = outcome.items.iter().map(|i| i.amount).collect();
        assert_eq!(amounts, vec![600.0, 300.0]);
        assert_eq!(db.sum_items_for_expense(expense_id).unwrap(), 900.0);
    }
}

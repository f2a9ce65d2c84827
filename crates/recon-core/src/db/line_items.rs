//! Persisted line item operations

use rusqlite::params;

use super::{parse_stored_date, Database};
use crate::error::Result;
use crate::models::{CandidateItem, LineItem};
use crate::normalize::round2;

impl Database {
    /// Insert reconciled candidate items for an expense, preserving order
    pub fn insert_items(&self, expense_id: i64, items: &[CandidateItem]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for item in items {
            tx.execute(
                "INSERT INTO expense_items (expense_id, item_date, description, amount)
                 VALUES (?, ?, ?, ?)",
                params![
                    expense_id,
                    item.item_date.map(|d| d.to_string()),
                    item.description,
                    item.amount,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Items for an expense in insertion (id) order
    pub fn items_for_expense(&self, expense_id: i64) -> Result<Vec<LineItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, expense_id, item_date, description, amount
             FROM expense_items WHERE expense_id = ? ORDER BY id",
        )?;

        let items = stmt
            .query_map(params![expense_id], |row| {
                let date_str: Option<String> = row.get(2)?;
                Ok(LineItem {
                    id: row.get(0)?,
                    expense_id: row.get(1)?,
                    item_date: date_str.as_deref().and_then(parse_stored_date),
                    description: row.get(3)?,
                    amount: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Sum of persisted item amounts for an expense, rounded to cents
    pub fn sum_items_for_expense(&self, expense_id: i64) -> Result<f64> {
        let conn = self.conn()?;
        let sum: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM expense_items WHERE expense_id = ?",
            params![expense_id],
            |row| row.get(0),
        )?;
        Ok(round2(sum))
    }

    /// Nudge one item's amount by a drift delta
    pub fn adjust_item_amount(&self, item_id: i64, delta: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE expense_items SET amount = ROUND(amount + ?, 2) WHERE id = ?",
            params![delta, item_id],
        )?;
        Ok(())
    }

    /// Delete all items for an expense (rebuild requests)
    pub fn delete_items_for_expense(&self, expense_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM expense_items WHERE expense_id = ?",
            params![expense_id],
        )?;
        Ok(deleted)
    }
}

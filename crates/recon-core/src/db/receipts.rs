//! Receipt operations and confirmed expense links

use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{NewReceipt, Receipt, ReceiptLink};

const RECEIPT_COLUMNS: &str = "id, original_filename, stored_path, content_type,
     extracted_merchant, extracted_vendor_name, extracted_amount, extracted_date,
     extracted_service_start, extracted_service_end, status, error_message,
     content_hash, created_at";

/// SHA-256 of receipt bytes, hex encoded (for deduplication)
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

impl Database {
    /// Create a receipt
    pub fn create_receipt(&self, receipt: &NewReceipt) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO receipts (original_filename, stored_path, content_type,
             extracted_merchant, extracted_vendor_name, extracted_amount, extracted_date,
             extracted_service_start, extracted_service_end, status, error_message, content_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                receipt.original_filename,
                receipt.stored_path,
                receipt.content_type,
                receipt.extracted_merchant,
                receipt.extracted_vendor_name,
                receipt.extracted_amount,
                receipt.extracted_date,
                receipt.extracted_service_start,
                receipt.extracted_service_end,
                receipt.status.as_str(),
                receipt.error_message,
                receipt.content_hash,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get receipt by ID
    pub fn get_receipt(&self, id: i64) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts WHERE id = ?",
            RECEIPT_COLUMNS
        ))?;

        let receipt = stmt
            .query_row(params![id], |row| Self::row_to_receipt(row))
            .optional()?;

        Ok(receipt)
    }

    /// Get receipt by content hash (for deduplication)
    pub fn get_receipt_by_hash(&self, hash: &str) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts WHERE content_hash = ?",
            RECEIPT_COLUMNS
        ))?;

        let receipt = stmt
            .query_row(params![hash], |row| Self::row_to_receipt(row))
            .optional()?;

        Ok(receipt)
    }

    /// List all receipts, newest first
    pub fn list_receipts(&self) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM receipts ORDER BY created_at DESC, id DESC",
            RECEIPT_COLUMNS
        ))?;

        let receipts = stmt
            .query_map([], |row| Self::row_to_receipt(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(receipts)
    }

    /// Persist confirmed expense-receipt links
    ///
    /// Upserts each mapping; confirming the same pairing again just refreshes
    /// its score. Returns the number of links written.
    pub fn save_links(&self, links: &[ReceiptLink]) -> Result<usize> {
        let conn = self.conn()?;
        let mut saved = 0;
        for link in links {
            conn.execute(
                "INSERT OR REPLACE INTO expense_receipts (expense_id, receipt_id, match_score)
                 VALUES (?, ?, ?)",
                params![link.expense_id, link.receipt_id, link.match_score],
            )?;
            saved += 1;
        }
        info!(saved, "Saved confirmed receipt links");
        Ok(saved)
    }

    /// Receipts linked to an expense, in link order
    pub fn receipts_for_expense(&self, expense_id: i64) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.original_filename, r.stored_path, r.content_type,
                    r.extracted_merchant, r.extracted_vendor_name, r.extracted_amount,
                    r.extracted_date, r.extracted_service_start, r.extracted_service_end,
                    r.status, r.error_message, r.content_hash, r.created_at
             FROM expense_receipts er
             JOIN receipts r ON r.id = er.receipt_id
             WHERE er.expense_id = ?
             ORDER BY r.id",
        )?;

        let receipts = stmt
            .query_map(params![expense_id], |row| Self::row_to_receipt(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(receipts)
    }

    /// Remove a confirmed link
    pub fn unlink_receipt(&self, expense_id: i64, receipt_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM expense_receipts WHERE expense_id = ? AND receipt_id = ?",
            params![expense_id, receipt_id],
        )?;
        Ok(())
    }

    /// Delete a receipt and any links pointing at it
    pub fn delete_receipt(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM expense_receipts WHERE receipt_id = ?",
            params![id],
        )?;
        conn.execute("DELETE FROM receipts WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Helper to convert a row to Receipt
    fn row_to_receipt(row: &rusqlite::Row) -> rusqlite::Result<Receipt> {
        let status_str: String = row.get(10)?;
        let created_at_str: String = row.get(13)?;

        Ok(Receipt {
            id: row.get(0)?,
            original_filename: row.get(1)?,
            stored_path: row.get(2)?,
            content_type: row.get(3)?,
            extracted_merchant: row.get(4)?,
            extracted_vendor_name: row.get(5)?,
            extracted_amount: row.get(6)?,
            extracted_date: row.get(7)?,
            extracted_service_start: row.get(8)?,
            extracted_service_end: row.get(9)?,
            status: status_str.parse().unwrap_or_default(),
            error_message: row.get(11)?,
            content_hash: row.get(12)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}

//! Expense operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, parse_stored_date, Database};
use crate::error::{Error, Result};
use crate::models::{Expense, NewExpense};

impl Database {
    /// Create an expense
    pub fn create_expense(&self, expense: &NewExpense) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO expenses (date, category, merchant, amount, tagged)
             VALUES (?, ?, ?, ?, ?)",
            params![
                expense.date.to_string(),
                expense.category,
                expense.merchant,
                expense.amount,
                expense.tagged,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get expense by ID
    pub fn get_expense(&self, id: i64) -> Result<Option<Expense>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, date, category, merchant, amount, tagged, created_at
             FROM expenses WHERE id = ?",
        )?;

        let expense = stmt
            .query_row(params![id], |row| Self::row_to_expense(row))
            .optional()?;

        Ok(expense)
    }

    /// List expenses, newest first, optionally filtered by tagged state
    pub fn list_expenses(&self, tagged: Option<bool>) -> Result<Vec<Expense>> {
        let conn = self.conn()?;
        let base = "SELECT id, date, category, merchant, amount, tagged, created_at
                    FROM expenses";
        let order = " ORDER BY date DESC, id DESC";

        let expenses = match tagged {
            Some(flag) => {
                let mut stmt = conn.prepare(&format!("{} WHERE tagged = ?{}", base, order))?;
                let rows = stmt
                    .query_map(params![flag], |row| Self::row_to_expense(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!("{}{}", base, order))?;
                let rows = stmt
                    .query_map([], |row| Self::row_to_expense(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(expenses)
    }

    /// Update an expense's mutable fields
    pub fn update_expense(&self, id: i64, expense: &NewExpense) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE expenses SET date = ?, category = ?, merchant = ?, amount = ?, tagged = ?
             WHERE id = ?",
            params![
                expense.date.to_string(),
                expense.category,
                expense.merchant,
                expense.amount,
                expense.tagged,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Expense {}", id)));
        }
        Ok(())
    }

    /// Flip the tagged flag when an expense enters or leaves a report
    pub fn set_expense_tagged(&self, id: i64, tagged: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE expenses SET tagged = ? WHERE id = ?",
            params![tagged, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Expense {}", id)));
        }
        Ok(())
    }

    /// Duplicate an expense (new row, tagged reset)
    pub fn duplicate_expense(&self, id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO expenses (date, category, merchant, amount, tagged)
             SELECT date, category, merchant, amount, 0 FROM expenses WHERE id = ?",
            params![id],
        )?;
        if inserted == 0 {
            return Err(Error::NotFound(format!("Expense {}", id)));
        }
        Ok(conn.last_insert_rowid())
    }

    /// Helper to convert a row to Expense
    fn row_to_expense(row: &rusqlite::Row) -> rusqlite::Result<Expense> {
        let date_str: String = row.get(1)?;
        let created_at_str: String = row.get(6)?;

        Ok(Expense {
            id: row.get(0)?,
            date: parse_stored_date(&date_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("bad expense date: {}", date_str).into(),
                )
            })?,
            category: row.get(2)?,
            merchant: row.get(3)?,
            amount: row.get(4)?,
            tagged: row.get(5)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}

//! Recon Core Library
//!
//! Shared functionality for the travel-expense reconciliation tool:
//! - Field normalization for noisy extracted receipt data
//! - Multi-factor expense-receipt match scoring and proposal
//! - Defensive parsing of line-item provider output
//! - Proportional itemization with exact drift correction
//! - Pluggable extraction providers (OpenAI-compatible, mock)
//! - SQLite persistence for expenses, receipts, links, and line items

pub mod db;
pub mod error;
pub mod itemize;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod providers;

pub use db::{content_hash, Database};
pub use error::{Error, Result};
pub use itemize::{ItemizeOutcome, ItemizeStrategy, Itemizer};
pub use matching::{partial_ratio, propose_matches, score_match, MatchScore};
pub use models::{
    CandidateItem, Expense, ExtractionStatus, LineItem, MatchComponents, MatchProposal,
    NewExpense, NewReceipt, Receipt, ReceiptLink,
};
pub use providers::{
    ExtractionOutcome, FieldExtractor, LineItemExtractor, MockExtractor,
    OpenAICompatibleExtractor,
};

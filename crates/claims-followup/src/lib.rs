//! Follow-up worksheet processing
//!
//! Converts the daily operations worksheet into prioritized Teams events:
//! normalizes the spreadsheet rows, computes per-row alerts, and assigns
//! priority and stakeholders.

pub mod processor;
pub mod worksheet;

pub use processor::{AlertContext, WorksheetProcessor};
pub use worksheet::{
    branch_display, clean_string, format_currency, format_date, format_percent, normalize_branch,
    normalize_status, parse_date, parse_float, BatchStatus, FollowUpRow,
};

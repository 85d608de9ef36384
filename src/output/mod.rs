//! Output module for operator-facing reports
//!
//! This module handles:
//! - Rendering live coordinator status
//! - Summarizing checkpoint databases

pub mod stats;

pub use stats::{
    load_statistics, print_statistics, print_status, render_statistics, render_status,
    CrawlStatistics,
};

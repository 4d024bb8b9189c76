//! Request Debug Bar
//!
//! Request-scoped performance metrics for web applications: timers,
//! memory snapshots, query statistics, view renders and translation
//! loads, merged into one report when the request ends.
//!
//! The host feeds an [`collector::Aggregator`] through lifecycle
//! notifications or the manual API, then hands its response body to
//! [`collector::Aggregator::terminate`] to get the instrumented output.
//!
//! ## Getting Started
//!
//! ```ignore
//! use request_debugbar::collector::Aggregator;
//! use request_debugbar::utils::config::DebugBarOptions;
//!
//! let mut debugbar = Aggregator::begin(DebugBarOptions::default());
//! debugbar.start_timer("load_users");
//! debugbar.stop_timer("load_users");
//! let body = debugbar.terminate("<html>...</html>");
//! ```
//!
//! The `debugbar` CLI replays recorded request scripts and browses
//! persisted snapshots:
//!
//! ```bash
//! debugbar replay --script request.json --summary
//! debugbar list
//! ```

pub mod collector;
pub mod commands;
pub mod output;
pub mod report;
pub mod utils;

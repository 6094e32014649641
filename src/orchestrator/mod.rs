//! Orchestration of the scraper processes.
//!
//! # Submodules
//!
//! - [`process`]: PID registry plus start/stop of detached scraper processes
//! - [`status`]: process, host and log status; `status.json`
//! - [`search`]: keyword search over stored articles
//! - [`fly`]: one-off scrape of a single query through child processes

pub mod fly;
pub mod process;
pub mod search;
pub mod status;

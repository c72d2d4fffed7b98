//! qscale-metrics — per-service traffic windows.
//!
//! Turns the stream of matched access events into one `RateSample` per
//! service per averaging period.
//!
//! # Architecture
//!
//! ```text
//! ServiceTable (ServiceKey → QpsWindow, created on first event)
//!   ├── record()  ← called by ingestion lanes per matched event
//!   ├── roll_all() every second: current counter → ring bucket
//!   └── run() every avg_time seconds: sweep + sample → mpsc<RateSample>
//! ```
//!
//! QPS is per backend: `total / active_backends / period`.

pub mod sample;
pub mod table;
pub mod window;

pub use sample::RateSample;
pub use table::{RecordOutcome, ServiceTable};
pub use window::QpsWindow;

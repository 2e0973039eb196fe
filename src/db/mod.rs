// Durable time-series persistence
pub mod resample;
pub mod sqlite;

pub use resample::resample_ohlc;
pub use sqlite::SampleStore;

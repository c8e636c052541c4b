pub mod log;

pub use log::{IngestRequest, LogCreateResponse, LogRecord, LogView};

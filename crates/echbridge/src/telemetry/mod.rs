pub mod log;

pub use log::{Level, LogSink};

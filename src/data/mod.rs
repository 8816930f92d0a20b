//! Data retention: the rolling history window and the durable store
//! implementations.

pub mod store;
pub mod window;

pub use store::{CsvExporter, MemoryStore};
pub use window::{RollingWindow, WindowSample};

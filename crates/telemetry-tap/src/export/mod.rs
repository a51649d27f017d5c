pub mod har;

pub use har::{export_har, HarExport};

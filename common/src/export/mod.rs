//! Export core modules shared by the CLI sinks.

#[cfg(feature = "excel")]
pub mod excel_core;

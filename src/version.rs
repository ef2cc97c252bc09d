/// Crate version reported in startup logs and the provenance record.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

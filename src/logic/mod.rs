pub mod upsert;

pub use upsert::*;

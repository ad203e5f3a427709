pub mod common;
pub mod entity;
pub mod instance;
pub mod position;
pub mod upsert;

pub use common::*;
pub use entity::*;
pub use instance::*;
pub use position::*;
pub use upsert::*;

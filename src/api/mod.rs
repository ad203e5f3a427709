pub mod handlers;
pub mod routes;
pub mod validated_json;

pub use handlers::*;
pub use routes::*;
pub use validated_json::*;

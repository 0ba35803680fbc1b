pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod reports;
pub mod routes;

pub use routes::create_router;

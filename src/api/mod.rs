pub mod handlers;
pub mod routes;
pub mod state;
pub mod stream;
pub mod types;

pub use routes::create_router;
pub use state::AppState;

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{AdminState, build_admin_router, start_admin};

// Middleware - Axum layers shared by the router.

pub mod cors;

pub use cors::cors_layer;

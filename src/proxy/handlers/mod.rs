// API endpoint handlers.

pub mod invoke;
pub mod manage;

pub mod lifecycle;
pub mod models;

pub mod admin;
pub mod auth;
pub mod core;
pub mod lessons;
pub mod presentations;
pub mod setup;
pub mod tokens;

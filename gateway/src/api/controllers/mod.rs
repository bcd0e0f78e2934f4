pub mod auth;
pub mod user;

mod cookies;

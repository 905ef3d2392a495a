pub mod auth;
pub mod lesson_handlers;
pub mod mpesa_handlers;

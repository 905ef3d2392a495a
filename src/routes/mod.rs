pub mod auth;
pub mod lessons;
pub mod mpesa;

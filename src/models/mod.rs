pub mod lesson;
pub mod transaction;
pub mod user;

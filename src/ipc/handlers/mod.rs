pub mod core;
pub mod kitchen;
pub mod meals;
pub mod orders;
pub mod pupils;
pub mod schedules;
pub mod schools;
pub mod setup;

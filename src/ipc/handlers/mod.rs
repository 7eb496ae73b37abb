pub mod backup_exchange;
pub mod badges;
pub mod catalog;
pub mod core;
pub mod courses;
pub mod lessons;
pub mod progress;
pub mod stats;
pub mod students;

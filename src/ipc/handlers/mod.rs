pub mod analytics;
pub mod backup_exchange;
pub mod core;
pub mod grading;
pub mod moderators;
pub mod programmes;
pub mod projects;
pub mod semesters;
pub mod venues;

pub mod backup_exchange;
pub mod concessions;
pub mod core;
pub mod ledgers;
pub mod payments;
pub mod reminders;
pub mod reports;
pub mod roles;

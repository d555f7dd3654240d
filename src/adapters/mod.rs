// Adapters layer: concrete implementations of the domain ports (PayPal, SQLite, log file).

pub mod balance;
pub mod file_log;
pub mod paypal;
pub mod sqlite;

pub mod cli;
pub mod clock;
pub mod controller;
pub mod dashboard;
pub mod db;
pub mod entity;
pub mod expenses;
pub mod ledger;
pub mod migration;
pub mod notifications;
pub mod period;
pub mod registry;
pub mod reporting;
pub mod server;
pub mod users;

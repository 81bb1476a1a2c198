pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod model;
pub mod patch;
pub mod report;
pub mod rewrite;
pub mod sarif;

//! Loan intake — document understanding for loan-servicing email.

pub mod config;
pub mod error;
pub mod extract;
pub mod mail;
pub mod oracle;
pub mod pipeline;
pub mod server;

//! Reconciliation engine for mobile-money deposits, withdrawals and bonus
//! redemptions on betting platforms.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

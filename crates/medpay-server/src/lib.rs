//! MedPay Server - wallet billing and payment-gateway engine
//!
//! This crate provides the billing core of the MedPay telemedicine
//! marketplace: the wallet ledger, metered-access quotas, and the Click and
//! Payme payment protocol state machines.

pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

pub use error::AppError;
pub use routes::create_router;

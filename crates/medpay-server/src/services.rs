//! Domain services shared between the protocol routes and the client API.

pub mod billing;
pub mod gateway;
pub mod ledger;
pub mod quota;
pub mod webhook_log;

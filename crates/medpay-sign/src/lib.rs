// MedPay Sign - Authentication primitives for external payment protocols

pub mod click;
pub mod payme;

pub use click::{click_digest, verify_click_signature, ClickSignPayload};
pub use payme::verify_authorization;

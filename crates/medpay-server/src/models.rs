//! Database models for MedPay.

pub mod billing_rule;
pub mod billing_settings;
pub mod click_transaction;
pub mod doctor_view_charge;
pub mod payme_transaction;
pub mod payment;
pub mod payment_gateway;
pub mod payment_webhook;
pub mod user_profile;
pub mod wallet;
pub mod wallet_transaction;

pub use billing_rule::{BillingRule, ServiceType};
pub use billing_settings::BillingSettings;
pub use click_transaction::ClickTransaction;
pub use doctor_view_charge::{DoctorViewCharge, NewDoctorViewCharge};
pub use payme_transaction::{PaymeState, PaymeTransaction};
pub use payment::{Payment, PaymentStatus};
pub use payment_gateway::{CommissionType, GatewayKind, PaymentGateway};
pub use payment_webhook::PaymentWebhook;
pub use user_profile::{UserAccountType, UserProfile};
pub use wallet::Wallet;
pub use wallet_transaction::{NewWalletTransaction, WalletTransaction, WalletTxStatus, WalletTxType};

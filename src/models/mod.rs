pub mod booking;
pub mod payment;
pub mod provider;
pub mod review;
pub mod user;
pub mod wallet;

pub use booking::{
    Address, Booking, BookingDetails, BookingPaymentStatus, BookingStatus, Slot,
};
pub use payment::{Payment, PaymentMethod, PaymentState};
pub use provider::{Provider, Service};
pub use review::Review;
pub use user::{Role, User};
pub use wallet::{TransactionKind, WalletTransaction};

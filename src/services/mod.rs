pub mod gateway;
pub mod ledger;
pub mod notifications;
pub mod payments;
pub mod reviews;
pub mod scheduling;

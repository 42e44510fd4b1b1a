//! Transactional business operations.
//!
//! Services take a connection and do their own transaction scoping. Writes
//! that should notify someone return an [`Outcome`]; the caller emits the
//! batch only after the transaction has committed.

pub mod cart;
pub mod checkout;
pub mod inventory;
pub mod payments;
pub mod shipments;

use crate::models::CreateNotificationEntity;

#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub notifications: Vec<CreateNotificationEntity>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, notifications: Vec<CreateNotificationEntity>) -> Self {
        Self {
            value,
            notifications,
        }
    }

    pub fn silent(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}

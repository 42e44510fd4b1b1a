//! Closed status vocabularies for products, shipments, orders and payments.
//!
//! Statuses are stored as lowercase text columns; every reader and writer goes
//! through these enums so the accepted values and the allowed transitions live
//! in one place.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app_error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

impl From<ParseStatusError> for AppError {
    fn from(err: ParseStatusError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    OutOfStock,
    PendingApproval,
    Rejected,
    Deleted,
}

text_enum!(ProductStatus, "product status", {
    Available => "available",
    OutOfStock => "out_of_stock",
    PendingApproval => "pending_approval",
    Rejected => "rejected",
    Deleted => "deleted",
});

impl ProductStatus {
    /// Whether a buyer may put the product in a cart.
    pub fn is_listed(&self) -> bool {
        matches!(self, ProductStatus::Available | ProductStatus::OutOfStock)
    }
}

/// Per line-item shipping status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Received,
    Cancelled,
}

text_enum!(ShippingStatus, "shipping status", {
    Pending => "pending",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Received => "received",
    Cancelled => "cancelled",
});

/// Who is asking for a shipping status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Seller,
    Buyer,
    Admin,
}

impl ShippingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShippingStatus::Received | ShippingStatus::Cancelled)
    }

    /// Position on the seller's forward-only track.
    fn rank(&self) -> u8 {
        match self {
            ShippingStatus::Pending => 0,
            ShippingStatus::Processing => 1,
            ShippingStatus::Shipped => 2,
            ShippingStatus::Delivered => 3,
            ShippingStatus::Received => 4,
            ShippingStatus::Cancelled => 5,
        }
    }

    /// The single transition table shared by seller updates, buyer
    /// confirmations and admin moderation.
    ///
    /// Returns `Ok(false)` when `to` equals `self` and the request is a no-op.
    pub fn check_transition(&self, to: ShippingStatus, actor: Actor) -> Result<bool, AppError> {
        if self.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "line is already {self} and cannot change"
            )));
        }

        match (actor, to) {
            (Actor::Seller, ShippingStatus::Received | ShippingStatus::Cancelled) => {
                Err(AppError::BadRequest(format!(
                    "sellers cannot set a line to {to}"
                )))
            }
            (Actor::Seller, _) if to.rank() < self.rank() => Err(AppError::InvalidTransition(
                format!("cannot move a line back from {self} to {to}"),
            )),
            (Actor::Seller, _) => Ok(to != *self),
            (Actor::Buyer, ShippingStatus::Received | ShippingStatus::Cancelled) => Ok(true),
            (Actor::Buyer, _) => Err(AppError::BadRequest(
                "buyers may only mark an order received or cancelled".into(),
            )),
            (Actor::Admin, ShippingStatus::Cancelled) => Ok(true),
            (Actor::Admin, _) => Err(AppError::BadRequest(
                "admins may only cancel orders".into(),
            )),
        }
    }
}

/// Order-level status, always derived from the shipping lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Received,
    Cancelled,
}

text_enum!(OrderStatus, "order status", {
    Pending => "pending",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Received => "received",
    Cancelled => "cancelled",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Received | OrderStatus::Cancelled)
    }

    /// Rolls the per-line statuses up into one order status.
    ///
    /// Highest rule wins: unanimous cancellation, unanimous receipt, any
    /// delivery, any shipment, any processing, and finally an all-pending
    /// order is reported as processing. Unanimity is judged over the lines
    /// that are not cancelled.
    pub fn derive(lines: &[ShippingStatus]) -> OrderStatus {
        if lines.is_empty() {
            return OrderStatus::Pending;
        }

        let active: Vec<ShippingStatus> = lines
            .iter()
            .copied()
            .filter(|s| *s != ShippingStatus::Cancelled)
            .collect();

        if active.is_empty() {
            return OrderStatus::Cancelled;
        }
        if active.iter().all(|s| *s == ShippingStatus::Received) {
            return OrderStatus::Received;
        }
        if active
            .iter()
            .any(|s| matches!(s, ShippingStatus::Delivered | ShippingStatus::Received))
        {
            return OrderStatus::Delivered;
        }
        if active.contains(&ShippingStatus::Shipped) {
            return OrderStatus::Shipped;
        }
        OrderStatus::Processing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Momo,
    Vnpay,
}

text_enum!(PaymentMethod, "payment method", {
    Cod => "cod",
    Momo => "momo",
    Vnpay => "vnpay",
});

impl PaymentMethod {
    /// Methods settled through an external gateway round-trip.
    pub fn is_gateway(&self) -> bool {
        !matches!(self, PaymentMethod::Cod)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
});

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::ShippingStatus::*;
    use super::*;

    #[test]
    fn derive_matches_documented_examples() {
        assert_eq!(OrderStatus::derive(&[Shipped, Delivered]), OrderStatus::Delivered);
        assert_eq!(OrderStatus::derive(&[Pending, Pending]), OrderStatus::Processing);
        assert_eq!(OrderStatus::derive(&[Cancelled, Cancelled]), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::derive(&[Shipped, Cancelled]), OrderStatus::Shipped);
    }

    #[test]
    fn partial_delivery_reports_delivered() {
        assert_eq!(
            OrderStatus::derive(&[Pending, Processing, Delivered]),
            OrderStatus::Delivered
        );
    }

    #[test]
    fn unanimous_receipt_wins_over_delivery() {
        assert_eq!(OrderStatus::derive(&[Received, Received]), OrderStatus::Received);
        assert_eq!(OrderStatus::derive(&[Received, Cancelled]), OrderStatus::Received);
        assert_eq!(OrderStatus::derive(&[Received, Delivered]), OrderStatus::Delivered);
    }

    #[test]
    fn processing_beats_pending() {
        assert_eq!(OrderStatus::derive(&[Pending, Processing]), OrderStatus::Processing);
        assert_eq!(OrderStatus::derive(&[Pending, Cancelled]), OrderStatus::Processing);
    }

    #[test]
    fn derive_is_order_independent() {
        let a = [Cancelled, Shipped, Pending];
        let b = [Pending, Cancelled, Shipped];
        assert_eq!(OrderStatus::derive(&a), OrderStatus::derive(&b));
        assert_eq!(OrderStatus::derive(&a), OrderStatus::derive(&a));
    }

    #[test]
    fn seller_moves_forward_only() {
        assert_eq!(Pending.check_transition(Processing, Actor::Seller).ok(), Some(true));
        assert_eq!(Pending.check_transition(Shipped, Actor::Seller).ok(), Some(true));
        assert_eq!(Shipped.check_transition(Shipped, Actor::Seller).ok(), Some(false));
        assert!(matches!(
            Shipped.check_transition(Processing, Actor::Seller),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn seller_cannot_use_buyer_terminals() {
        assert!(matches!(
            Delivered.check_transition(Received, Actor::Seller),
            Err(AppError::BadRequest(_))
        ));
        assert!(Pending.check_transition(Cancelled, Actor::Seller).is_err());
    }

    #[test]
    fn terminal_lines_are_frozen() {
        assert!(Received.check_transition(Cancelled, Actor::Buyer).is_err());
        assert!(Cancelled.check_transition(Processing, Actor::Seller).is_err());
        assert!(Cancelled.check_transition(Cancelled, Actor::Admin).is_err());
    }

    #[test]
    fn buyer_only_confirms_or_cancels() {
        assert_eq!(Delivered.check_transition(Received, Actor::Buyer).ok(), Some(true));
        assert_eq!(Shipped.check_transition(Cancelled, Actor::Buyer).ok(), Some(true));
        assert!(Pending.check_transition(Shipped, Actor::Buyer).is_err());
    }

    #[test]
    fn text_round_trip_and_rejection() {
        for status in ShippingStatus::ALL {
            assert_eq!(status.as_str().parse::<ShippingStatus>().ok(), Some(*status));
        }
        let err = "teleported".parse::<ShippingStatus>().unwrap_err();
        assert_eq!(err.kind, "shipping status");
        assert!("paypal".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn payment_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentMethod::Cod.is_gateway());
        assert!(PaymentMethod::Vnpay.is_gateway());
    }
}

use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::{
    Selectable,
    prelude::{Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::status::{OrderStatus, PaymentMethod, PaymentStatus, ProductStatus, ShippingStatus};

// Products

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductEntity {
    pub id: i32,
    pub seller_id: i32,
    pub name: String,
    pub image_url: Option<String>,
    pub unit: Option<String>,
    pub price: i64,
    pub sale_price: Option<i64>,
    pub quantity: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductEntity {
    /// Price a buyer pays right now: the sale price when it undercuts the list price.
    pub fn effective_price(&self) -> i64 {
        match self.sale_price {
            Some(sale) if sale < self.price => sale,
            _ => self.price,
        }
    }

    pub fn status(&self) -> anyhow::Result<ProductStatus> {
        self.status
            .parse()
            .with_context(|| format!("Product #{} has a corrupt status", self.id))
    }
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::products)]
pub struct CreateProductEntity {
    pub seller_id: i32,
    pub name: String,
    pub image_url: Option<String>,
    pub unit: Option<String>,
    pub price: i64,
    pub sale_price: Option<i64>,
    pub quantity: i32,
    pub status: String,
}

// Carts

#[derive(Queryable, Selectable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::cart_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItemEntity {
    pub user_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct CreateCartItemEntity {
    pub user_id: i32,
    pub product_id: i32,
    pub quantity: i32,
}

// Orders

#[derive(Queryable, Serialize, Selectable, Identifiable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub buyer_id: i32,
    pub seller_id: i32,
    pub total_amount: i64,
    pub shipping_address: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderEntity {
    pub fn status(&self) -> anyhow::Result<OrderStatus> {
        self.status
            .parse()
            .with_context(|| format!("Order #{} has a corrupt status", self.id))
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderEntity {
    pub buyer_id: i32,
    pub seller_id: i32,
    pub total_amount: i64,
    pub shipping_address: String,
    pub status: String,
}

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub price_per_item: i64,
    pub product_name: String,
    pub product_image_url: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderItemEntity {
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub price_per_item: i64,
    pub product_name: String,
    pub product_image_url: Option<String>,
}

// Shipping

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::shipping_info)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ShippingInfoEntity {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub shipping_status: String,
    pub shipping_company: Option<String>,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ShippingInfoEntity {
    pub fn status(&self) -> anyhow::Result<ShippingStatus> {
        self.shipping_status.parse().with_context(|| {
            format!(
                "Shipping line ({}, {}) has a corrupt status",
                self.order_id, self.product_id
            )
        })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::shipping_info)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateShippingInfoEntity {
    pub order_id: i32,
    pub product_id: i32,
    pub shipping_status: String,
}

// Payments

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub payment_method: String,
    pub payment_status: String,
    pub amount: i64,
    pub transaction_id: Option<String>,
    pub gateway_trans_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentEntity {
    pub fn status(&self) -> anyhow::Result<PaymentStatus> {
        self.payment_status
            .parse()
            .with_context(|| format!("Payment for order #{} has a corrupt status", self.order_id))
    }

    pub fn method(&self) -> anyhow::Result<PaymentMethod> {
        self.payment_method
            .parse()
            .with_context(|| format!("Payment for order #{} has a corrupt method", self.order_id))
    }
}

#[derive(Insertable, Serialize, Deserialize, Debug)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreatePaymentEntity {
    pub order_id: i32,
    pub payment_method: String,
    pub payment_status: String,
    pub amount: i64,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

// Notifications

#[derive(Queryable, Serialize, Deserialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NotificationEntity {
    pub id: i32,
    pub user_id: i32,
    pub sender_id: Option<i32>,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub order_id: Option<i32>,
    pub product_id: Option<i32>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateNotificationEntity {
    pub user_id: i32,
    pub sender_id: Option<i32>,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub order_id: Option<i32>,
    pub product_id: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: i64, sale_price: Option<i64>) -> ProductEntity {
        ProductEntity {
            id: 1,
            seller_id: 10,
            name: "Robusta beans".into(),
            image_url: None,
            unit: Some("kg".into()),
            price,
            sale_price,
            quantity: 5,
            status: "available".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn effective_price_prefers_lower_sale_price() {
        assert_eq!(product(50_000, Some(42_000)).effective_price(), 42_000);
        assert_eq!(product(50_000, None).effective_price(), 50_000);
        assert_eq!(product(50_000, Some(50_000)).effective_price(), 50_000);
    }

    #[test]
    fn corrupt_status_is_reported() {
        let mut p = product(1_000, None);
        p.status = "archived".into();
        assert!(p.status().is_err());
    }
}

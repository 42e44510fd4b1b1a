//! Stock locking and deduction for checkout.

use std::collections::HashMap;

use chrono::Utc;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::{
    app_error::AppError, models::ProductEntity, schema::products, status::ProductStatus,
};

/// Locks the given products `FOR UPDATE` in ascending id order.
///
/// Every checkout locks through here, so two checkouts sharing products
/// always acquire their row locks in the same order.
pub async fn lock_products(
    conn: &mut AsyncPgConnection,
    ids: &[i32],
) -> Result<HashMap<i32, ProductEntity>, AppError> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let locked: Vec<ProductEntity> = products::table
        .filter(products::id.eq_any(&ids))
        .order_by(products::id.asc())
        .select(ProductEntity::as_select())
        .for_update()
        .load(conn)
        .await?;

    Ok(locked.into_iter().map(|p| (p.id, p)).collect())
}

/// A line can be bought when the product is on sale and has enough stock.
pub fn check_available(product: &ProductEntity, requested: i32) -> Result<(), AppError> {
    if product.status()? != ProductStatus::Available {
        return Err(AppError::ProductUnavailable {
            product_id: product.id,
            name: product.name.clone(),
        });
    }
    if product.quantity < requested {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            name: product.name.clone(),
            available: product.quantity,
            requested,
        });
    }
    Ok(())
}

/// Status a product ends up in once its stock is `remaining`.
pub fn status_after_deduction(current: ProductStatus, remaining: i32) -> ProductStatus {
    if remaining == 0 {
        ProductStatus::OutOfStock
    } else {
        current
    }
}

/// Deducts `quantity` from a product already locked by [`lock_products`].
pub async fn deduct_stock(
    conn: &mut AsyncPgConnection,
    product: &ProductEntity,
    quantity: i32,
) -> Result<ProductEntity, AppError> {
    check_available(product, quantity)?;
    let remaining = product.quantity - quantity;
    let status = status_after_deduction(product.status()?, remaining);

    let updated = diesel::update(products::table.find(product.id))
        .set((
            products::quantity.eq(remaining),
            products::status.eq(status.as_str()),
            products::updated_at.eq(Utc::now()),
        ))
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await?;

    Ok(updated)
}

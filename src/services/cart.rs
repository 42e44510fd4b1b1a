use anyhow::Context;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    models::{CartItemEntity, CreateCartItemEntity, ProductEntity},
    schema::{cart_items, products},
};

/// One cart line as the order splitter sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerCartLine {
    pub product_id: i32,
    pub seller_id: i32,
    pub quantity: i32,
}

/// Lines destined for a single seller's order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerGroup {
    pub seller_id: i32,
    pub lines: Vec<SellerCartLine>,
}

impl SellerGroup {
    pub fn product_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.lines.iter().map(|line| line.product_id)
    }
}

/// Groups lines by seller, keeping sellers in order of first appearance.
pub fn group_by_seller(lines: Vec<SellerCartLine>) -> Vec<SellerGroup> {
    let mut groups: Vec<SellerGroup> = Vec::new();
    for line in lines {
        match groups.iter_mut().find(|g| g.seller_id == line.seller_id) {
            Some(group) => group.lines.push(line),
            None => groups.push(SellerGroup {
                seller_id: line.seller_id,
                lines: vec![line],
            }),
        }
    }
    groups
}

/// Reads the buyer's cart and partitions it by the seller of each product.
pub async fn split_cart_by_seller(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> Result<Vec<SellerGroup>, AppError> {
    let rows: Vec<(i32, i32, i32)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::user_id.eq(user_id))
        .order_by((cart_items::added_at.asc(), cart_items::product_id.asc()))
        .select((cart_items::product_id, products::seller_id, cart_items::quantity))
        .load(conn)
        .await?;

    if rows.is_empty() {
        return Err(AppError::EmptyCart);
    }

    Ok(group_by_seller(
        rows.into_iter()
            .map(|(product_id, seller_id, quantity)| SellerCartLine {
                product_id,
                seller_id,
                quantity,
            })
            .collect(),
    ))
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CartLine {
    pub product_id: i32,
    pub seller_id: i32,
    pub name: String,
    pub image_url: Option<String>,
    pub unit: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
    pub available_quantity: i32,
    pub product_status: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CartView {
    pub user_id: i32,
    pub items: Vec<CartLine>,
    pub total_amount: i64,
}

pub async fn get_cart(conn: &mut AsyncPgConnection, user_id: i32) -> Result<CartView, AppError> {
    let rows: Vec<(CartItemEntity, ProductEntity)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::user_id.eq(user_id))
        .order_by((cart_items::added_at.asc(), cart_items::product_id.asc()))
        .select((CartItemEntity::as_select(), ProductEntity::as_select()))
        .load(conn)
        .await
        .context("Failed to load cart")?;

    let items: Vec<CartLine> = rows
        .into_iter()
        .map(|(item, product)| {
            let unit_price = product.effective_price();
            CartLine {
                product_id: item.product_id,
                seller_id: product.seller_id,
                quantity: item.quantity,
                unit_price,
                line_total: unit_price * i64::from(item.quantity),
                available_quantity: product.quantity,
                product_status: product.status,
                name: product.name,
                image_url: product.image_url,
                unit: product.unit,
            }
        })
        .collect();

    Ok(CartView {
        user_id,
        total_amount: items.iter().map(|line| line.line_total).sum(),
        items,
    })
}

async fn load_product(
    conn: &mut AsyncPgConnection,
    product_id: i32,
) -> Result<ProductEntity, AppError> {
    products::table
        .find(product_id)
        .select(ProductEntity::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Product #{product_id} not found")))
}

fn ensure_stock(product: &ProductEntity, wanted: i32) -> Result<(), AppError> {
    if !product.status()?.is_listed() {
        return Err(AppError::ProductUnavailable {
            product_id: product.id,
            name: product.name.clone(),
        });
    }
    if wanted > product.quantity {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            name: product.name.clone(),
            available: product.quantity,
            requested: wanted,
        });
    }
    Ok(())
}

/// Adds `quantity` units, merging with any existing line for the product.
pub async fn add_item(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    product_id: i32,
    quantity: i32,
) -> Result<CartItemEntity, AppError> {
    if quantity <= 0 {
        return Err(AppError::BadRequest("Quantity must be positive".into()));
    }

    conn.transaction(move |conn| {
        Box::pin(async move {
            let product = load_product(conn, product_id).await?;
            let in_cart: Option<i32> = cart_items::table
                .find((user_id, product_id))
                .select(cart_items::quantity)
                .first(conn)
                .await
                .optional()?;
            let total = in_cart.unwrap_or(0) + quantity;
            ensure_stock(&product, total)?;

            let item = diesel::insert_into(cart_items::table)
                .values(CreateCartItemEntity {
                    user_id,
                    product_id,
                    quantity: total,
                })
                .on_conflict((cart_items::user_id, cart_items::product_id))
                .do_update()
                .set(cart_items::quantity.eq(total))
                .returning(CartItemEntity::as_returning())
                .get_result(conn)
                .await?;

            Ok::<CartItemEntity, AppError>(item)
        })
    })
    .await
}

/// Sets a line's quantity; zero removes the line.
pub async fn set_quantity(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    product_id: i32,
    quantity: i32,
) -> Result<Option<CartItemEntity>, AppError> {
    if quantity < 0 {
        return Err(AppError::BadRequest("Quantity cannot be negative".into()));
    }
    if quantity == 0 {
        remove_item(conn, user_id, product_id).await?;
        return Ok(None);
    }

    conn.transaction(move |conn| {
        Box::pin(async move {
            let product = load_product(conn, product_id).await?;
            ensure_stock(&product, quantity)?;

            let item = diesel::update(cart_items::table.find((user_id, product_id)))
                .set(cart_items::quantity.eq(quantity))
                .returning(CartItemEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Product #{product_id} is not in the cart"))
                })?;

            Ok::<Option<CartItemEntity>, AppError>(Some(item))
        })
    })
    .await
}

pub async fn remove_item(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    product_id: i32,
) -> Result<(), AppError> {
    let deleted = diesel::delete(cart_items::table.find((user_id, product_id)))
        .execute(conn)
        .await
        .context("Failed to delete cart item")?;

    if deleted == 0 {
        return Err(AppError::NotFound(format!(
            "Product #{product_id} is not in the cart"
        )));
    }
    Ok(())
}

/// Empties the cart, returning how many lines were removed.
pub async fn clear(conn: &mut AsyncPgConnection, user_id: i32) -> Result<usize, AppError> {
    let deleted = diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user_id)))
        .execute(conn)
        .await?;
    Ok(deleted)
}

use std::convert::Infallible;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::NotificationEntity,
    schema::notifications,
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/notifications",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(list_notifications))
            .routes(utoipa_axum::routes!(unread_count))
            .routes(utoipa_axum::routes!(mark_read))
            .routes(utoipa_axum::routes!(delete_notification))
            .routes(utoipa_axum::routes!(stream_notifications)),
    )
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub is_read: Option<bool>,
}

impl ListQuery {
    /// `(limit, offset)` with the page clamped to sane bounds.
    fn window(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let size = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (size, (page - 1).saturating_mul(size))
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct NotificationPage {
    pub notifications: Vec<NotificationEntity>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct UnreadCount {
    pub unread_count: i64,
}

/// A user's notifications, newest first.
#[utoipa::path(
    get,
    path = "/user/{user_id}",
    tags = ["Notifications"],
    params(
        ("user_id" = i32, Path, description = "Recipient"),
        ListQuery
    ),
    responses(
        (status = 200, description = "Page of notifications", body = StdResponse<NotificationPage, String>)
    )
)]
async fn list_notifications(
    Path(user_id): Path<i32>,
    Query(query): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (limit, offset) = query.window();
    let mut page = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .select(NotificationEntity::as_select())
        .into_boxed();
    let mut count = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .count()
        .into_boxed();
    if let Some(is_read) = query.is_read {
        page = page.filter(notifications::is_read.eq(is_read));
        count = count.filter(notifications::is_read.eq(is_read));
    }

    let rows: Vec<NotificationEntity> = page
        .order_by((notifications::created_at.desc(), notifications::id.desc()))
        .limit(limit)
        .offset(offset)
        .load(conn)
        .await
        .context("Failed to get notifications")?;
    let total: i64 = count
        .get_result(conn)
        .await
        .context("Failed to count notifications")?;

    Ok(StdResponse {
        data: Some(NotificationPage {
            notifications: rows,
            total,
            page: offset / limit + 1,
            page_size: limit,
        }),
        message: Some("Get notifications successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/user/{user_id}/unread-count",
    tags = ["Notifications"],
    params(
        ("user_id" = i32, Path, description = "Recipient")
    ),
    responses(
        (status = 200, description = "Unread notifications", body = StdResponse<UnreadCount, String>)
    )
)]
async fn unread_count(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let unread_count: i64 = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .filter(notifications::is_read.eq(false))
        .count()
        .get_result(conn)
        .await
        .context("Failed to count notifications")?;

    Ok(StdResponse {
        data: Some(UnreadCount { unread_count }),
        message: Some("Get unread count successfully"),
    })
}

#[utoipa::path(
    patch,
    path = "/read/{id}",
    tags = ["Notifications"],
    params(
        ("id" = i32, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Marked as read", body = StdResponse<NotificationEntity, String>),
        (status = 404, description = "Notification not found")
    )
)]
async fn mark_read(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let notification = diesel::update(notifications::table.find(id))
        .set(notifications::is_read.eq(true))
        .returning(NotificationEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Notification #{id} not found")))?;

    Ok(StdResponse {
        data: Some(notification),
        message: Some("Notification marked as read"),
    })
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Notifications"],
    params(
        ("id" = i32, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Deleted", body = StdResponse<i32, String>),
        (status = 404, description = "Notification not found")
    )
)]
async fn delete_notification(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted = diesel::delete(notifications::table.find(id))
        .execute(conn)
        .await
        .context("Failed to delete notification")?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("Notification #{id} not found")));
    }

    Ok(StdResponse {
        data: Some(id),
        message: Some("Notification deleted"),
    })
}

/// Live push channel. Each event carries one stored notification as JSON.
#[utoipa::path(
    get,
    path = "/stream/{user_id}",
    tags = ["Notifications"],
    params(
        ("user_id" = i32, Path, description = "Recipient")
    ),
    responses(
        (status = 200, description = "Server-sent event stream", content_type = "text/event-stream")
    )
)]
async fn stream_notifications(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.hub.subscribe(user_id);
    tracing::debug!(user_id, "Notification stream opened");

    let events = stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(notification) => {
                    let event = Event::default()
                        .event("notification")
                        .id(notification.id.to_string())
                        .json_data(&notification)
                        .unwrap_or_else(|_| Event::default().event("notification"));
                    return Some((Ok(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id, skipped, "Notification stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<i64>, page_size: Option<i64>) -> ListQuery {
        ListQuery {
            page,
            page_size,
            is_read: None,
        }
    }

    #[test]
    fn window_defaults_to_first_page() {
        assert_eq!(query(None, None).window(), (10, 0));
    }

    #[test]
    fn window_clamps_bad_input() {
        assert_eq!(query(Some(0), Some(0)).window(), (1, 0));
        assert_eq!(query(Some(3), Some(1_000)).window(), (100, 200));
    }

    #[test]
    fn huge_page_saturates_instead_of_overflowing() {
        let (limit, offset) = query(Some(i64::MAX), Some(50)).window();
        assert_eq!(limit, 50);
        assert_eq!(offset, i64::MAX);
    }
}

//! Lookup and side-effect collaborators of the coupon flow: who is redeeming,
//! what the target costs, and the enrollment a course redemption creates.
//! All helpers run on the caller's connection so they can join a transaction.

use crate::error::AppResult;
use crate::models::{Course, Product, User};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

pub async fn user_by_id(conn: &mut SqliteConnection, user_id: i64) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, display_name, created_at FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(user)
}

pub async fn course_by_id(conn: &mut SqliteConnection, course_id: i64) -> AppResult<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(
        "SELECT id, title, price_cents, created_at FROM courses WHERE id = ?",
    )
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(course)
}

pub async fn product_by_id(
    conn: &mut SqliteConnection,
    product_id: i64,
) -> AppResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
        "SELECT id, seller_id, title, price_cents, created_at FROM products WHERE id = ?",
    )
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(product)
}

/// Idempotent: an already-enrolled user keeps their existing enrollment.
pub async fn create_enrollment(
    conn: &mut SqliteConnection,
    user_id: i64,
    course_id: i64,
    coupon_id: Option<i64>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO enrollments (user_id, course_id, coupon_id, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (user_id, course_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(coupon_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

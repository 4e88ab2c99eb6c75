use crate::database::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::services::catalog_service;
use crate::utils::generate_coupon_code;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

const MAX_BATCH_SIZE: u32 = 1000;

const COUPON_COLUMNS: &str = r#"
    id, code, batch_id, discount_type, value,
    course_id, product_id,
    max_uses, used_count, is_used, expires_at,
    issuer_id, last_redeemer_email,
    created_at, updated_at
"#;

/// Discount for a base price in cents. Fixed discounts are clamped to the
/// base so the final price can never go negative; a non-positive base yields
/// no discount at all.
pub fn compute_discount(discount_type: DiscountType, value: i64, base_price: i64) -> i64 {
    if base_price <= 0 {
        return 0;
    }
    match discount_type {
        DiscountType::Percentage => base_price * value / 100,
        DiscountType::Fixed => value.min(base_price),
    }
}

/// A coupon that passed validation, priced against its target.
struct Quote {
    coupon: Coupon,
    scope: CouponScope,
    base_amount: i64,
    discount: i64,
}

impl Quote {
    fn into_outcome(self, message: &str, redemption_id: Option<i64>) -> CouponOutcome {
        CouponOutcome {
            success: true,
            message: message.to_string(),
            discount: self.discount,
            discount_type: Some(self.coupon.discount_type),
            coupon_id: Some(self.coupon.id),
            coupon_type: Some(self.scope.kind().to_string()),
            redemption_id,
        }
    }
}

enum Checked {
    Usable(Quote),
    Rejected(RejectReason),
}

#[derive(Clone)]
pub struct CouponService {
    pool: DbPool,
}

impl CouponService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Mint a batch of coupons. Codes are collision-checked against the whole
    /// table before acceptance and the batch is inserted in one transaction,
    /// so a failure leaves no partial batch behind.
    pub async fn issue_coupons(
        &self,
        issuer_id: i64,
        request: IssueCouponsRequest,
    ) -> AppResult<IssueCouponsResponse> {
        let discount_type = request.discount_type.unwrap_or(DiscountType::Percentage);

        if request.count < 1 {
            return Err(AppError::ValidationError(
                "count must be at least 1".to_string(),
            ));
        }
        if request.count > MAX_BATCH_SIZE {
            return Err(AppError::ValidationError(format!(
                "count cannot exceed {MAX_BATCH_SIZE}"
            )));
        }
        if request.value <= 0 {
            return Err(AppError::ValidationError(
                "value must be positive".to_string(),
            ));
        }
        if discount_type == DiscountType::Percentage && request.value > 100 {
            return Err(AppError::ValidationError(
                "percentage value cannot exceed 100".to_string(),
            ));
        }
        let max_uses = request.max_uses.unwrap_or(1);
        if max_uses < 1 {
            return Err(AppError::ValidationError(
                "max_uses must be at least 1".to_string(),
            ));
        }
        let now = Utc::now();
        if let Some(expires_at) = request.expires_at
            && expires_at <= now
        {
            return Err(AppError::ValidationError(
                "expires_at must be in the future".to_string(),
            ));
        }
        if request.course_id.is_some() && request.product_id.is_some() {
            return Err(AppError::ValidationError(
                "course_id and product_id are mutually exclusive".to_string(),
            ));
        }
        let scope = CouponScope::from_columns(request.course_id, request.product_id)?;

        let mut tx = self.pool.begin().await?;

        // the scope target must exist before codes are minted against it
        match scope {
            CouponScope::Course(course_id) => {
                catalog_service::course_by_id(&mut tx, course_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;
            }
            CouponScope::Product(product_id) => {
                catalog_service::product_by_id(&mut tx, product_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
            }
            CouponScope::Generic => {}
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut codes: Vec<String> = Vec::with_capacity(request.count as usize);

        while codes.len() < request.count as usize {
            let candidate = generate_coupon_code();
            if codes.iter().any(|c| c == &candidate) {
                continue;
            }
            let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons WHERE code = ?")
                .bind(&candidate)
                .fetch_one(&mut *tx)
                .await?;
            if exists == 0 {
                codes.push(candidate);
            }
        }

        for code in &codes {
            sqlx::query(
                r#"
                INSERT INTO coupons (
                    code, batch_id, discount_type, value,
                    course_id, product_id,
                    max_uses, used_count, is_used, expires_at,
                    issuer_id, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)
                "#,
            )
            .bind(code)
            .bind(&batch_id)
            .bind(discount_type)
            .bind(request.value)
            .bind(request.course_id)
            .bind(request.product_id)
            .bind(max_uses)
            .bind(request.expires_at)
            .bind(issuer_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        log::info!("Issued {} coupon(s) in batch {}", codes.len(), batch_id);

        Ok(IssueCouponsResponse { batch_id, codes })
    }

    /// Issuer-scoped listing. Codes come back masked; the issue response is
    /// the only place the full codes ever appear.
    pub async fn list_coupons(
        &self,
        issuer_id: i64,
        query: &CouponQuery,
    ) -> AppResult<PaginatedResponse<CouponResponse>> {
        let params = PaginationParams::new(query.page, query.per_page);
        let offset = params.get_offset();
        let limit = params.get_limit();
        let now = Utc::now();

        let (status_filter, bind_now) = match query.status.as_deref() {
            None => ("", false),
            Some("available") => (
                " AND is_used = 0 AND used_count < max_uses AND (expires_at IS NULL OR expires_at > ?)",
                true,
            ),
            Some("used") => (" AND (is_used = 1 OR used_count >= max_uses)", false),
            Some("expired") => (" AND expires_at IS NOT NULL AND expires_at <= ?", true),
            Some(other) => {
                return Err(AppError::ValidationError(format!(
                    "Unknown status filter: {other}"
                )));
            }
        };

        let count_sql = format!("SELECT COUNT(*) FROM coupons WHERE issuer_id = ?{status_filter}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(issuer_id);
        if bind_now {
            count_query = count_query.bind(now);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE issuer_id = ?{status_filter} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, Coupon>(&list_sql).bind(issuer_id);
        if bind_now {
            list_query = list_query.bind(now);
        }
        let coupons = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items: Vec<CouponResponse> = coupons.into_iter().map(CouponResponse::from).collect();

        Ok(PaginatedResponse::new(
            items,
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(20),
            total,
        ))
    }

    /// Price a code without touching any state. Safe to call any number of
    /// times; rejections come back as a `success: false` outcome.
    pub async fn preview(&self, request: &CouponCheckRequest) -> AppResult<CouponOutcome> {
        let mut conn = self.pool.acquire().await?;
        let now = Utc::now();

        match Self::check_coupon(&mut conn, request, now).await? {
            Checked::Rejected(reason) => {
                log::warn!("Coupon preview rejected: {reason:?}");
                Ok(CouponOutcome::rejected(&reason))
            }
            Checked::Usable(quote) => Ok(quote.into_outcome("Coupon is valid.", None)),
        }
    }

    /// Commit a redemption. The usage increment re-validates inside the same
    /// transaction (conditional update), records one history row and, for
    /// course coupons, creates the enrollment in the same atomic unit.
    pub async fn redeem(
        &self,
        user_id: i64,
        request: &CouponCheckRequest,
    ) -> AppResult<CouponOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let quote = match Self::check_coupon(&mut tx, request, now).await? {
            Checked::Rejected(reason) => {
                log::warn!("Coupon redemption rejected: {reason:?}");
                return Ok(CouponOutcome::rejected(&reason));
            }
            Checked::Usable(quote) => quote,
        };

        let user = catalog_service::user_by_id(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        // guarded increment: the WHERE clause re-checks usage and expiry, so
        // two racing redemptions can never overrun max_uses
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET used_count = used_count + 1,
                is_used = CASE WHEN max_uses = 1 THEN 1 ELSE is_used END,
                last_redeemer_email = ?,
                updated_at = ?
            WHERE id = ?
              AND is_used = 0
              AND used_count < max_uses
              AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(&user.email)
        .bind(now)
        .bind(quote.coupon.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // lost a race since the check above; surfaced same as exhausted
            log::warn!(
                "Coupon {} became unusable during redemption",
                quote.coupon.id
            );
            return Ok(CouponOutcome::rejected(&RejectReason::Exhausted));
        }

        let redemption_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO coupon_redemptions (
                coupon_id, user_id, base_amount, discount_amount, coupon_kind, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(quote.coupon.id)
        .bind(user_id)
        .bind(quote.base_amount)
        .bind(quote.discount)
        .bind(quote.scope.kind())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if let CouponScope::Course(course_id) = quote.scope {
            catalog_service::create_enrollment(&mut tx, user_id, course_id, Some(quote.coupon.id), now)
                .await?;
        }

        tx.commit().await?;

        log::info!(
            "Coupon {} redeemed by user {} (discount {})",
            quote.coupon.id,
            user_id,
            quote.discount
        );

        Ok(quote.into_outcome("Coupon redeemed.", Some(redemption_id)))
    }

    /// Shared validation path of preview and redeem. Reads only. The stored
    /// scope decides the discount target; the cart hint can only reject with
    /// a clearer message, never redirect.
    async fn check_coupon(
        conn: &mut SqliteConnection,
        request: &CouponCheckRequest,
        now: DateTime<Utc>,
    ) -> AppResult<Checked> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ?");
        let coupon = sqlx::query_as::<_, Coupon>(&sql)
            .bind(&request.code)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(coupon) = coupon else {
            return Ok(Checked::Rejected(RejectReason::NotFound));
        };

        if let Err(reason) = coupon.usability(now) {
            return Ok(Checked::Rejected(reason));
        }

        let scope = coupon.scope()?;

        if let Some(cart_kind) = request.cart_kind {
            let mismatch = matches!(
                (scope, cart_kind),
                (CouponScope::Course(_), CartKind::Products)
                    | (CouponScope::Product(_), CartKind::Courses)
            );
            if mismatch {
                return Ok(Checked::Rejected(RejectReason::ScopeMismatch {
                    required: scope.kind(),
                }));
            }
        }

        let base_amount = match scope {
            CouponScope::Course(course_id) => {
                match catalog_service::course_by_id(conn, course_id).await? {
                    Some(course) => course.price_cents,
                    // target vanished out from under the coupon
                    None => return Ok(Checked::Rejected(RejectReason::NotFound)),
                }
            }
            CouponScope::Product(product_id) => {
                match catalog_service::product_by_id(conn, product_id).await? {
                    Some(product) => product.price_cents,
                    None => return Ok(Checked::Rejected(RejectReason::NotFound)),
                }
            }
            CouponScope::Generic => request.amount.ok_or_else(|| {
                AppError::ValidationError("amount is required for a generic coupon".to_string())
            })?,
        };

        let discount = compute_discount(coupon.discount_type, coupon.value, base_amount);

        Ok(Checked::Usable(Quote {
            coupon,
            scope,
            base_amount,
            discount,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashSet;

    async fn test_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_user(pool: &DbPool, email: &str) -> i64 {
        sqlx::query_scalar("INSERT INTO users (email, created_at) VALUES (?, ?) RETURNING id")
            .bind(email)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn seed_course(pool: &DbPool, title: &str, price_cents: i64) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO courses (title, price_cents, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(title)
        .bind(price_cents)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn seed_product(pool: &DbPool, seller_id: i64, title: &str, price_cents: i64) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO products (seller_id, title, price_cents, created_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(seller_id)
        .bind(title)
        .bind(price_cents)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn issue_request(count: u32, value: i64) -> IssueCouponsRequest {
        IssueCouponsRequest {
            count,
            value,
            discount_type: None,
            course_id: None,
            product_id: None,
            max_uses: None,
            expires_at: None,
        }
    }

    fn check_request(code: &str, amount: Option<i64>) -> CouponCheckRequest {
        CouponCheckRequest {
            code: code.to_string(),
            amount,
            cart_kind: None,
        }
    }

    async fn coupon_row(pool: &DbPool, code: &str) -> Coupon {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ?");
        sqlx::query_as::<_, Coupon>(&sql)
            .bind(code)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn redemption_count(pool: &DbPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM coupon_redemptions")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn percentage_discount() {
        assert_eq!(compute_discount(DiscountType::Percentage, 10, 200), 20);
        assert_eq!(compute_discount(DiscountType::Percentage, 15, 30000), 4500);
        assert_eq!(compute_discount(DiscountType::Percentage, 100, 999), 999);
    }

    #[test]
    fn fixed_discount_clamps_to_base() {
        assert_eq!(compute_discount(DiscountType::Fixed, 1000, 50), 50);
        assert_eq!(compute_discount(DiscountType::Fixed, 30, 50), 30);
    }

    #[test]
    fn non_positive_base_yields_no_discount() {
        assert_eq!(compute_discount(DiscountType::Percentage, 10, 0), 0);
        assert_eq!(compute_discount(DiscountType::Fixed, 10, -5), 0);
    }

    #[tokio::test]
    async fn issuing_fifty_coupons_mints_distinct_codes() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let response = service
            .issue_coupons(issuer, issue_request(50, 10))
            .await
            .unwrap();

        assert_eq!(response.codes.len(), 50);
        let distinct: HashSet<&String> = response.codes.iter().collect();
        assert_eq!(distinct.len(), 50);

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 50);

        let fresh: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupons WHERE used_count = 0 AND is_used = 0 AND batch_id = ?",
        )
        .bind(&response.batch_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(fresh, 50);
    }

    #[tokio::test]
    async fn issuance_rejects_bad_inputs() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let course = seed_course(&pool, "Wheel Throwing", 30000).await;
        let product = seed_product(&pool, issuer, "Stoneware Mug", 4200).await;
        let service = CouponService::new(pool.clone());

        let cases: Vec<IssueCouponsRequest> = vec![
            issue_request(0, 10),
            issue_request(1, 0),
            issue_request(1, -5),
            issue_request(1, 150), // percentage over 100
            IssueCouponsRequest {
                max_uses: Some(0),
                ..issue_request(1, 10)
            },
            IssueCouponsRequest {
                course_id: Some(course),
                product_id: Some(product),
                ..issue_request(1, 10)
            },
            IssueCouponsRequest {
                expires_at: Some(Utc::now() - Duration::hours(1)),
                ..issue_request(1, 10)
            },
        ];

        for request in cases {
            let err = service.issue_coupons(issuer, request).await.unwrap_err();
            assert!(matches!(err, AppError::ValidationError(_)), "got {err:?}");
        }

        // 150 cents is a fine fixed discount where 150 percent is not
        let ok = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    discount_type: Some(DiscountType::Fixed),
                    ..issue_request(1, 150)
                },
            )
            .await;
        assert!(ok.is_ok());

        let missing = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    course_id: Some(9999),
                    ..issue_request(1, 10)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn preview_never_mutates_state() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let course = seed_course(&pool, "Wheel Throwing", 30000).await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    course_id: Some(course),
                    ..issue_request(1, 15)
                },
            )
            .await
            .unwrap();
        let code = &issued.codes[0];

        for _ in 0..100 {
            let outcome = service.preview(&check_request(code, None)).await.unwrap();
            assert!(outcome.success);
            assert_eq!(outcome.discount, 4500);
            assert_eq!(outcome.coupon_type.as_deref(), Some("course"));
            assert!(outcome.redemption_id.is_none());
        }

        let row = coupon_row(&pool, code).await;
        assert_eq!(row.used_count, 0);
        assert!(!row.is_used);
        assert_eq!(redemption_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn course_coupon_redemption_flow() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let shopper = seed_user(&pool, "shopper@atelier.dev").await;
        let course = seed_course(&pool, "Wheel Throwing", 30000).await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    course_id: Some(course),
                    ..issue_request(1, 15)
                },
            )
            .await
            .unwrap();
        let code = &issued.codes[0];

        let preview = service.preview(&check_request(code, None)).await.unwrap();
        assert!(preview.success);
        assert_eq!(preview.discount, 4500);

        let outcome = service
            .redeem(shopper, &check_request(code, None))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.discount, 4500);
        assert_eq!(outcome.coupon_type.as_deref(), Some("course"));
        assert!(outcome.redemption_id.is_some());

        let row = coupon_row(&pool, code).await;
        assert_eq!(row.used_count, 1);
        assert!(row.is_used);
        assert_eq!(row.last_redeemer_email.as_deref(), Some("shopper@atelier.dev"));

        let enrolled: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM enrollments WHERE user_id = ? AND course_id = ?",
        )
        .bind(shopper)
        .bind(course)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(enrolled, 1);
        assert_eq!(redemption_count(&pool).await, 1);

        // a second attempt with the same code must fail, with the vague message
        let again = service
            .redeem(shopper, &check_request(code, None))
            .await
            .unwrap();
        assert!(!again.success);
        assert_eq!(again.message, RejectReason::Exhausted.user_message());
        assert_eq!(redemption_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn generic_fixed_coupon_allows_max_uses_redemptions() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    discount_type: Some(DiscountType::Fixed),
                    max_uses: Some(3),
                    ..issue_request(1, 2000)
                },
            )
            .await
            .unwrap();
        let code = &issued.codes[0];

        for i in 0..3 {
            let user = seed_user(&pool, &format!("shopper{i}@atelier.dev")).await;
            let outcome = service
                .redeem(user, &check_request(code, Some(10000)))
                .await
                .unwrap();
            assert!(outcome.success, "redemption {i} should succeed");
            assert_eq!(outcome.discount, 2000);
        }

        let fourth = seed_user(&pool, "late@atelier.dev").await;
        let outcome = service
            .redeem(fourth, &check_request(code, Some(10000)))
            .await
            .unwrap();
        assert!(!outcome.success);

        let row = coupon_row(&pool, code).await;
        assert_eq!(row.used_count, 3);
        assert_eq!(row.last_redeemer_email.as_deref(), Some("shopper2@atelier.dev"));
    }

    #[tokio::test]
    async fn expired_coupon_is_rejected_despite_unused() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(issuer, issue_request(1, 10))
            .await
            .unwrap();
        let code = &issued.codes[0];

        sqlx::query("UPDATE coupons SET expires_at = ? WHERE code = ?")
            .bind(Utc::now() - Duration::hours(1))
            .bind(code)
            .execute(&pool)
            .await
            .unwrap();

        let outcome = service
            .preview(&check_request(code, Some(5000)))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, RejectReason::Expired.user_message());

        let redeemed = service
            .redeem(issuer, &check_request(code, Some(5000)))
            .await
            .unwrap();
        assert!(!redeemed.success);
        assert_eq!(coupon_row(&pool, code).await.used_count, 0);
    }

    #[tokio::test]
    async fn generic_coupon_requires_an_amount() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(issuer, issue_request(1, 10))
            .await
            .unwrap();

        let err = service
            .preview(&check_request(&issued.codes[0], None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn unknown_code_is_rejected() {
        let pool = test_pool().await;
        seed_user(&pool, "issuer@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let outcome = service
            .preview(&check_request("NOSUCHCODE", Some(1000)))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, RejectReason::NotFound.user_message());
    }

    #[tokio::test]
    async fn cart_hint_only_shapes_the_rejection() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let course = seed_course(&pool, "Wheel Throwing", 30000).await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    course_id: Some(course),
                    ..issue_request(1, 15)
                },
            )
            .await
            .unwrap();
        let code = &issued.codes[0];

        let mismatch = service
            .preview(&CouponCheckRequest {
                code: code.clone(),
                amount: None,
                cart_kind: Some(CartKind::Products),
            })
            .await
            .unwrap();
        assert!(!mismatch.success);
        assert!(mismatch.message.contains("course"));

        // matching and mixed carts both go through on the stored scope
        for cart_kind in [CartKind::Courses, CartKind::Mixed] {
            let ok = service
                .preview(&CouponCheckRequest {
                    code: code.clone(),
                    amount: None,
                    cart_kind: Some(cart_kind),
                })
                .await
                .unwrap();
            assert!(ok.success);
            assert_eq!(ok.discount, 4500);
        }
    }

    #[tokio::test]
    async fn concurrent_redemptions_have_a_single_winner() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let issued = service
            .issue_coupons(issuer, issue_request(1, 10))
            .await
            .unwrap();
        let code = issued.codes[0].clone();

        let mut shoppers = Vec::new();
        for i in 0..8 {
            shoppers.push(seed_user(&pool, &format!("racer{i}@atelier.dev")).await);
        }

        let mut handles = Vec::new();
        for user_id in shoppers {
            let service = service.clone();
            let request = check_request(&code, Some(5000));
            handles.push(tokio::spawn(async move {
                service.redeem(user_id, &request).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.success {
                successes += 1;
            } else {
                assert_eq!(outcome.message, RejectReason::Exhausted.user_message());
            }
        }
        assert_eq!(successes, 1);

        let row = coupon_row(&pool, &code).await;
        assert_eq!(row.used_count, 1);
        assert!(row.is_used);
        assert_eq!(redemption_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn redeeming_for_an_enrolled_user_keeps_one_enrollment() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let shopper = seed_user(&pool, "shopper@atelier.dev").await;
        let course = seed_course(&pool, "Wheel Throwing", 30000).await;
        let service = CouponService::new(pool.clone());

        sqlx::query("INSERT INTO enrollments (user_id, course_id, created_at) VALUES (?, ?, ?)")
            .bind(shopper)
            .bind(course)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();

        let issued = service
            .issue_coupons(
                issuer,
                IssueCouponsRequest {
                    course_id: Some(course),
                    ..issue_request(1, 15)
                },
            )
            .await
            .unwrap();

        let outcome = service
            .redeem(shopper, &check_request(&issued.codes[0], None))
            .await
            .unwrap();
        assert!(outcome.success);

        let enrolled: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM enrollments WHERE user_id = ? AND course_id = ?",
        )
        .bind(shopper)
        .bind(course)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(enrolled, 1);
    }

    #[tokio::test]
    async fn listing_is_issuer_scoped_and_masks_codes() {
        let pool = test_pool().await;
        let alice = seed_user(&pool, "alice@atelier.dev").await;
        let bob = seed_user(&pool, "bob@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let minted = service
            .issue_coupons(alice, issue_request(3, 10))
            .await
            .unwrap();
        service
            .issue_coupons(bob, issue_request(2, 10))
            .await
            .unwrap();

        let page = service
            .list_coupons(
                alice,
                &CouponQuery {
                    page: Some(1),
                    per_page: Some(2),
                    status: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.data.len(), 2);
        for item in &page.data {
            assert!(item.code.contains('•'));
            assert!(!minted.codes.contains(&item.code));
        }

        let err = service
            .list_coupons(
                alice,
                &CouponQuery {
                    page: None,
                    per_page: None,
                    status: Some("bogus".to_string()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn status_filter_partitions_coupons() {
        let pool = test_pool().await;
        let issuer = seed_user(&pool, "issuer@atelier.dev").await;
        let shopper = seed_user(&pool, "shopper@atelier.dev").await;
        let service = CouponService::new(pool.clone());

        let minted = service
            .issue_coupons(issuer, issue_request(3, 10))
            .await
            .unwrap();

        // one redeemed, one force-expired, one left available
        service
            .redeem(shopper, &check_request(&minted.codes[0], Some(1000)))
            .await
            .unwrap();
        sqlx::query("UPDATE coupons SET expires_at = ? WHERE code = ?")
            .bind(Utc::now() - Duration::hours(1))
            .bind(&minted.codes[1])
            .execute(&pool)
            .await
            .unwrap();

        let query = |status: &str| CouponQuery {
            page: None,
            per_page: None,
            status: Some(status.to_string()),
        };

        let available = service.list_coupons(issuer, &query("available")).await.unwrap();
        assert_eq!(available.total, 1);
        let used = service.list_coupons(issuer, &query("used")).await.unwrap();
        assert_eq!(used.total, 1);
        let expired = service.list_coupons(issuer, &query("expired")).await.unwrap();
        assert_eq!(expired.total, 1);
    }
}

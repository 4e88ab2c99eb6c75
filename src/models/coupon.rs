use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl std::fmt::Display for DiscountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::Fixed => write!(f, "fixed"),
        }
    }
}

/// What a coupon's discount applies to. Stored as two nullable foreign keys,
/// but only ever handled through this enum so "both set" cannot circulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponScope {
    Course(i64),
    Product(i64),
    Generic,
}

impl CouponScope {
    pub fn from_columns(course_id: Option<i64>, product_id: Option<i64>) -> AppResult<Self> {
        match (course_id, product_id) {
            (Some(id), None) => Ok(CouponScope::Course(id)),
            (None, Some(id)) => Ok(CouponScope::Product(id)),
            (None, None) => Ok(CouponScope::Generic),
            (Some(_), Some(_)) => Err(AppError::InternalError(
                "Coupon targets both a course and a product".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CouponScope::Course(_) => "course",
            CouponScope::Product(_) => "product",
            CouponScope::Generic => "generic",
        }
    }
}

/// What the shopper's cart contains. Only used to phrase scope rejections;
/// the coupon's stored scope always decides the actual target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CartKind {
    Courses,
    Products,
    Mixed,
}

/// Expected, recoverable reasons a presented code cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NotFound,
    Exhausted,
    Expired,
    ScopeMismatch { required: &'static str },
}

impl RejectReason {
    /// Exhausted and expired deliberately share one vague message so the
    /// response does not leak coupon metadata. Scope mismatches are specific
    /// so the shopper can self-correct.
    pub fn user_message(&self) -> String {
        match self {
            RejectReason::NotFound => "Invalid code.".to_string(),
            RejectReason::Exhausted | RejectReason::Expired => {
                "This code is invalid or has expired.".to_string()
            }
            RejectReason::ScopeMismatch { required } => {
                format!("This code only applies to {required} purchases.")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub batch_id: String,
    pub discount_type: DiscountType,
    pub value: i64,
    pub course_id: Option<i64>,
    pub product_id: Option<i64>,
    pub max_uses: i64,
    pub used_count: i64,
    pub is_used: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub issuer_id: i64,
    pub last_redeemer_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Coupon {
    pub fn scope(&self) -> AppResult<CouponScope> {
        CouponScope::from_columns(self.course_id, self.product_id)
    }

    /// Usability rule: not flagged used, uses remaining, not past expiry.
    pub fn usability(&self, now: DateTime<Utc>) -> Result<(), RejectReason> {
        if self.is_used || self.used_count >= self.max_uses {
            return Err(RejectReason::Exhausted);
        }
        if let Some(expires_at) = self.expires_at
            && expires_at <= now
        {
            return Err(RejectReason::Expired);
        }
        Ok(())
    }
}

/// Codes are one-time-display secrets; listings only ever show this form.
pub fn masked_code(code: &str) -> String {
    if code.len() <= 4 {
        return "••••".to_string();
    }
    let visible: String = code.chars().take(2).collect();
    let tail: String = code.chars().skip(code.len() - 2).collect();
    format!("{}{}{}", visible, "•".repeat(code.len() - 4), tail)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CouponResponse {
    pub id: i64,
    pub code: String,
    pub batch_id: String,
    pub discount_type: DiscountType,
    pub value: i64,
    pub coupon_type: String,
    pub max_uses: i64,
    pub used_count: i64,
    pub is_used: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Coupon> for CouponResponse {
    fn from(coupon: Coupon) -> Self {
        let coupon_type = coupon
            .scope()
            .map(|s| s.kind().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            id: coupon.id,
            code: masked_code(&coupon.code),
            batch_id: coupon.batch_id,
            discount_type: coupon.discount_type,
            value: coupon.value,
            coupon_type,
            max_uses: coupon.max_uses,
            used_count: coupon.used_count,
            is_used: coupon.is_used,
            expires_at: coupon.expires_at,
            created_at: coupon.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CouponQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<String>, // available/used/expired
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IssueCouponsRequest {
    pub count: u32,
    pub value: i64, // percent points or cents, per discount_type
    pub discount_type: Option<DiscountType>,
    pub course_id: Option<i64>,
    pub product_id: Option<i64>,
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IssueCouponsQuery {
    pub format: Option<String>, // json (default) / text
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IssueCouponsResponse {
    pub batch_id: String,
    pub codes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CouponCheckRequest {
    pub code: String,
    /// Cart subtotal in cents; the base amount for generic coupons.
    pub amount: Option<i64>,
    pub cart_kind: Option<CartKind>,
}

/// Shared response of preview and redeem. Rejections come back with
/// `success: false` and a user-facing message instead of an error status.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CouponOutcome {
    pub success: bool,
    pub message: String,
    pub discount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption_id: Option<i64>,
}

impl CouponOutcome {
    pub fn rejected(reason: &RejectReason) -> Self {
        Self {
            success: false,
            message: reason.user_message(),
            discount: 0,
            discount_type: None,
            coupon_id: None,
            coupon_type: None,
            redemption_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CouponRedemption {
    pub id: i64,
    pub coupon_id: i64,
    pub user_id: i64,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub coupon_kind: String,
    pub created_at: DateTime<Utc>,
}

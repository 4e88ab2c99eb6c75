use crate::models::*;
use crate::services::CouponService;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, ResponseError, Result, web};

fn get_user_id_from_request(req: &HttpRequest) -> Option<i64> {
    req.extensions().get::<i64>().copied()
}

#[utoipa::path(
    post,
    path = "/coupons/issue",
    tag = "coupon",
    request_body = IssueCouponsRequest,
    params(
        ("format" = Option<String>, Query, description = "Response format: json (default) or text")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Batch issued", body = IssueCouponsResponse),
        (status = 400, description = "Invalid issue parameters"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn issue_coupons(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    query: web::Query<IssueCouponsQuery>,
    request: web::Json<IssueCouponsRequest>,
) -> Result<HttpResponse> {
    let issuer_id = get_user_id_from_request(&req).unwrap_or(0);

    match coupon_service
        .issue_coupons(issuer_id, request.into_inner())
        .await
    {
        Ok(response) => {
            // the issue response is the only place full codes ever appear
            if query.format.as_deref() == Some("text") {
                Ok(HttpResponse::Ok()
                    .content_type("text/plain; charset=utf-8")
                    .body(response.codes.join("\n")))
            } else {
                Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
            }
        }
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/coupons",
    tag = "coupon",
    params(
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Page size"),
        ("status" = Option<String>, Query, description = "Filter: available/used/expired")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "The caller's coupons, codes masked"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_coupons(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    query: web::Query<CouponQuery>,
) -> Result<HttpResponse> {
    let issuer_id = get_user_id_from_request(&req).unwrap_or(0);

    match coupon_service.list_coupons(issuer_id, &query).await {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/coupons/preview",
    tag = "coupon",
    request_body = CouponCheckRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Quote or rejection; never mutates state", body = CouponOutcome),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn preview_coupon(
    coupon_service: web::Data<CouponService>,
    request: web::Json<CouponCheckRequest>,
) -> Result<HttpResponse> {
    match coupon_service.preview(&request).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/coupons/redeem",
    tag = "coupon",
    request_body = CouponCheckRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Redemption committed or rejected", body = CouponOutcome),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn redeem_coupon(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    request: web::Json<CouponCheckRequest>,
) -> Result<HttpResponse> {
    let user_id = get_user_id_from_request(&req).unwrap_or(0);

    match coupon_service.redeem(user_id, &request).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn coupon_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/coupons")
            .route("", web::get().to(list_coupons))
            .route("/issue", web::post().to(issue_coupons))
            .route("/preview", web::post().to(preview_coupon))
            .route("/redeem", web::post().to(redeem_coupon)),
    );
}

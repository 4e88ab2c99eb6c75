use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        )
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::coupon::issue_coupons,
        handlers::coupon::list_coupons,
        handlers::coupon::preview_coupon,
        handlers::coupon::redeem_coupon,
    ),
    components(
        schemas(
            Coupon,
            CouponResponse,
            CouponQuery,
            IssueCouponsRequest,
            IssueCouponsQuery,
            IssueCouponsResponse,
            CouponCheckRequest,
            CouponOutcome,
            CouponRedemption,
            DiscountType,
            CartKind,
            Course,
            Product,
            Enrollment,
            User,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "coupon", description = "Coupon issue, preview and redemption API"),
    ),
    info(
        title = "Atelier Backend API",
        version = "1.0.0",
        description = "Atelier coupon service REST API documentation",
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

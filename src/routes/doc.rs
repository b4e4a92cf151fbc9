use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, PublicUser,
            ResetPasswordRequest, SignupRequest,
        },
        orders::{
            AdminOrder, AdminOrderList, OrderItemDetail, OrderList, OrderWithItems,
            PlaceOrderRequest, PlacedOrder, UpdateOrderStatusRequest,
        },
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    models::{Order, OrderItem, Product},
    response::{ApiResponse, Meta},
    routes::{auth, health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::signup,
        auth::admin_signup,
        auth::login,
        auth::forgot_password,
        auth::reset_password,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        orders::cancel_order,
        orders::list_all_orders,
        orders::update_order_status,
    ),
    components(
        schemas(
            PublicUser,
            Product,
            Order,
            OrderItem,
            SignupRequest,
            LoginRequest,
            LoginResponse,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            PlaceOrderRequest,
            PlacedOrder,
            OrderItemDetail,
            OrderWithItems,
            OrderList,
            AdminOrder,
            AdminOrderList,
            UpdateOrderStatusRequest,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<AdminOrderList>,
            ApiResponse<LoginResponse>,
            ApiResponse<PublicUser>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication and password reset"),
        (name = "Products", description = "Product catalog"),
        (name = "Orders", description = "Order placement and fulfilment"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

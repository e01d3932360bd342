use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PriceHound API",
        version = "0.1.0",
        description = "Concurrent price discovery across Italian retail sites."
    ),
    paths(
        crate::routes::search_prices,
        crate::routes::quick_search,
        crate::routes::batch_search,
        crate::routes::clear_cache,
        crate::routes::list_sources,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::SearchPricesRequest,
        crate::dto::SearchResponse,
        crate::dto::SourceResultResponse,
        crate::dto::PriceRecordResponse,
        crate::dto::BatchItemRequest,
        crate::dto::BatchSearchRequest,
        crate::dto::BatchItemResponse,
        crate::dto::BatchSearchResponse,
        crate::dto::SourceResponse,
        crate::dto::SourceListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "search", description = "Price searches and the response cache"),
        (name = "sources", description = "Known retail sources"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI document.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via PRICEHOUND_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

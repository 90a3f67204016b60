//! OpenAPI document served at `/api-docs/openapi.json`, browsable via
//! Swagger UI at `/docs` (same layout as the teacher's own gateway).

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "Portfolio Accounting API",
    version = "1.0.0",
    description = "Transaction-to-balance accounting service: batch transaction ingest, balance queries, and portfolio summaries."
))]
pub struct ApiDoc;

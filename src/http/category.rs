use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

use crate::catalog::Strategy;
use crate::category::{Category, CategoryId};
use crate::error::Error;
use crate::service::statistics::CategoryStatistics;
use crate::service::tree::CategoryNode;

#[derive(Debug, Deserialize, Serialize)]
pub struct ListCategoriesResponse {
    pub categories: Vec<Category>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CategoryResponse {
    pub category: Category,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TreeResponse {
    pub tree: Vec<CategoryNode>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatisticsResponse {
    pub statistics: CategoryStatistics,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StrategiesResponse {
    pub strategies: Vec<Strategy>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StrategyResponse {
    pub strategy: Strategy,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub category_ids: Vec<CategoryId>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TreeQuery {
    pub root: Option<CategoryId>,
    /// `any` includes archived categories.
    pub archived: Option<String>,
}

impl TreeQuery {
    pub fn include_archived(&self) -> Result<bool, Error> {
        match self.archived.as_deref() {
            None | Some("false") => Ok(false),
            Some("any") => Ok(true),
            Some(other) => Err(Error::validation(
                "archived",
                format!("expected any or false, got {other:?}"),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub rollup: bool,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StrategiesQuery {
    #[serde(default)]
    pub descendants: bool,
}

/// Body of every error response.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&Error> for ErrorBody {
    fn from(value: &Error) -> Self {
        Self {
            kind: value.kind_name().to_string(),
            message: value.to_string(),
            id: value.id().map(str::to_string),
            field: value.field().map(str::to_string),
        }
    }
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::DataIntegrity { .. }
            | Error::Database(_)
            | Error::Pool(_)
            | Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::from(self))
    }
}

pub mod server {
    use actix_web::error::{JsonPayloadError, QueryPayloadError};
    use actix_web::{web, HttpRequest};
    use log::error;

    use super::{
        AssignRequest, CategoryResponse, ListCategoriesResponse, StatisticsQuery,
        StatisticsResponse, StrategiesQuery, StrategiesResponse, StrategyResponse, TreeQuery,
        TreeResponse,
    };
    use crate::category::{CategoryPatch, NewCategory};
    use crate::error::Error;
    use crate::service::filter::{CategoryFilter, ListQuery};
    use crate::service::{CategoryService, DeleteOutcome};
    use crate::store::Store;

    type App<S> = web::Data<CategoryService<S>>;

    /// Names the field serde complained about, or `fallback` when the message does not say.
    fn payload_field(message: &str, fallback: &str) -> String {
        message
            .split_once("missing field `")
            .and_then(|(_, rest)| rest.split_once('`'))
            .map_or_else(|| fallback.to_string(), |(field, _)| field.to_string())
    }

    fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
        let message = err.to_string();
        Error::validation(payload_field(&message, "body"), message).into()
    }

    fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
        let message = err.to_string();
        Error::validation(payload_field(&message, "query"), message).into()
    }

    fn logged(err: Error) -> Error {
        if matches!(
            err,
            Error::DataIntegrity { .. } | Error::Database(_) | Error::Pool(_) | Error::Store(_)
        ) {
            error!("{err}");
        }
        err
    }

    pub async fn list_categories<S: Store + 'static>(
        app: App<S>,
        query: web::Query<ListQuery>,
    ) -> Result<web::Json<ListCategoriesResponse>, Error> {
        let filter = CategoryFilter::try_from(query.into_inner())?;
        let categories = app.list_categories(filter).await.map_err(logged)?;
        Ok(web::Json(ListCategoriesResponse { categories }))
    }

    pub async fn get_category<S: Store + 'static>(
        app: App<S>,
        path: web::Path<(String,)>,
    ) -> Result<web::Json<CategoryResponse>, Error> {
        let (id,) = path.into_inner();
        let category = app.get_category(&id).await.map_err(logged)?;
        Ok(web::Json(CategoryResponse { category }))
    }

    pub async fn create_category<S: Store + 'static>(
        app: App<S>,
        data: web::Json<NewCategory>,
    ) -> Result<web::Json<CategoryResponse>, Error> {
        let category = app
            .create_category(data.into_inner())
            .await
            .map_err(logged)?;
        Ok(web::Json(CategoryResponse { category }))
    }

    pub async fn update_category<S: Store + 'static>(
        app: App<S>,
        path: web::Path<(String,)>,
        patch: web::Json<CategoryPatch>,
    ) -> Result<web::Json<CategoryResponse>, Error> {
        let (id,) = path.into_inner();
        let category = app
            .update_category(&id, patch.into_inner())
            .await
            .map_err(logged)?;
        Ok(web::Json(CategoryResponse { category }))
    }

    pub async fn archive_category<S: Store + 'static>(
        app: App<S>,
        path: web::Path<(String,)>,
    ) -> Result<web::Json<CategoryResponse>, Error> {
        let (id,) = path.into_inner();
        let category = app.archive_category(&id).await.map_err(logged)?;
        Ok(web::Json(CategoryResponse { category }))
    }

    pub async fn delete_category<S: Store + 'static>(
        app: App<S>,
        path: web::Path<(String,)>,
    ) -> Result<web::Json<DeleteOutcome>, Error> {
        let (id,) = path.into_inner();
        let outcome = app.delete_category(&id).await.map_err(logged)?;
        Ok(web::Json(outcome))
    }

    pub async fn category_tree<S: Store + 'static>(
        app: App<S>,
        query: web::Query<TreeQuery>,
    ) -> Result<web::Json<TreeResponse>, Error> {
        let include_archived = query.include_archived()?;
        let tree = app
            .category_tree(query.root.as_deref(), include_archived)
            .await
            .map_err(logged)?;
        Ok(web::Json(TreeResponse { tree }))
    }

    pub async fn category_statistics<S: Store + 'static>(
        app: App<S>,
        query: web::Query<StatisticsQuery>,
    ) -> Result<web::Json<StatisticsResponse>, Error> {
        let statistics = app.statistics(query.rollup).await.map_err(logged)?;
        Ok(web::Json(StatisticsResponse { statistics }))
    }

    pub async fn strategies_by_category<S: Store + 'static>(
        app: App<S>,
        path: web::Path<(String,)>,
        query: web::Query<StrategiesQuery>,
    ) -> Result<web::Json<StrategiesResponse>, Error> {
        let (id,) = path.into_inner();
        let strategies = app
            .strategies_by_category(&id, query.descendants)
            .await
            .map_err(logged)?;
        Ok(web::Json(StrategiesResponse { strategies }))
    }

    pub async fn assign_strategy<S: Store + 'static>(
        app: App<S>,
        path: web::Path<(String,)>,
        req: web::Json<AssignRequest>,
    ) -> Result<web::Json<StrategyResponse>, Error> {
        let (id,) = path.into_inner();
        let strategy = app
            .assign_strategy(&id, req.into_inner().category_ids)
            .await
            .map_err(logged)?;
        Ok(web::Json(StrategyResponse { strategy }))
    }

    /// Registers every route. The fixed `/categories/tree` and `/categories/statistics` paths are
    /// added before `/categories/{id}` so they are not read as ids. Bodies and query strings that
    /// fail to parse are answered with the same JSON error body as every other failure.
    pub fn configure<S: Store + 'static>(cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::JsonConfig::default().error_handler(json_error))
            .app_data(web::QueryConfig::default().error_handler(query_error))
            .route("/categories", web::get().to(list_categories::<S>))
            .route("/categories", web::post().to(create_category::<S>))
            .route("/categories/tree", web::get().to(category_tree::<S>))
            .route(
                "/categories/statistics",
                web::get().to(category_statistics::<S>),
            )
            .route("/categories/{id}", web::get().to(get_category::<S>))
            .route("/categories/{id}", web::patch().to(update_category::<S>))
            .route("/categories/{id}", web::delete().to(delete_category::<S>))
            .route(
                "/categories/{id}/archive",
                web::post().to(archive_category::<S>),
            )
            .route(
                "/categories/{id}/strategies",
                web::get().to(strategies_by_category::<S>),
            )
            .route(
                "/strategies/{id}/categories",
                web::put().to(assign_strategy::<S>),
            );
    }
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    use super::server::configure;
    use super::{
        AssignRequest, CategoryResponse, ErrorBody, ListCategoriesResponse, StatisticsResponse,
        StrategiesResponse, StrategyResponse, TreeResponse,
    };
    use crate::catalog::NewStrategy;
    use crate::category::{CategoryPatch, NewCategory};
    use crate::service::{CategoryService, DeleteOutcome};
    use crate::store::memory::MemoryStore;
    use crate::store::StrategyStore;

    #[actix_web::test]
    async fn test_category_lifecycle() {
        let service = web::Data::new(CategoryService::new(MemoryStore::new()));
        let strategy = service
            .store()
            .create_strategy(NewStrategy::new("Turtle"))
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(service.clone())
                .configure(configure::<MemoryStore>),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/categories")
            .set_json(NewCategory::new("Trend").with_tags(["equity"]))
            .to_request();
        let root: CategoryResponse = test::call_and_read_body_json(&app, req).await;
        let root = root.category;

        let req = test::TestRequest::post()
            .uri("/categories")
            .set_json(NewCategory::new("Breakout").under(root.id.clone()))
            .to_request();
        let child: CategoryResponse = test::call_and_read_body_json(&app, req).await;
        let child = child.category;

        let req = test::TestRequest::get()
            .uri("/categories/tree")
            .to_request();
        let resp: TreeResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.tree.len() == 1);
        assert!(resp.tree[0].children[0].category.id == child.id);

        let req = test::TestRequest::put()
            .uri(format!("/strategies/{}/categories", strategy.id).as_str())
            .set_json(AssignRequest {
                category_ids: vec![child.id.clone()],
            })
            .to_request();
        let resp: StrategyResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.strategy.categories == vec![child.id.clone()]);

        let req = test::TestRequest::get()
            .uri(format!("/categories/{}/strategies?descendants=true", root.id).as_str())
            .to_request();
        let resp: StrategiesResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.strategies.len() == 1);

        let req = test::TestRequest::get()
            .uri("/categories/statistics?rollup=true")
            .to_request();
        let resp: StatisticsResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.statistics.total_categories == 2);
        assert!(resp.statistics.categories[0].strategy_count == 1);

        let req = test::TestRequest::patch()
            .uri(format!("/categories/{}", child.id).as_str())
            .set_json(CategoryPatch::rename("Channel Breakout"))
            .to_request();
        let resp: CategoryResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.category.name == "Channel Breakout");

        let req = test::TestRequest::delete()
            .uri(format!("/categories/{}", child.id).as_str())
            .to_request();
        let resp: DeleteOutcome = test::call_and_read_body_json(&app, req).await;
        assert!(resp.detached_strategies == 1);

        let req = test::TestRequest::get()
            .uri("/categories?tags=equity")
            .to_request();
        let resp: ListCategoriesResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.categories.len() == 1);
        assert!(resp.categories[0].id == root.id);
    }

    #[actix_web::test]
    async fn test_errors_map_to_status_and_body() {
        let service = web::Data::new(CategoryService::new(MemoryStore::new()));
        let app = test::init_service(
            App::new()
                .app_data(service.clone())
                .configure(configure::<MemoryStore>),
        )
        .await;

        let req = test::TestRequest::get().uri("/categories/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status() == StatusCode::NOT_FOUND);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert!(body.kind == "NotFound");
        assert!(body.id == Some("nope".to_string()));

        let req = test::TestRequest::post()
            .uri("/categories")
            .set_json(NewCategory::new(" "))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status() == StatusCode::BAD_REQUEST);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert!(body.field == Some("name".to_string()));

        let req = test::TestRequest::get()
            .uri("/categories?archived=maybe")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status() == StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/categories")
            .set_json(serde_json::json!({"description": "x"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status() == StatusCode::BAD_REQUEST);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert!(body.kind == "ValidationError");
        assert!(body.field == Some("name".to_string()));

        let req = test::TestRequest::get()
            .uri("/categories/statistics?rollup=maybe")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status() == StatusCode::BAD_REQUEST);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert!(body.kind == "ValidationError");
        assert!(body.field == Some("query".to_string()));

        let system = service
            .create_category(NewCategory::new("Seeded").system())
            .await
            .unwrap();
        let req = test::TestRequest::delete()
            .uri(format!("/categories/{}", system.id).as_str())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status() == StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri(format!("/categories/{}/archive", system.id).as_str())
            .to_request();
        let resp: CategoryResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.category.archived);
    }
}

use anyhow::{anyhow, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::catalog::Strategy;
use crate::category::{Category, CategoryId, CategoryPatch, NewCategory};
use crate::http::category::{
    AssignRequest, CategoryResponse, ErrorBody, ListCategoriesResponse, StatisticsResponse,
    StrategiesResponse, StrategyResponse, TreeResponse,
};
use crate::service::filter::ListQuery;
use crate::service::statistics::CategoryStatistics;
use crate::service::tree::CategoryNode;
use crate::service::DeleteOutcome;

/// Rust API for the category server. Non-success responses are turned into errors carrying the
/// status and the server's error body.
pub struct CategoryClient {
    pub path: String,
    client: reqwest::Client,
}

async fn read<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(anyhow!(describe(status, &body))),
        Err(_) => Err(anyhow!("{status}")),
    }
}

/// `404 Not Found NotFound (id=c1): category c1 not found`
fn describe(status: StatusCode, body: &ErrorBody) -> String {
    let mut res = format!("{status} {}", body.kind);
    match (&body.id, &body.field) {
        (Some(id), Some(field)) => res.push_str(&format!(" (id={id}, field={field})")),
        (Some(id), None) => res.push_str(&format!(" (id={id})")),
        (None, Some(field)) => res.push_str(&format!(" (field={field})")),
        (None, None) => {}
    }
    res.push_str(&format!(": {}", body.message));
    res
}

impl CategoryClient {
    pub fn new(path: String) -> Self {
        Self {
            path,
            client: reqwest::Client::new(),
        }
    }

    pub async fn list_categories(&self, query: &ListQuery) -> Result<Vec<Category>> {
        let resp = self
            .client
            .get(self.path.clone() + "/categories")
            .query(query)
            .send()
            .await?;
        Ok(read::<ListCategoriesResponse>(resp).await?.categories)
    }

    pub async fn get_category(&self, id: &str) -> Result<Category> {
        let resp = self
            .client
            .get(format!("{}/categories/{id}", self.path))
            .send()
            .await?;
        Ok(read::<CategoryResponse>(resp).await?.category)
    }

    pub async fn create_category(&self, data: &NewCategory) -> Result<Category> {
        let resp = self
            .client
            .post(self.path.clone() + "/categories")
            .json(data)
            .send()
            .await?;
        Ok(read::<CategoryResponse>(resp).await?.category)
    }

    pub async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<Category> {
        let resp = self
            .client
            .patch(format!("{}/categories/{id}", self.path))
            .json(patch)
            .send()
            .await?;
        Ok(read::<CategoryResponse>(resp).await?.category)
    }

    pub async fn archive_category(&self, id: &str) -> Result<Category> {
        let resp = self
            .client
            .post(format!("{}/categories/{id}/archive", self.path))
            .send()
            .await?;
        Ok(read::<CategoryResponse>(resp).await?.category)
    }

    pub async fn delete_category(&self, id: &str) -> Result<DeleteOutcome> {
        let resp = self
            .client
            .delete(format!("{}/categories/{id}", self.path))
            .send()
            .await?;
        read::<DeleteOutcome>(resp).await
    }

    pub async fn category_tree(
        &self,
        root: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<CategoryNode>> {
        let mut req = self.client.get(self.path.clone() + "/categories/tree");
        if let Some(root) = root {
            req = req.query(&[("root", root)]);
        }
        if include_archived {
            req = req.query(&[("archived", "any")]);
        }
        Ok(read::<TreeResponse>(req.send().await?).await?.tree)
    }

    pub async fn statistics(&self, rollup: bool) -> Result<CategoryStatistics> {
        let resp = self
            .client
            .get(self.path.clone() + "/categories/statistics")
            .query(&[("rollup", rollup)])
            .send()
            .await?;
        Ok(read::<StatisticsResponse>(resp).await?.statistics)
    }

    pub async fn strategies_by_category(
        &self,
        id: &str,
        include_descendants: bool,
    ) -> Result<Vec<Strategy>> {
        let resp = self
            .client
            .get(format!("{}/categories/{id}/strategies", self.path))
            .query(&[("descendants", include_descendants)])
            .send()
            .await?;
        Ok(read::<StrategiesResponse>(resp).await?.strategies)
    }

    pub async fn assign_strategy(
        &self,
        strategy_id: &str,
        category_ids: Vec<CategoryId>,
    ) -> Result<Strategy> {
        let resp = self
            .client
            .put(format!("{}/strategies/{strategy_id}/categories", self.path))
            .json(&AssignRequest { category_ids })
            .send()
            .await?;
        Ok(read::<StrategyResponse>(resp).await?.strategy)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::describe;
    use crate::http::category::ErrorBody;

    #[test]
    fn test_that_error_message_names_record_and_field() {
        let body = ErrorBody {
            kind: "NotFound".to_string(),
            message: "category c1 not found".to_string(),
            id: Some("c1".to_string()),
            field: None,
        };
        let message = describe(StatusCode::NOT_FOUND, &body);
        assert!(message == "404 Not Found NotFound (id=c1): category c1 not found");

        let body = ErrorBody {
            kind: "ValidationError".to_string(),
            message: "invalid name: must not be empty".to_string(),
            id: None,
            field: Some("name".to_string()),
        };
        let message = describe(StatusCode::BAD_REQUEST, &body);
        assert!(message.contains("(field=name)"));
    }
}

//! HTTP client for the review service API.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::api::{
    AssignRequest, NextReviewRequest, SubmitRequest, UpsertStaffRequest, UpsertStudentRequest,
    UpsertUnitRequest, WriteReviewRequest,
};
use crate::ids::{EvaluatorId, StepKey, StudentKey, UnitId};

/// Thin wrapper over the service's JSON endpoints.
///
/// Responses are returned as raw JSON so callers can print them unchanged.
pub struct ReviewClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ReviewClient {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            return Err(anyhow!("{} failed: {} - {}", what, status, error_text));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    async fn get(&self, path: &str, what: &str) -> Result<Value> {
        self.send(self.client.get(self.url(path)), what).await
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B, what: &str) -> Result<Value> {
        self.send(self.client.post(self.url(path)).json(body), what)
            .await
    }

    async fn put<B: Serialize>(&self, path: &str, body: &B, what: &str) -> Result<Value> {
        self.send(self.client.put(self.url(path)).json(body), what)
            .await
    }

    pub async fn put_staff(
        &self,
        user_id: &EvaluatorId,
        req: &UpsertStaffRequest,
    ) -> Result<Value> {
        self.put(&format!("/api/staff/{}", user_id), req, "upsert staff")
            .await
    }

    pub async fn put_unit(&self, unit_id: &UnitId, req: &UpsertUnitRequest) -> Result<Value> {
        self.put(&format!("/api/units/{}", unit_id), req, "upsert unit")
            .await
    }

    pub async fn put_student(
        &self,
        key: &StudentKey,
        req: &UpsertStudentRequest,
    ) -> Result<Value> {
        self.put(&format!("/api/students/{}", key), req, "upsert student")
            .await
    }

    pub async fn submit(&self, req: &SubmitRequest) -> Result<Value> {
        self.post("/api/submissions", req, "submit").await
    }

    pub async fn assign(&self, req: &AssignRequest) -> Result<Value> {
        self.post("/api/assign", req, "assign").await
    }

    pub async fn remove_step(&self, key: &StepKey) -> Result<Value> {
        self.post(&format!("/api/steps/{}/remove", key), &(), "remove step")
            .await
    }

    pub async fn expire_step(&self, key: &StepKey) -> Result<Value> {
        self.post(&format!("/api/steps/{}/expire", key), &(), "expire step")
            .await
    }

    pub async fn write_review(&self, key: &StepKey, req: &WriteReviewRequest) -> Result<Value> {
        self.post(&format!("/api/steps/{}/review", key), req, "write review")
            .await
    }

    pub async fn get_step(&self, key: &StepKey) -> Result<Value> {
        self.get(&format!("/api/steps/{}", key), "get step").await
    }

    pub async fn next_review(&self, req: &NextReviewRequest) -> Result<Value> {
        self.post("/api/reviews/next", req, "next review").await
    }

    pub async fn status(&self) -> Result<Value> {
        self.get("/status", "status").await
    }

    /// Run one of the `/cron/manual_review/*` jobs.
    pub async fn run_job(&self, job: &str) -> Result<Value> {
        self.post(&format!("/cron/manual_review/{}", job), &(), job)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ReviewClient::new(reqwest::Client::new(), "http://localhost:3000/", None);
        assert_eq!(client.url("/status"), "http://localhost:3000/status");
    }
}

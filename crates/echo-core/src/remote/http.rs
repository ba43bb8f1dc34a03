use super::api::{
    ApiTestRun, ApiTestSuite, NewTestSuite, RunRequest, SingleTestStatus, SuiteBackend,
    SuitePatch, TestSuiteDetails,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// JSON-over-HTTP client for the suite backend.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize)]
struct SingleRunEnvelope {
    status: SingleTestStatus,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> anyhow::Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} failed ({}): {}", what, status, body);
        }
        Ok(resp.json::<T>().await?)
    }

    async fn expect_ok(resp: reqwest::Response, what: &str) -> anyhow::Result<()> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} failed ({}): {}", what, status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl SuiteBackend for HttpBackend {
    async fn list_suites(&self, user_id: &str) -> anyhow::Result<Vec<ApiTestSuite>> {
        let resp = self
            .client
            .get(self.url("/test-suites"))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        Self::read(resp, "list suites").await
    }

    async fn suite_details(&self, suite_id: &str) -> anyhow::Result<TestSuiteDetails> {
        let resp = self
            .client
            .get(self.url(&format!("/test-suites/{}", suite_id)))
            .send()
            .await?;
        Self::read(resp, "suite details").await
    }

    async fn create_suite(&self, user_id: &str, suite: &NewTestSuite) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(self.url("/test-suites"))
            .query(&[("user_id", user_id)])
            .json(suite)
            .send()
            .await?;
        let created: Created = Self::read(resp, "create suite").await?;
        Ok(created.id)
    }

    async fn update_suite(&self, suite_id: &str, patch: &SuitePatch) -> anyhow::Result<()> {
        let resp = self
            .client
            .patch(self.url(&format!("/test-suites/{}", suite_id)))
            .json(patch)
            .send()
            .await?;
        Self::expect_ok(resp, "update suite").await
    }

    async fn delete_suite(&self, suite_id: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/test-suites/{}", suite_id)))
            .send()
            .await?;
        Self::expect_ok(resp, "delete suite").await
    }

    async fn run_suite(&self, suite_id: &str, request: &RunRequest) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/test-suites/{}/run", suite_id)))
            .json(request)
            .send()
            .await?;
        Self::expect_ok(resp, "run suite").await
    }

    async fn run_single(
        &self,
        case_id: &str,
        user_id: &str,
        concurrent_calls: u32,
    ) -> anyhow::Result<SingleTestStatus> {
        let resp = self
            .client
            .post(self.url(&format!("/test-cases/{}/run", case_id)))
            .json(&json!({ "user_id": user_id, "concurrent_calls": concurrent_calls }))
            .send()
            .await?;
        let env: SingleRunEnvelope = Self::read(resp, "run test case").await?;
        Ok(env.status)
    }

    async fn list_runs(&self, user_id: &str) -> anyhow::Result<Vec<ApiTestRun>> {
        let resp = self
            .client
            .get(self.url("/runs"))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        Self::read(resp, "list runs").await
    }
}

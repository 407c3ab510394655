use crate::error::{Error, Result};
use crate::node::{Node, NodePatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The remote node store the sync engine talks to. The REST client is the
/// production implementation; tests swap in an in-memory reference store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Node>>;
    async fn fetch_children(&self, parent_id: &str) -> Result<Vec<Node>>;
    async fn create(&self, node: &Node) -> Result<Node>;
    async fn update(&self, id: &str, patch: &NodePatch) -> Result<Node>;
    async fn delete(&self, id: &str) -> Result<()>;
}

pub struct RestClient {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: LoginUser,
}

#[derive(Debug, Deserialize)]
pub struct LoginUser {
    pub id: serde_json::Value,
    pub email: String,
}

impl RestClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        Err(Error::Api { status, message })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let url = format!("{}/login", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl RemoteStore for RestClient {
    async fn fetch_all(&self) -> Result<Vec<Node>> {
        let url = format!("{}/TREE_DATA", self.base_url);
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn fetch_children(&self, parent_id: &str) -> Result<Vec<Node>> {
        let url = format!("{}/TREE_DATA?parentId={parent_id}", self.base_url);
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        let resp = Self::check(resp).await?;
        let items: Vec<Node> = resp.json().await?;
        // Some servers ignore the query; filter again client-side
        Ok(items
            .into_iter()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .collect())
    }

    async fn create(&self, node: &Node) -> Result<Node> {
        let url = format!("{}/TREE_DATA", self.base_url);
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(node)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn update(&self, id: &str, patch: &NodePatch) -> Result<Node> {
        let url = format!("{}/TREE_DATA/{id}", self.base_url);
        let resp = self
            .request(reqwest::Method::PATCH, url)
            .json(patch)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/TREE_DATA/{id}", self.base_url);
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}

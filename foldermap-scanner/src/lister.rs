//! Listing folders through the Cloud Resource Manager API.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::auth::TokenSource;
use crate::error::{FetchError, Result};

pub const RESOURCE_MANAGER_URL: &str = "https://cloudresourcemanager.googleapis.com/";

/// A folder as the listing API reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedFolder {
    /// Resource name, e.g. `folders/1234`.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Resource name of the parent; absent for organizations.
    #[serde(default)]
    pub parent: String,
}

/// One page of a child listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPage {
    #[serde(default)]
    pub folders: Vec<ListedFolder>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl FolderPage {
    /// The continuation token, treating an empty token as the last page.
    pub fn continuation(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// The remote hierarchical-listing API.
#[async_trait]
pub trait FolderLister: Send + Sync {
    /// Look up a single node, used for the root of a fetch.
    async fn describe(&self, id: &str) -> Result<ListedFolder>;

    /// Fetch one page of `parent`'s direct children.
    async fn list_page(&self, parent: &str, page_token: Option<&str>) -> Result<FolderPage>;
}

#[async_trait]
impl<L: FolderLister + ?Sized> FolderLister for Arc<L> {
    async fn describe(&self, id: &str) -> Result<ListedFolder> {
        (**self).describe(id).await
    }

    async fn list_page(&self, parent: &str, page_token: Option<&str>) -> Result<FolderPage> {
        (**self).list_page(parent, page_token).await
    }
}

/// Normalize a root id: a bare number is taken to be a folder.
pub fn resource_name(id: &str) -> String {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        format!("folders/{}", id)
    } else {
        id.to_string()
    }
}

/// [`FolderLister`] backed by the Resource Manager REST API.
pub struct ResourceManagerLister {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    page_size: u32,
}

impl ResourceManagerLister {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::with_base_url(tokens, RESOURCE_MANAGER_URL)
    }

    pub fn with_base_url(tokens: Arc<dyn TokenSource>, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("foldermap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Self::with_client(client, tokens, base_url)
    }

    pub fn with_client(
        client: Client,
        tokens: Arc<dyn TokenSource>,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base(base_url)?,
            tokens,
            page_size: 100,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn get(&self, url: Url, target: &str) -> Result<Response> {
        let token = self.tokens.token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        check_status(response, target).await
    }
}

#[async_trait]
impl FolderLister for ResourceManagerLister {
    async fn describe(&self, id: &str) -> Result<ListedFolder> {
        // Organizations live in v1, folders in v2; both carry `displayName`.
        let path = if id.starts_with("organizations/") {
            format!("v1/{}", id)
        } else {
            format!("v2/{}", id)
        };
        let url = self.endpoint(&path)?;
        debug!(id = id, "Describing root");
        let response = self.get(url, id).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::DecodeError(format!("{}: {}", id, e)))
    }

    async fn list_page(&self, parent: &str, page_token: Option<&str>) -> Result<FolderPage> {
        let mut url = self.endpoint("v2/folders")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("parent", parent);
            query.append_pair("pageSize", &self.page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        debug!(parent = parent, page_token = ?page_token, "Listing folders");
        let response = self.get(url, parent).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::DecodeError(format!("{}: {}", parent, e)))
    }
}

fn parse_base(base_url: &str) -> Result<Url> {
    // A base without a trailing slash would have its last segment replaced by `join`.
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base_url, e)))
}

async fn check_status(response: Response, target: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited(target.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::StatusError {
        target: target.to_string(),
        status: status.as_u16(),
        body,
    })
}

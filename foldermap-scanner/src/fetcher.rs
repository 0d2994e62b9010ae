use crate::error::{FetchError, Result};
use crate::lister::{FolderLister, ListedFolder, resource_name};
use crate::node::{FetchConfig, Node};
use crate::retry::{RetryConfig, with_retry};
use futures::future::{BoxFuture, FutureExt, try_join_all};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Called with `(depth, id)` as each node is reached.
pub type ProgressCallback = Arc<dyn Fn(usize, &str) + Send + Sync>;

/// Builds the folder tree below a root by recursively listing children.
///
/// Sibling subtrees are expanded concurrently; the number of listing requests
/// in flight is bounded by [`FetchConfig::fan_out`]. The first failure anywhere
/// in the tree drops every other pending expansion and is returned as is.
pub struct Fetcher<L> {
    lister: L,
    config: FetchConfig,
    retry: RetryConfig,
    permits: Semaphore,
    progress_callback: Option<ProgressCallback>,
}

impl<L: FolderLister> Fetcher<L> {
    pub fn new(lister: L, config: FetchConfig) -> Self {
        let permits = Semaphore::new(config.fan_out.max(1));
        Self {
            lister,
            config,
            retry: RetryConfig::default(),
            permits,
            progress_callback: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub async fn fetch(&self, root_id: &str) -> Result<Node> {
        let root_id = resource_name(root_id);
        info!(
            "Starting fetch of {} to depth {} with fan-out {}",
            root_id, self.config.max_depth, self.config.fan_out
        );

        let lister = &self.lister;
        let id = root_id.as_str();
        let described = with_retry(&self.retry, "describe", || lister.describe(id)).await?;
        let display_name = if described.display_name.is_empty() {
            root_id.clone()
        } else {
            described.display_name
        };

        let root = Node::new(root_id, display_name, "");
        let tree = self.expand(root, 0, Vec::new()).await?;

        info!("Fetch complete. Discovered {} nodes", tree.node_count());
        Ok(tree)
    }

    /// Expand `node` (at `depth`) and everything below it. `path` holds the
    /// ids of the node's ancestors, root first.
    fn expand<'a>(
        &'a self,
        mut node: Node,
        depth: usize,
        mut path: Vec<String>,
    ) -> BoxFuture<'a, Result<Node>> {
        async move {
            if let Some(ref callback) = self.progress_callback {
                callback(depth, &node.id);
            }

            if depth >= self.config.max_depth {
                return Ok(node);
            }

            let listed = self.list_children(&node.id).await?;

            path.push(node.id.clone());
            if let Some(repeat) = listed.iter().find(|child| path.contains(&child.name)) {
                return Err(FetchError::CycleDetected {
                    id: repeat.name.clone(),
                    path,
                });
            }

            if self.config.verbose {
                info!(
                    parent = %node.id,
                    depth = depth,
                    children = listed.len(),
                    "Expanded {}",
                    node.display_name
                );
            }

            let parent_id = node.id.clone();
            let subtrees = listed.into_iter().map(|child| {
                let child_parent = if child.parent.is_empty() {
                    parent_id.clone()
                } else {
                    child.parent
                };
                let child_node = Node::new(child.name, child.display_name, child_parent);
                self.expand(child_node, depth + 1, path.clone())
            });

            node.children = try_join_all(subtrees).await?;
            Ok(node)
        }
        .boxed()
    }

    /// Drain every page of `parent`'s children. Any page failure discards the
    /// pages already read.
    async fn list_children(&self, parent: &str) -> Result<Vec<ListedFolder>> {
        let lister = &self.lister;
        let permits = &self.permits;

        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let token = page_token.as_deref();
            let page = with_retry(&self.retry, "list_page", move || async move {
                // The semaphore is never closed, so a permit is always granted.
                let _permit = permits.acquire().await.ok();
                lister.list_page(parent, token).await
            })
            .await?;

            pages += 1;
            let next = page.continuation().map(str::to_string);
            children.extend(page.folders);

            match next {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        if self.config.verbose {
            debug!(
                parent = parent,
                pages = pages,
                children = children.len(),
                "Listed children"
            );
        }

        Ok(children)
    }
}

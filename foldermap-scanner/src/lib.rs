pub mod auth;
pub mod error;
pub mod fetcher;
pub mod lister;
pub mod node;
pub mod retry;

pub use auth::{AuthError, MetadataServerToken, StaticToken, TokenSource};
pub use error::FetchError;
pub use fetcher::{Fetcher, ProgressCallback};
pub use lister::{FolderLister, FolderPage, ListedFolder, ResourceManagerLister};
pub use node::{FetchConfig, Node};
pub use retry::{RetryConfig, Retryable, with_retry};

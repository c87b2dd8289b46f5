//! OAuth client storage trait.

use async_trait::async_trait;

use super::StorageResult;
use crate::types::OAuthClient;

/// Storage for registered OAuth clients.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Finds a client by its client id.
    async fn find_by_client_id(&self, client_id: &str) -> StorageResult<Option<OAuthClient>>;

    /// Stores a newly registered client.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the client id already exists.
    async fn create(&self, client: &OAuthClient) -> StorageResult<()>;
}

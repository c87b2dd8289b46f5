//! OAuth client storage for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use carekey_auth::storage::{ClientStore, StorageResult};
use carekey_auth::types::{GrantType, OAuthClient, TokenEndpointAuthMethod};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PgPool, corrupt, db_err};

type ClientRow = (
    String,
    Option<String>,
    String,
    Vec<String>,
    Vec<String>,
    String,
    String,
    OffsetDateTime,
);

fn from_row(row: ClientRow) -> StorageResult<OAuthClient> {
    let (
        client_id,
        client_secret_hash,
        client_name,
        redirect_uris,
        grant_types,
        scope,
        auth_method,
        created_at,
    ) = row;
    let grant_types = grant_types
        .iter()
        .map(|g| g.parse::<GrantType>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt("grant_types", e))?;
    Ok(OAuthClient {
        client_id,
        client_secret_hash,
        client_name,
        redirect_uris,
        grant_types,
        scope,
        token_endpoint_auth_method: auth_method
            .parse::<TokenEndpointAuthMethod>()
            .map_err(|e| corrupt("token_endpoint_auth_method", e))?,
        created_at,
    })
}

/// PostgreSQL [`ClientStore`] over the `oauth_clients` table.
#[derive(Clone)]
pub struct PgClientStore {
    pool: Arc<PgPool>,
}

impl PgClientStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientStore for PgClientStore {
    async fn find_by_client_id(&self, client_id: &str) -> StorageResult<Option<OAuthClient>> {
        let row: Option<ClientRow> = query_as(
            r#"
            SELECT client_id, client_secret_hash, client_name, redirect_uris, grant_types,
                   scope, token_endpoint_auth_method, created_at
            FROM oauth_clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn create(&self, client: &OAuthClient) -> StorageResult<()> {
        let grant_types: Vec<&str> = client.grant_types.iter().map(GrantType::as_str).collect();
        query(
            r#"
            INSERT INTO oauth_clients (client_id, client_secret_hash, client_name, redirect_uris,
                                       grant_types, scope, token_endpoint_auth_method, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.client_secret_hash)
        .bind(&client.client_name)
        .bind(&client.redirect_uris)
        .bind(&grant_types)
        .bind(&client.scope)
        .bind(client.token_endpoint_auth_method.as_str())
        .bind(client.created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        tracing::debug!(client_id = %client.client_id, "stored oauth client");
        Ok(())
    }
}

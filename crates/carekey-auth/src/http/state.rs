//! Shared state for the HTTP handlers.

use std::sync::Arc;

use crate::AuthResult;
use crate::audit::AuditChain;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::login::LoginGuard;
use crate::mfa::{MfaChallengeManager, TotpRsVerifier};
use crate::oauth::{AuthorizationBroker, AuthorizationServerMetadata, ClientRegistry};
use crate::password::{Argon2Hasher, SecretHasher};
use crate::service::AuthService;
use crate::session::SessionManager;
use crate::storage::memory::{
    MemoryAuditLedger, MemoryClientStore, MemoryCodeStore, MemoryCredentialStore,
    MemoryRevocationStore, MemorySessionStore,
};
use crate::storage::{
    AuditLedger, AuthorizationCodeStore, ClientStore, CredentialStore, RevocationStore,
    SessionStore,
};
use crate::token::{JwtService, RevocationLedger, TokenIntrospector, TokenIssuer};

/// The six stores the identity core runs on.
#[derive(Clone)]
pub struct AuthStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub clients: Arc<dyn ClientStore>,
    pub codes: Arc<dyn AuthorizationCodeStore>,
    pub revocations: Arc<dyn RevocationStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<dyn AuditLedger>,
}

impl AuthStores {
    /// In-process stores. Nothing survives a restart.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            credentials: Arc::new(MemoryCredentialStore::new()),
            clients: Arc::new(MemoryClientStore::new()),
            codes: Arc::new(MemoryCodeStore::new()),
            revocations: Arc::new(MemoryRevocationStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            audit: Arc::new(MemoryAuditLedger::new()),
        }
    }
}

/// Everything a handler may need. Cheap to clone.
#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AuthService>,
    pub broker: Arc<AuthorizationBroker>,
    pub introspector: TokenIntrospector,
    pub issuer: Arc<TokenIssuer>,
    pub revocations: RevocationLedger,
    pub sessions: Arc<SessionManager>,
    pub audit: AuditChain,
    pub metadata: Arc<AuthorizationServerMetadata>,
}

impl AuthState {
    /// Wires every component from configuration and stores, and starts the
    /// audit writer.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the signing key cannot be loaded
    /// and `AuthError::Storage` if the audit ledger head cannot be read.
    pub async fn build(
        config: &AuthConfig,
        stores: AuthStores,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let key_pair = config
            .signing
            .key_pair()
            .map_err(|e| AuthError::configuration(format!("signing key: {e}")))?;
        let algorithm = key_pair.algorithm;
        let jwt = Arc::new(JwtService::new(key_pair, config.issuer.clone()));
        let issuer = Arc::new(TokenIssuer::new(jwt, config.tokens.clone(), clock.clone()));
        let hasher: Arc<dyn SecretHasher> = Arc::new(Argon2Hasher::new());

        let revocations = RevocationLedger::new(stores.revocations, clock.clone());
        let sessions = Arc::new(SessionManager::new(
            stores.sessions,
            &config.sessions,
            clock.clone(),
        ));

        let guard = LoginGuard::new(
            stores.credentials.clone(),
            hasher.clone(),
            config.lockout.clone(),
            clock.clone(),
        );
        let mfa = MfaChallengeManager::new(
            issuer.clone(),
            stores.credentials.clone(),
            Arc::new(TotpRsVerifier::default()),
        );
        let service = Arc::new(AuthService::new(
            stores.credentials.clone(),
            hasher.clone(),
            guard,
            mfa,
            issuer.clone(),
            revocations.clone(),
            sessions.clone(),
            &config.sessions,
            config.refresh.clone(),
            clock.clone(),
        ));

        let registry = Arc::new(ClientRegistry::new(
            stores.clients,
            hasher,
            clock.clone(),
            config.oauth.default_client_scope.clone(),
        ));
        let broker = Arc::new(AuthorizationBroker::new(
            registry,
            stores.codes,
            stores.credentials.clone(),
            issuer.clone(),
            revocations.clone(),
            config.oauth.clone(),
            config.refresh.clone(),
            clock.clone(),
        ));

        let introspector = TokenIntrospector::new(
            issuer.clone(),
            revocations.clone(),
            stores.credentials,
            clock.clone(),
        );
        let audit = AuditChain::start(stores.audit, clock).await?;
        let metadata = Arc::new(AuthorizationServerMetadata::build(&config.issuer, algorithm));

        tracing::info!(
            issuer = %config.issuer,
            algorithm = %algorithm,
            track_sessions = config.sessions.track_first_party,
            "identity core ready"
        );

        Ok(Self {
            service,
            broker,
            introspector,
            issuer,
            revocations,
            sessions,
            audit,
            metadata,
        })
    }
}

//! Integration tests against a live PostgreSQL.
//!
//! Run with:
//!
//! ```text
//! CAREKEY_TEST_DATABASE_URL=postgres://localhost/carekey_test cargo test -p carekey-auth-postgres -- --ignored
//! ```

use std::sync::Arc;

use carekey_auth::audit::{AuditChain, AuditEvent};
use carekey_auth::clock::{Clock, ManualClock};
use carekey_auth::oauth::AuthorizationCode;
use carekey_auth::session::Session;
use carekey_auth::token::{RevocationReason, RevocationRecord};
use carekey_auth::types::{GrantType, OAuthClient, Role, TokenEndpointAuthMethod, UserCredential};
use carekey_auth_postgres::PostgresAuthStorage;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

async fn storage() -> PostgresAuthStorage {
    let url = std::env::var("CAREKEY_TEST_DATABASE_URL")
        .expect("CAREKEY_TEST_DATABASE_URL must be set for ignored tests");
    let storage = PostgresAuthStorage::connect(&url, 5).await.unwrap();
    storage.run_migrations().await.unwrap();
    storage
}

fn user() -> UserCredential {
    let suffix = Uuid::new_v4().simple().to_string();
    let mut user = UserCredential::new(
        format!("Nurse.{suffix}@Example.com"),
        "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
        Role::Nurse,
    );
    user.username = Some(format!("nurse-{suffix}"));
    user
}

fn client() -> OAuthClient {
    OAuthClient {
        client_id: format!("client-{}", Uuid::new_v4()),
        client_secret_hash: None,
        client_name: "Bedside app".to_string(),
        redirect_uris: vec!["https://app.example.com/callback".to_string()],
        grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        scope: "openid patient/*.read".to_string(),
        token_endpoint_auth_method: TokenEndpointAuthMethod::None,
        created_at: OffsetDateTime::now_utc().replace_nanosecond(0).unwrap(),
    }
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_credentials_round_trip_and_lookup() {
    let stores = storage().await.stores();
    let user = user();
    stores.credentials.create(&user).await.unwrap();

    let by_email = stores
        .credentials
        .find_by_identifier(&user.email.to_lowercase())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email.id, user.id);
    assert_eq!(by_email.role, Role::Nurse);

    let by_username = stores
        .credentials
        .find_by_identifier(user.username.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_username.id, user.id);

    let err = stores.credentials.create(&user).await.unwrap_err();
    assert!(err.is_conflict());

    let locked_until = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap() + Duration::minutes(15);
    stores
        .credentials
        .update_lockout(user.id, 5, Some(locked_until))
        .await
        .unwrap();
    stores.credentials.update_role(user.id, Role::Physician).await.unwrap();
    let stored = stores.credentials.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(stored.failed_login_attempts, 5);
    assert_eq!(stored.locked_until, Some(locked_until));
    assert_eq!(stored.role, Role::Physician);

    let err = stores
        .credentials
        .update_role(Uuid::new_v4(), Role::Admin)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_concurrent_failed_logins_are_all_counted() {
    let stores = storage().await.stores();
    let user = user();
    stores.credentials.create(&user).await.unwrap();
    let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
    let lock_until = now + Duration::minutes(15);
    let id = user.id;

    let failures: Vec<_> = (0..20)
        .map(|_| {
            let credentials = stores.credentials.clone();
            tokio::spawn(async move {
                credentials
                    .record_failed_login(id, 5, now, lock_until)
                    .await
            })
        })
        .collect();
    for failure in failures {
        failure.await.unwrap().unwrap();
    }

    let stored = stores.credentials.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(stored.failed_login_attempts, 20);
    assert_eq!(stored.locked_until, Some(lock_until));

    // A lapsed lock restarts the count.
    let later = lock_until + Duration::seconds(1);
    let outcome = stores
        .credentials
        .record_failed_login(user.id, 5, later, later + Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.locked_until, None);

    stores
        .credentials
        .update_tokens_valid_after(user.id, later)
        .await
        .unwrap();
    let stored = stores.credentials.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(stored.tokens_valid_after, Some(later));
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_code_is_marked_used_exactly_once() {
    let stores = storage().await.stores();
    let client = client();
    stores.clients.create(&client).await.unwrap();
    let stored = stores
        .clients
        .find_by_client_id(&client.client_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.grant_types, client.grant_types);

    let code = AuthorizationCode::issue(
        &client.client_id,
        Uuid::new_v4(),
        "https://app.example.com/callback",
        "openid",
        OffsetDateTime::now_utc(),
        Duration::minutes(10),
    );
    stores.codes.save(&code).await.unwrap();

    let attempts = (0..8).map(|_| {
        let codes = stores.codes.clone();
        let value = code.code.clone();
        tokio::spawn(async move { codes.mark_used(&value).await.unwrap() })
    });
    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(stores.codes.find(&code.code).await.unwrap().unwrap().used);
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_revocation_is_idempotent() {
    let stores = storage().await.stores();
    let record = RevocationRecord {
        identifier: Uuid::new_v4().to_string(),
        user_id: Some(Uuid::new_v4()),
        revoked_at: OffsetDateTime::now_utc(),
        reason: RevocationReason::Logout,
    };
    assert!(!stores.revocations.is_revoked(&record.identifier).await.unwrap());
    assert!(stores.revocations.revoke(&record).await.unwrap());
    assert!(!stores.revocations.revoke(&record).await.unwrap());
    assert!(stores.revocations.is_revoked(&record.identifier).await.unwrap());
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_expired_sessions_are_swept() {
    let stores = storage().await.stores();
    let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
    let idle = Duration::minutes(15);
    let session = |last_activity: OffsetDateTime| Session {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        role: Role::Receptionist,
        address: "203.0.113.7".to_string(),
        user_agent: "test".to_string(),
        created_at: last_activity,
        last_activity,
        expires_at: last_activity + Duration::hours(8),
    };
    let live = session(now);
    let idle_out = session(now - Duration::minutes(20));
    stores.sessions.save(&live).await.unwrap();
    stores.sessions.save(&idle_out).await.unwrap();

    assert!(stores.sessions.delete_expired(now, idle).await.unwrap() >= 1);
    assert_eq!(stores.sessions.get(live.id).await.unwrap(), Some(live.clone()));
    assert!(stores.sessions.get(idle_out.id).await.unwrap().is_none());
    assert_eq!(stores.sessions.list_by_user(live.user_id).await.unwrap().len(), 1);
    assert!(stores.sessions.delete(live.id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_audit_chain_verifies_after_reload() {
    let stores = storage().await.stores();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let chain = AuditChain::start(stores.audit.clone(), clock).await.unwrap();
    for path in ["/login", "/patients/42", "/logout"] {
        chain.record(AuditEvent::builder("POST", path).status(200));
    }
    chain.flush().await;

    let report = chain.verify_ledger().await.unwrap();
    assert!(report.valid, "broken at {:?}", report.broken_at);
    assert!(report.events >= 3);

    let latest = stores.audit.latest().await.unwrap().unwrap();
    assert_eq!(latest.resource_type, "logout");
    assert!(latest.is_intact());
}

#[tokio::test]
#[ignore = "requires CAREKEY_TEST_DATABASE_URL"]
async fn test_two_processes_share_the_audit_chain() {
    let stores = storage().await.stores();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
    let before = stores.audit.list().await.unwrap().len();
    let a = AuditChain::start(stores.audit.clone(), clock.clone()).await.unwrap();
    let b = AuditChain::start(stores.audit.clone(), clock).await.unwrap();

    a.record(AuditEvent::builder("POST", "/login"));
    a.flush().await;
    for i in 0..5 {
        b.record(AuditEvent::builder("GET", format!("/patients/{i}")));
    }
    b.flush().await;

    let report = b.verify_ledger().await.unwrap();
    assert!(report.valid, "broken at {:?}", report.broken_at);
    assert_eq!(report.events, before + 6);
}

//! Full pipeline: authentication, ACL evaluation, audit trail, sessions.

use silodb::device::{DevicePool, MemoryDevice, StorageDevice};
use silodb::raid::{RaidConfig, RaidLevel};
use silodb::{AclSubject, CancelToken, ErrorKind, Permission, RoleTier, Warehouse, WarehouseConfig};
use std::sync::Arc;
use std::time::Duration;

fn mem_pool(n: usize) -> DevicePool {
    DevicePool::new(
        (0..n)
            .map(|_| Arc::new(MemoryDevice::new()) as Arc<dyn StorageDevice>)
            .collect(),
    )
    .unwrap()
}

fn open_warehouse(dir: &std::path::Path) -> Arc<Warehouse> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = WarehouseConfig::new(
        dir,
        RaidConfig::new(RaidLevel::L5, 3)
            .stripe_size(8)
            .health_check_interval(Duration::ZERO),
    )
    .admin("admin", "bootstrap-pw");
    Warehouse::open(config, mem_pool(3)).unwrap()
}

/// An explicit user ban denies even when the user's role carries
/// FullControl on the same container.
#[tokio::test]
async fn acl_ban_beats_role_grant() {
    let dir = tempfile::tempdir().unwrap();
    let wh = open_warehouse(dir.path());
    let admin = wh.login("admin", "bootstrap-pw").unwrap();

    let alice = wh
        .auth()
        .register_user("alice", "pw", RoleTier::User, vec!["admins".into()])
        .unwrap();
    let container = wh.create_container(&admin.id, "c").unwrap();
    wh.acl()
        .grant(container.id, AclSubject::User(alice.id), Permission::None)
        .unwrap();
    wh.acl()
        .grant(
            container.id,
            AclSubject::Role("admins".into()),
            Permission::FullControl,
        )
        .unwrap();

    let session = wh.login("alice", "pw").unwrap();
    let cancel = CancelToken::new();
    let manifest = wh
        .store_object(&admin.id, "c", "f.txt", b"data", &cancel)
        .await
        .unwrap();
    let err = wh
        .fetch_object(&session.id, "c", manifest.id, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);
}

/// The bootstrap public container grants Read to everyone via
/// `Role:Everyone`, but nothing more.
#[tokio::test]
async fn public_container_is_world_readable() {
    let dir = tempfile::tempdir().unwrap();
    let wh = open_warehouse(dir.path());
    let admin = wh.login("admin", "bootstrap-pw").unwrap();
    let cancel = CancelToken::new();

    let manifest = wh
        .store_object(&admin.id, "public", "motd.txt", b"welcome", &cancel)
        .await
        .unwrap();

    wh.auth()
        .register_user("stranger", "pw", RoleTier::User, vec![])
        .unwrap();
    let stranger = wh.login("stranger", "pw").unwrap();
    let (_m, bytes) = wh
        .fetch_object(&stranger.id, "public", manifest.id, &cancel)
        .await
        .unwrap();
    assert_eq!(bytes, b"welcome");

    let err = wh
        .store_object(&stranger.id, "public", "graffiti", b"!", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);
}

/// Sessions expire: validation past the TTL returns nothing and removes the
/// entry from the store.
#[tokio::test]
async fn session_expiry_removes_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = WarehouseConfig::new(
        dir.path(),
        RaidConfig::new(RaidLevel::L5, 3).health_check_interval(Duration::ZERO),
    )
    .admin("admin", "bootstrap-pw")
    .session_ttl(Duration::ZERO);
    let wh = Warehouse::open(config, mem_pool(3)).unwrap();

    let session = wh.login("admin", "bootstrap-pw").unwrap();
    assert!(wh.auth().validate_session(&session.id).is_none());
    assert_eq!(wh.auth().sessions().len(), 0);
}

/// Both allow and deny outcomes land in the audit log, and the log is
/// queryable by failure flag.
#[tokio::test]
async fn audit_records_allow_and_deny() {
    let dir = tempfile::tempdir().unwrap();
    let wh = open_warehouse(dir.path());
    let admin = wh.login("admin", "bootstrap-pw").unwrap();
    let cancel = CancelToken::new();

    wh.create_container(&admin.id, "c").unwrap();
    wh.store_object(&admin.id, "c", "a.txt", b"1", &cancel)
        .await
        .unwrap();

    wh.auth()
        .register_user("viewer", "pw", RoleTier::ReadOnly, vec![])
        .unwrap();
    let viewer = wh.login("viewer", "pw").unwrap();
    let _ = wh
        .store_object(&viewer.id, "c", "b.txt", b"2", &cancel)
        .await
        .unwrap_err();

    wh.audit().flush().await.unwrap();
    let all = wh
        .audit()
        .query(&silodb::audit::AuditQuery::default())
        .await
        .unwrap();
    assert!(all.iter().any(|e| e.action == "store_object" && e.success));

    let denies = wh
        .audit()
        .query(&silodb::audit::AuditQuery {
            failures_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!denies.is_empty());
    assert!(denies.iter().all(|e| !e.success));
}

/// API keys authenticate as `api:<name>` and revocation is immediate for
/// new logins while sparing issued sessions.
#[tokio::test]
async fn api_key_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let wh = open_warehouse(dir.path());
    let admin_user = wh.auth().user_by_name("admin").unwrap();
    let key = wh
        .auth()
        .create_api_key("ingest", admin_user.id, RoleTier::User, None)
        .unwrap();
    assert!(key.secret.starts_with("sk_"));

    let session = wh.login_api_key(&key.secret).unwrap();
    assert_eq!(session.username, "api:ingest");

    wh.auth().api_keys().revoke(key.id).unwrap();
    assert!(wh.login_api_key(&key.secret).is_err());
    assert!(wh.auth().validate_session(&session.id).is_some());
}

/// Account lockout after five consecutive failures, cleared by admin
/// reactivation.
#[tokio::test]
async fn lockout_and_reactivate() {
    let dir = tempfile::tempdir().unwrap();
    let wh = open_warehouse(dir.path());
    let user = wh
        .auth()
        .register_user("bob", "right", RoleTier::User, vec![])
        .unwrap();

    for _ in 0..5 {
        assert!(wh.login("bob", "wrong").is_err());
    }
    assert!(wh.login("bob", "right").is_err());

    wh.auth().reactivate(user.id).unwrap();
    wh.login("bob", "right").unwrap();
}

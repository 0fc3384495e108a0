//! Sync with a peer reached through the host and the HTTP transport.

use pairsync_engine::{
    HttpTransport, LoopbackClient, PeerTransport, RemoteSyncClient, RetryConfig, SyncConfig,
    SyncEngine, SyncError,
};
use pairsync_server::{ServerConfig, SyncServer};
use pairsync_testkit::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

type RemotePeer = RemoteSyncClient<HttpTransport<LoopbackClient<Arc<SyncServer>>>>;

fn remote(host: &Arc<SyncServer>, device_id: Uuid) -> RemotePeer {
    let transport = HttpTransport::new(
        "http://host.invalid",
        device_id,
        LoopbackClient::new(Arc::clone(host)),
    );
    RemoteSyncClient::new("remote", transport)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pairsync=debug")
        .with_test_writer()
        .try_init();
}

fn host(server: &TestPeer, config: ServerConfig) -> Arc<SyncServer> {
    Arc::new(SyncServer::new(config, server.peer.clone()))
}

#[test]
fn sync_through_the_host() {
    init_tracing();
    let client = TestPeer::new("client");
    let server = TestPeer::builder("server").id_sequence(100, 1).build();
    let home = client.insert(Address::new("1 Main St", "Springfield", client.now()));
    client.insert(Person::new("Ann", &home, client.now()));
    server.insert(LogEvent::new("info", "host started", server.now()));

    let host = host(&server, ServerConfig::default());
    let engine = SyncEngine::new(
        SyncConfig::default(),
        client.peer.clone(),
        remote(&host, Uuid::new_v4()),
    );

    let result = engine.sync().unwrap();
    assert!(result.is_clean());
    assert_eq!(result.server_statistics.changes_applied, 2);
    assert_converged(&client, &server);
    assert_eq!(host.session_count(), 0);
    assert_eq!(server.peer.session_count(), 0);

    let again = engine.sync().unwrap();
    assert_eq!(again.server_statistics.changes_applied, 0);
}

#[test]
fn authenticated_device() {
    let client = TestPeer::new("client");
    let server = TestPeer::new("server");
    client.insert(Address::new("1 Main St", "Springfield", client.now()));

    let secret = b"integration-secret-32-bytes-long".to_vec();
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), Uuid::new_v4()).with_auth(secret);
    let host = host(&server, config);
    let device = Uuid::new_v4();

    let anonymous = SyncEngine::new(
        SyncConfig::new().with_retry(RetryConfig::no_retry()),
        client.peer.clone(),
        remote(&host, device),
    );
    let err = anonymous.sync_with_retry().unwrap_err();
    assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
    assert_eq!(server.count::<Address>(), 0);

    let token = host.create_token(device).unwrap();
    let transport = HttpTransport::new(
        "http://host.invalid",
        device,
        LoopbackClient::new(Arc::clone(&host)),
    )
    .with_token(token);
    let engine = SyncEngine::new(
        SyncConfig::default(),
        client.peer.clone(),
        RemoteSyncClient::new("remote", transport),
    );
    engine.sync().unwrap();
    assert_converged(&client, &server);
}

#[test]
fn closed_transport_fails_fast() {
    let client = TestPeer::new("client");
    let server = TestPeer::new("server");
    let host = host(&server, ServerConfig::default());
    let peer = remote(&host, Uuid::new_v4());
    peer.transport().close().unwrap();

    let engine = SyncEngine::new(SyncConfig::default(), client.peer.clone(), peer);
    let err = engine.sync().unwrap_err();
    assert!(matches!(err, SyncError::NotConnected));
    assert_eq!(client.peer.session_count(), 0);
    assert!(engine.stats().last_error.is_some());
}

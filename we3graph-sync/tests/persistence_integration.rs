//! The command log survives a server restart.

use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::Duration;
use we3graph_core::{EntityId, Mutation, Point3};
use we3graph_sync::{
    Credentials, LocalTransport, Permission, ServerConfig, ServiceClient, Session, SessionConfig,
    StopMode, SyncEvent, SyncServer,
};

fn persistent_server(dir: &TempDir) -> SyncServer {
    let config = ServerConfig {
        storage_path: Some(dir.path().join("log")),
        ..ServerConfig::for_testing("127.0.0.1:0")
    };
    SyncServer::new(config).unwrap()
}

async fn session(server: &SyncServer, user_id: u64) -> Session<LocalTransport> {
    let transport = Arc::new(LocalTransport::new(server.service().clone()));
    Session::start(SessionConfig::for_testing(user_id, 3), transport)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_log_survives_restart() {
    let dir = TempDir::new().unwrap();

    let (v1, v2, first_client) = {
        let server = persistent_server(&dir);
        let s = session(&server, 1).await;
        let v1 = s.add_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let v2 = s.add_vertex(Point3::new(1.0, 1.0, 1.0)).unwrap();
        s.connect(v1, v2).unwrap();
        s.move_vertex(v1, Point3::new(3.0, 0.0, 0.0)).unwrap();
        s.move_vertex(v1, Point3::new(4.0, 0.0, 0.0)).unwrap();
        let client = s.client_id();
        assert!(s.stop(StopMode::Drain(Duration::from_secs(5))).await);
        (v1, v2, client)
    };

    let server = persistent_server(&dir);
    let log = server.service().log();
    assert_eq!(log.last_sequence(3).unwrap(), 5);
    assert_eq!(log.read(3, 0, 100, false).unwrap().len(), 4);
    assert_eq!(log.read(3, 0, 100, true).unwrap().len(), 5);
    assert!(log.client(first_client).is_some());

    // New clients never reuse an id handed out before the restart
    let mut s = session(&server, 2).await;
    assert!(s.client_id() > first_client);

    let mut events = s.take_event_rx().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(events.recv().await, Some(SyncEvent::GraphLoaded)) {}
    })
    .await
    .unwrap();
    s.with_graph(|g| {
        assert_eq!(g.vertex(v1).unwrap().position, Point3::new(4.0, 0.0, 0.0));
        assert!(g.are_connected(v1, v2));
    });

    // Compaction still applies to rows written before the restart
    s.move_vertex(v1, Point3::new(5.0, 0.0, 0.0)).unwrap();
    assert!(s.stop(StopMode::Drain(Duration::from_secs(5))).await);
    let effective = log.read(3, 0, 100, false).unwrap();
    let moves: Vec<_> = effective.iter().filter(|r| r.name == "MoveVertex").collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].sequence, 6);
    assert_eq!(moves[0].params[1], "5");
}

#[tokio::test]
async fn test_resend_after_restart_is_acknowledged_with_original_id() {
    let dir = TempDir::new().unwrap();
    let credentials = Credentials {
        user_id: 1,
        who_token: "user-1".into(),
        graph_id: 4,
    };
    let command = Mutation::InsertVertex {
        id: EntityId::new(1, 1),
        position: Point3::new(1.0, 2.0, 3.0),
    }
    .encode();
    let client = |server: &SyncServer| {
        ServiceClient::new(
            Arc::new(LocalTransport::new(server.service().clone())),
            credentials.clone(),
            Duration::from_secs(2),
        )
    };

    let (client_id, first) = {
        let server = persistent_server(&dir);
        let service = client(&server);
        let token = service.create_graph_access_token(Permission::Write).await.unwrap();
        let client_id = service.create_client("resender", &token).await.unwrap();
        let command = command.clone().with_client(client_id);
        let first = service
            .post_command(client_id, &token, &command, Some(1))
            .await
            .unwrap();
        assert!(first.appended);
        (client_id, first)
    };

    // The acknowledgement was lost; the client resends after the restart
    let server = persistent_server(&dir);
    let service = client(&server);
    let token = service.create_graph_access_token(Permission::Write).await.unwrap();
    let command = command.with_client(client_id);
    let resend = service
        .post_command(client_id, &token, &command, Some(1))
        .await
        .unwrap();
    assert!(!resend.appended);
    assert_eq!(resend.id, first.id);
    assert_ne!(resend.id, 0);
    assert_eq!(server.service().log().read(4, 0, 100, true).unwrap().len(), 1);
}

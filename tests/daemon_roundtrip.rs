//! Daemon and client talking over a real Unix socket.

mod util;

use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use content_search::daemon::{
    DaemonClientConfig, DaemonConfig, DaemonError, SearchDaemon, UdsDaemonClient,
};
use content_search::model::types::ContentType;
use content_search::service::{SearchRequest, SuggestRequest};
use util::{ContentFixture, catalog_entry, post_front_matter};

fn site() -> ContentFixture {
    ContentFixture::new()
        .root("blog", ContentType::Blog)
        .page(
            "blog/launch.md",
            &post_front_matter("Hushh Vault", "2024-05-01"),
            "We shipped the vault today.",
        )
        .catalog(vec![catalog_entry(
            "vault-pro",
            "The Vault Pro Bundle",
            "Everything in the vault",
        )])
}

fn start(fixture: &ContentFixture, max_connections: usize) -> (SearchDaemon, JoinHandle<()>) {
    let socket = fixture.path().join("run").join("csearch.sock");
    let config = DaemonConfig {
        socket_path: socket,
        max_connections,
        request_timeout: Duration::from_secs(5),
        warm_on_start: true,
    };
    let daemon = SearchDaemon::new(config, fixture.service());
    let runner = daemon.clone();
    let handle = thread::spawn(move || runner.run().expect("daemon run"));
    (daemon, handle)
}

fn client(socket: &Path) -> UdsDaemonClient {
    UdsDaemonClient::new(DaemonClientConfig {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        ..DaemonClientConfig::with_socket(socket)
    })
}

#[test]
fn search_suggest_status_and_shutdown() {
    let fixture = site();
    let (daemon, handle) = start(&fixture, 4);
    let client = client(&daemon.config().socket_path);

    let health = client.health().expect("health");
    assert!(health.ready);

    let search = client
        .search(SearchRequest {
            query: "hushh vault".into(),
            ..SearchRequest::default()
        })
        .expect("search");
    assert!(search.success);
    assert_eq!(search.results[0].id, "blog-launch");
    assert_eq!(search.index_size, 2);

    let filtered = client
        .search(SearchRequest {
            query: "vault".into(),
            content_type: Some(ContentType::Product),
            limit: Some(5),
        })
        .expect("filtered search");
    assert_eq!(filtered.results.len(), 1);
    assert_eq!(filtered.results[0].id, "vault-pro");

    let suggest = client
        .suggest(SuggestRequest {
            query: "vau".into(),
            limit: None,
        })
        .expect("suggest");
    assert_eq!(suggest.suggestions[0], "Hushh Vault");

    let status = client.status().expect("status");
    assert_eq!(status.index_size, 2);
    assert!(status.built_at.is_some());

    let health = client.health().expect("health again");
    assert!(health.total_requests >= 5);

    client.shutdown().expect("shutdown");
    handle.join().expect("daemon thread");
    assert!(daemon.is_shutting_down());
    assert!(!daemon.config().socket_path.exists());
}

#[test]
fn rebuild_over_the_socket_picks_up_new_content() {
    let fixture = site();
    let (daemon, handle) = start(&fixture, 4);
    let client = client(&daemon.config().socket_path);

    let before = client
        .search(SearchRequest {
            query: "roadmap".into(),
            ..SearchRequest::default()
        })
        .expect("search");
    assert!(before.results.is_empty());

    let fixture = fixture.page("blog/roadmap.md", "title: Roadmap", "What comes next.");
    let rebuild = client.rebuild().expect("rebuild");
    assert!(rebuild.success);
    assert_eq!(rebuild.count, 3);

    let after = client
        .search(SearchRequest {
            query: "roadmap".into(),
            ..SearchRequest::default()
        })
        .expect("search");
    assert_eq!(after.results[0].id, "blog-roadmap");

    client.shutdown().expect("shutdown");
    handle.join().expect("daemon thread");
    drop(fixture);
}

#[test]
fn extra_connections_are_rejected_as_overloaded() {
    let fixture = site();
    let (daemon, handle) = start(&fixture, 1);
    let first = client(&daemon.config().socket_path);
    first.health().expect("first connection");

    let second = client(&daemon.config().socket_path);
    match second.health() {
        Err(DaemonError::Overloaded { retry_after, .. }) => {
            assert_eq!(retry_after, Some(Duration::from_millis(250)));
        }
        other => panic!("expected overloaded, got {other:?}"),
    }

    first.shutdown().expect("shutdown");
    handle.join().expect("daemon thread");
}

#[test]
fn missing_daemon_is_unavailable() {
    let fixture = ContentFixture::new();
    let client = UdsDaemonClient::new(DaemonClientConfig {
        connect_timeout: Duration::from_millis(100),
        ..DaemonClientConfig::with_socket(fixture.path().join("absent.sock"))
    });
    assert!(matches!(client.health(), Err(DaemonError::Unavailable(_))));
}

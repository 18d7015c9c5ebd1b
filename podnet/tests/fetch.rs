use std::time::Duration;

use podnet::{FetchError, FetchSettings, HttpFetcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::{
    matchers::{header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(FetchSettings {
        max_redirects: 3,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        ..FetchSettings::default()
    })
    .unwrap()
}

#[tokio::test]
async fn streams_a_successful_body() {
    let server = MockServer::start().await;
    let body = vec![7u8; 100_000];
    Mock::given(method("GET"))
        .and(path("/episode.mp3"))
        .and(header_exists("user-agent"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .insert_header("content-type", "audio/mpeg"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/episode.mp3", server.uri());
    let mut stream = fetcher().fetch(&url).await.unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.content_type(), Some("audio/mpeg"));
    assert_eq!(stream.content_length(), Some(body.len() as u64));

    let monitor = stream.monitor();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, body);
    assert_eq!(monitor.bytes_received(), body.len() as u64);
    assert!(monitor.failure().is_none());

    assert!(!monitor.is_closed());
    drop(stream);
    assert!(monitor.is_closed());
}

#[tokio::test]
async fn non_success_status_is_rejected_before_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.xml"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let url = format!("{}/missing.xml", server.uri());
    let err = fetcher().fetch(&url).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Status {
            url: url.clone(),
            status_code: 404
        }
    );

    // Les erreurs rapportent l'URL sans les espaces autour
    let err = fetcher().fetch(&format!("  {url}\n")).await.unwrap_err();
    assert_eq!(err, FetchError::Status { url, status_code: 404 });
}

#[tokio::test]
async fn redirects_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/new", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let mut stream = fetcher()
        .fetch(&format!("{}/old", server.uri()))
        .await
        .unwrap();
    assert!(stream.url().ends_with("/new"));

    let mut text = String::new();
    stream.read_to_string(&mut text).await.unwrap();
    assert_eq!(text, "moved");
}

#[tokio::test]
async fn redirect_loops_stop_at_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", format!("{}/loop", server.uri())),
        )
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&format!("{}/loop", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport { .. }), "{err:?}");
}

#[tokio::test]
async fn invalid_urls_never_reach_the_network() {
    let err = fetcher().fetch("gopher://example.com/feed").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl { .. }));
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher()
        .fetch(&format!("http://{addr}/feed.xml"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport { .. }), "{err:?}");
}

#[tokio::test]
async fn body_cut_short_is_recorded_by_the_monitor() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: audio/mpeg\r\ncontent-length: 5000\r\n\r\n")
            .await
            .unwrap();
        socket.write_all(&[1u8; 1000]).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let url = format!("http://{addr}/cut.mp3");
    let mut stream = fetcher().fetch(&url).await.unwrap();
    let monitor = stream.monitor();

    let mut received = Vec::new();
    let err = stream.read_to_end(&mut received).await.unwrap_err();

    let fetch_err = FetchError::from_io_error(&err).expect("transport error inside io::Error");
    assert!(matches!(fetch_err, FetchError::Transport { .. }));
    assert_eq!(monitor.failure(), Some(fetch_err));
    assert_eq!(monitor.bytes_received(), 1000);
}

#[tokio::test]
async fn closed_stream_refuses_reads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("data"))
        .mount(&server)
        .await;

    let mut stream = fetcher().fetch(&server.uri()).await.unwrap();
    let monitor = stream.monitor();
    stream.close();
    assert!(monitor.is_closed());

    let mut buf = [0u8; 4];
    let err = stream.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}

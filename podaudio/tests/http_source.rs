use std::sync::Arc;
use std::time::Duration;

use podaudio::{AudioError, AudioPipelineNode, AudioSegment, HttpSource};
use podnet::{FetchError, FetchSettings, HttpFetcher};
use poddecode::DecodeError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const STEREO_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
const FRAME_LEN: usize = 417;
const SAMPLES_PER_FRAME: usize = 1152;

fn mp3_frames(count: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(count * FRAME_LEN);
    for _ in 0..count {
        data.extend_from_slice(&STEREO_HEADER);
        data.resize(data.len() + FRAME_LEN - STEREO_HEADER.len(), 0);
    }
    data
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(FetchSettings {
        read_timeout: Duration::from_secs(5),
        ..FetchSettings::default()
    })
    .unwrap()
}

/// Nœud de test qui collecte tous les segments et les envoie à un channel de test
struct TestCollectorNode {
    input_tx: mpsc::Sender<Arc<AudioSegment>>,
    input_rx: mpsc::Receiver<Arc<AudioSegment>>,
    output_tx: mpsc::UnboundedSender<Arc<AudioSegment>>,
}

impl TestCollectorNode {
    fn new(output_tx: mpsc::UnboundedSender<Arc<AudioSegment>>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(16);
        Self {
            input_tx,
            input_rx,
            output_tx,
        }
    }
}

#[async_trait::async_trait]
impl AudioPipelineNode for TestCollectorNode {
    fn get_tx(&self) -> Option<mpsc::Sender<Arc<AudioSegment>>> {
        Some(self.input_tx.clone())
    }

    fn register(&mut self, _child: Box<dyn AudioPipelineNode>) {
        panic!("TestCollectorNode is a sink and cannot have children");
    }

    async fn run(mut self: Box<Self>, stop_token: CancellationToken) -> Result<(), AudioError> {
        drop(self.input_tx);
        loop {
            let segment = tokio::select! {
                segment = self.input_rx.recv() => segment,
                _ = stop_token.cancelled() => return Ok(()),
            };
            let Some(segment) = segment else { return Ok(()) };
            let end = segment.is_end_of_stream();
            if self.output_tx.send(segment).is_err() || end {
                return Ok(());
            }
        }
    }
}

async fn run_collected(url: &str, chunk_frames: usize) -> (Result<(), AudioError>, Vec<Arc<AudioSegment>>) {
    let mut source = HttpSource::with_chunk_size(fetcher(), url, chunk_frames);
    let (tx, mut rx) = mpsc::unbounded_channel();
    source.register(Box::new(TestCollectorNode::new(tx)));

    let result = tokio::time::timeout(Duration::from_secs(10), Box::new(source).run(CancellationToken::new()))
        .await
        .expect("pipeline should finish");
    let mut segments = Vec::new();
    while let Ok(segment) = rx.try_recv() {
        segments.push(segment);
    }
    (result, segments)
}

#[test]
fn source_keeps_its_parameters() {
    let source = HttpSource::with_chunk_size(fetcher(), "http://example.com/a.mp3", 1024);
    assert_eq!(source.get_url(), "http://example.com/a.mp3");
    assert_eq!(source.get_chunk_frames(), 1024);
    assert_eq!(HttpSource::new(fetcher(), "http://example.com/a.mp3").get_chunk_frames(), 0);
}

#[tokio::test]
async fn downloads_and_decodes_an_episode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/episode.mp3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(mp3_frames(40))
                .insert_header("content-type", "audio/mpeg"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (result, segments) = run_collected(&format!("{}/episode.mp3", server.uri()), 1000).await;
    result.unwrap();

    let (last, chunks) = segments.split_last().expect("segments");
    assert!(last.is_end_of_stream());
    assert!(!chunks.is_empty());

    let mut frames = 0usize;
    for (order, segment) in chunks.iter().enumerate() {
        assert_eq!(segment.order, order as u64);
        let chunk = segment.as_chunk().expect("only PCM before the end");
        assert!((segment.timestamp_sec - frames as f64 / 44_100.0).abs() < 1e-9);
        assert!(chunk.frames() <= 1000);
        frames += chunk.frames();
    }
    assert!(chunks[..chunks.len() - 1].iter().all(|s| s.as_chunk().map(|c| c.frames()) == Some(1000)));
    assert!(frames > 0 && frames <= 40 * SAMPLES_PER_FRAME);
    assert_eq!(last.order, chunks.len() as u64);
}

#[tokio::test]
async fn http_404_fails_the_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (result, segments) = run_collected(&format!("{}/gone.mp3", server.uri()), 0).await;
    match result {
        Err(AudioError::Fetch(FetchError::Status { status_code, .. })) => assert_eq!(status_code, 404),
        other => panic!("expected a 404, got {other:?}"),
    }
    assert!(segments.is_empty());
}

#[tokio::test]
async fn non_audio_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>moved</body></html>"))
        .mount(&server)
        .await;

    let (result, segments) = run_collected(&format!("{}/page.mp3", server.uri()), 0).await;
    assert!(matches!(result, Err(AudioError::Decode(DecodeError::Decode(_)))), "{result:?}");
    assert!(segments.is_empty());
}

#[tokio::test]
async fn connection_cut_is_attributed_to_the_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = mp3_frames(200);
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: audio/mpeg\r\ncontent-length: {}\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body[..body.len() / 2]).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let (result, segments) = run_collected(&format!("http://{addr}/cut.mp3"), 0).await;
    assert!(
        matches!(result, Err(AudioError::Fetch(FetchError::Transport { .. }))),
        "{result:?}"
    );
    assert!(segments.iter().all(|s| !s.is_end_of_stream()));
}

#[tokio::test]
async fn cancellation_stops_a_waiting_source() {
    // Serveur qui accepte la connexion mais ne répond jamais
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let source = HttpSource::new(fetcher(), format!("http://{addr}/silent.mp3"));
    let progress = source.progress();
    let token = CancellationToken::new();
    let handle = tokio::spawn(Box::new(source).run(token.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(progress.monitor().is_none());
    assert_eq!(progress.bytes_received(), 0);
}

use std::sync::Arc;
use std::time::Duration;

use podaudio::{AudioError, AudioPipelineNode, AudioSink, HttpSource, NullOutput};
use podnet::{FetchSettings, HttpFetcher};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const STEREO_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
const FRAME_LEN: usize = 417;
const SAMPLES_PER_FRAME: u64 = 1152;

fn mp3_frames(count: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(count * FRAME_LEN);
    for _ in 0..count {
        data.extend_from_slice(&STEREO_HEADER);
        data.resize(data.len() + FRAME_LEN - STEREO_HEADER.len(), 0);
    }
    data
}

async fn serve(frames: usize) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/episode.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(mp3_frames(frames)))
        .mount(&server)
        .await;
    let url = format!("{}/episode.mp3", server.uri());
    (server, url)
}

fn source(url: &str, output: &NullOutput) -> HttpSource {
    let fetcher = HttpFetcher::new(FetchSettings::default()).unwrap();
    let mut source = HttpSource::new(fetcher, url);
    source.register(Box::new(AudioSink::with_buffer(Arc::new(output.clone()), 200, 4)));
    source
}

#[tokio::test]
async fn episode_plays_to_the_end() {
    let (_server, url) = serve(60).await;
    let output = NullOutput::with_speed(100.0);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Box::new(source(&url, &output)).run(CancellationToken::new()),
    )
    .await
    .expect("playback should finish");
    assert_ok!(result);

    let stats = output.stats();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.stopped, 1);
    assert!(stats.samples_consumed > 0);
    assert!(stats.samples_consumed <= 60 * SAMPLES_PER_FRAME * 2);
    assert_eq!(stats.samples_consumed % 2, 0);
}

#[tokio::test]
async fn media_error_opens_no_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let output = NullOutput::new();

    let err = assert_err!(
        Box::new(source(&format!("{}/episode.mp3", server.uri()), &output))
            .run(CancellationToken::new())
            .await
    );
    assert!(matches!(err, AudioError::Fetch(_)), "{err:?}");
    assert_eq!(output.stats(), Default::default());
}

#[tokio::test]
async fn stalled_output_stops_the_download() {
    let total = 4000usize;
    let (_server, url) = serve(total).await;
    let output = NullOutput::new();
    output.pause();

    let source = source(&url, &output);
    let progress = source.progress();
    let token = CancellationToken::new();
    let handle = tokio::spawn(Box::new(source).run(token.clone()));

    // Attendre que le volume téléchargé se stabilise
    let mut last = u64::MAX;
    let mut stable = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let now = progress.bytes_received();
        if now > 0 && now == last {
            stable = true;
            break;
        }
        last = now;
    }
    assert!(stable, "download never settled");
    let body_len = (total * FRAME_LEN) as u64;
    assert!(last < body_len, "pulled {last} of {body_len} bytes with a stalled output");
    assert_eq!(output.stats().samples_consumed, 0);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cancelled pipeline should stop")
        .unwrap()
        .unwrap();
    let stats = output.stats();
    assert_eq!((stats.started, stats.stopped), (1, 1));
}

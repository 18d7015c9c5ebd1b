use std::time::Duration;

use podfeed::{decode, decode_feed, FeedParseError};
use podnet::{FetchError, FetchSettings, HttpFetcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const INTRO_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Morning Show</title>
    <link>https://show.example.com/</link>
    <description>Daily</description>
    <item>
      <title>Intro</title>
      <enclosure url="https://cdn.example.com/intro.mp3" type="audio/mpeg" length="4096"/>
    </item>
    <item>
      <title>Bonus</title>
      <description>Text only</description>
    </item>
  </channel>
</rss>"#;

async fn parse(xml: &str) -> Result<podfeed::Feed, FeedParseError> {
    tokio::time::timeout(Duration::from_secs(5), decode_feed(xml.as_bytes(), None))
        .await
        .expect("decoder must not hang")
}

#[tokio::test]
async fn only_items_with_enclosures_are_listed() {
    let feed = parse(INTRO_FEED).await.unwrap();

    assert_eq!(feed.metadata.title, "Morning Show");
    assert_eq!(feed.metadata.link, "https://show.example.com/");
    assert_eq!(feed.episodes.labels(), ["Intro"]);

    let intro = feed.episodes.select("Intro").unwrap();
    assert_eq!(intro.enclosure_url, "https://cdn.example.com/intro.mp3");
    assert!(feed.episodes.select("Bonus").is_err());
}

#[tokio::test]
async fn document_order_is_preserved() {
    let mut xml = String::from("<rss><channel><title>T</title><link>http://h/</link>");
    for i in 0..50 {
        if i % 3 == 0 {
            xml.push_str(&format!("<item><title>Text {i}</title></item>"));
        } else {
            xml.push_str(&format!(
                "<item><title>Ep {i}</title><enclosure url=\"http://h/{i}.mp3\"/></item>"
            ));
        }
    }
    xml.push_str("</channel></rss>");

    let feed = parse(&xml).await.unwrap();
    let expected: Vec<String> = (0..50)
        .filter(|i| i % 3 != 0)
        .map(|i| format!("Ep {i}"))
        .collect();
    assert_eq!(feed.episodes.labels(), expected.as_slice());
    assert_eq!(feed.episodes.len(), expected.len());
}

#[tokio::test]
async fn atom_entries_use_enclosure_links() {
    let feed = parse(
        r#"<feed xmlns="http://www.w3.org/2005/Atom">
             <title>Atom Cast</title>
             <link rel="self" href="https://a.example.com/feed.atom"/>
             <link href="https://a.example.com/"/>
             <entry>
               <title>Pilot</title>
               <link rel="alternate" href="https://a.example.com/pilot"/>
               <link rel="enclosure" href="https://a.example.com/pilot.mp3" type="audio/mpeg" length="99"/>
               <updated>2024-02-01T00:00:00Z</updated>
             </entry>
             <entry><title>Notes</title><link href="https://a.example.com/notes"/></entry>
           </feed>"#,
    )
    .await
    .unwrap();

    assert_eq!(feed.metadata.title, "Atom Cast");
    assert_eq!(feed.metadata.link, "https://a.example.com/");
    assert_eq!(feed.episodes.labels(), ["Pilot"]);
    let pilot = feed.episodes.get(0).unwrap();
    assert_eq!(pilot.enclosure_url, "https://a.example.com/pilot.mp3");
    assert_eq!(pilot.length, Some(99));
    assert_eq!(pilot.published.as_deref(), Some("2024-02-01T00:00:00Z"));
}

#[tokio::test]
async fn missing_channel_fields_become_empty() {
    let feed = parse("<rss><channel><item><enclosure url=\"http://h/a.mp3\"/></item></channel></rss>")
        .await
        .unwrap();
    assert_eq!(feed.metadata.title, "");
    assert_eq!(feed.metadata.link, "");
    assert_eq!(feed.episodes.labels(), ["a.mp3"]);
}

#[tokio::test]
async fn zero_byte_and_non_xml_input_fail() {
    assert_eq!(parse("").await, Err(FeedParseError::Empty));
    assert_eq!(parse("   \n").await, Err(FeedParseError::NoRoot));
    assert_eq!(
        parse("{\"episodes\": []}").await,
        Err(FeedParseError::NoRoot)
    );
    assert!(parse("<<<>>>").await.is_err());
    assert!(parse("\u{0}\u{1}binary").await.is_err());
}

#[tokio::test]
async fn channel_without_items_is_an_empty_list() {
    let feed = parse("<rss><channel><title>Quiet</title></channel></rss>")
        .await
        .unwrap();
    assert!(feed.episodes.is_empty());
}

#[tokio::test]
async fn decode_resolves_against_the_response_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shows/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<rss><channel><title>Rel</title><link>/</link>\
             <item><title>Ep</title><enclosure url=\"audio/ep.mp3\"/></item>\
             </channel></rss>",
        ))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(FetchSettings::default()).unwrap();
    let stream = fetcher
        .fetch(&format!("{}/shows/feed.xml", server.uri()))
        .await
        .unwrap();
    let feed = decode(stream).await.unwrap();

    assert_eq!(
        feed.episodes.get(0).unwrap().enclosure_url,
        format!("{}/shows/audio/ep.mp3", server.uri())
    );
}

#[tokio::test]
async fn transport_failure_is_reported_as_read_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4000\r\n\r\n<rss><channel><title>Cut")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let fetcher = HttpFetcher::new(FetchSettings::default()).unwrap();
    let stream = fetcher.fetch(&format!("http://{addr}/feed.xml")).await.unwrap();
    let err = decode(stream).await.unwrap_err();

    assert!(
        matches!(err.transport(), Some(FetchError::Transport { .. })),
        "{err:?}"
    );
}

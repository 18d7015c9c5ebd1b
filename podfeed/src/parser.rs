//! Streaming feed parser.
//!
//! The document is read event by event with quick-xml's async reader, so a
//! feed is decoded while it downloads. The result is only returned once the
//! whole document has been read.

use std::borrow::Cow;

use podnet::{ByteStream, FetchError};
use quick_xml::{
    escape::{resolve_predefined_entity, unescape},
    events::{BytesRef, BytesStart, Event},
    Error as XmlError, Reader,
};
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    error::FeedParseError,
    model::{Episode, EpisodeList, Feed, FeedMetadata},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    /// RSS 0.9x / 2.0: `<rss><channel><item>`
    Rss,
    /// RSS 1.0: `<rdf:RDF>` with items next to the channel
    Rdf,
    Atom,
}

impl FeedKind {
    fn from_root(name: &str) -> Option<Self> {
        match name {
            "rss" => Some(FeedKind::Rss),
            "rdf:RDF" => Some(FeedKind::Rdf),
            "feed" => Some(FeedKind::Atom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ChannelTitle,
    ChannelLink,
    ItemTitle,
    ItemPublished,
    ItemUpdated,
}

#[derive(Debug)]
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

#[derive(Debug, Default)]
struct ItemDraft {
    depth: usize,
    title: Option<String>,
    enclosure_url: Option<String>,
    mime_type: Option<String>,
    length: Option<u64>,
    published: Option<String>,
    updated: Option<String>,
}

/// Accumulates parser events into a [`Feed`].
#[derive(Debug, Default)]
struct FeedBuilder {
    kind: Option<FeedKind>,
    stack: Vec<String>,
    capture: Option<Capture>,
    item: Option<ItemDraft>,
    title: Option<String>,
    link: Option<String>,
    episodes: Vec<Episode>,
    dropped: usize,
    base: Option<Url>,
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .map(|attr| {
            let raw = String::from_utf8_lossy(&attr.value);
            // undeclared entities are kept as written
            match unescape(&raw) {
                Ok(value) => value.into_owned(),
                Err(_) => raw.into_owned(),
            }
        })
}

fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, String> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|e| e.to_string())?
    {
        return Ok(ch.to_string());
    }
    let name = reference.decode().map_err(|e| e.to_string())?;
    Ok(match resolve_predefined_entity(&name) {
        Some(value) => value.to_string(),
        None => format!("&{name};"),
    })
}

impl FeedBuilder {
    fn new(base: Option<Url>) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    fn parent_is(&self, path: &[&str]) -> bool {
        self.stack.len() == path.len() && self.stack.iter().zip(path).all(|(a, b)| a == b)
    }

    fn in_item_body(&self) -> bool {
        self.item
            .as_ref()
            .is_some_and(|item| item.depth + 1 == self.stack.len())
    }

    fn capture(&mut self, field: Field) {
        self.capture = Some(Capture {
            field,
            depth: self.stack.len(),
            text: String::new(),
        });
    }

    fn start(&mut self, start: &BytesStart<'_>) -> Result<(), FeedParseError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        let Some(kind) = self.kind else {
            let kind = FeedKind::from_root(&name)
                .ok_or_else(|| FeedParseError::UnsupportedRoot(name.clone()))?;
            debug!(root = %name, ?kind, "Feed root element");
            self.kind = Some(kind);
            self.stack.push(name);
            return Ok(());
        };

        if self.capture.is_none() {
            match kind {
                FeedKind::Rss => self.start_rss(&name, start),
                FeedKind::Rdf => self.start_rdf(&name, start),
                FeedKind::Atom => self.start_atom(&name, start),
            }
        }

        self.stack.push(name);
        Ok(())
    }

    fn start_rss(&mut self, name: &str, start: &BytesStart<'_>) {
        if self.parent_is(&["rss", "channel"]) {
            match name {
                "title" => self.capture(Field::ChannelTitle),
                "link" => self.capture(Field::ChannelLink),
                "item" => self.open_item(),
                _ => {}
            }
        } else if self.in_item_body() {
            match name {
                "title" => self.capture(Field::ItemTitle),
                "pubDate" => self.capture(Field::ItemPublished),
                "enclosure" => self.enclosure(
                    attribute(start, "url"),
                    attribute(start, "type"),
                    attribute(start, "length"),
                ),
                _ => {}
            }
        }
    }

    fn start_rdf(&mut self, name: &str, start: &BytesStart<'_>) {
        if self.parent_is(&["rdf:RDF", "channel"]) {
            match name {
                "title" => self.capture(Field::ChannelTitle),
                "link" => self.capture(Field::ChannelLink),
                _ => {}
            }
        } else if self.parent_is(&["rdf:RDF"]) && name == "item" {
            self.open_item();
        } else if self.in_item_body() {
            match name {
                "title" => self.capture(Field::ItemTitle),
                "dc:date" => self.capture(Field::ItemPublished),
                "enclosure" => self.enclosure(
                    attribute(start, "url"),
                    attribute(start, "type"),
                    attribute(start, "length"),
                ),
                "enc:enclosure" => self.enclosure(
                    attribute(start, "rdf:resource"),
                    attribute(start, "enc:type"),
                    attribute(start, "enc:length"),
                ),
                _ => {}
            }
        }
    }

    fn start_atom(&mut self, name: &str, start: &BytesStart<'_>) {
        let rel = attribute(start, "rel");
        if self.parent_is(&["feed"]) {
            match name {
                "title" => self.capture(Field::ChannelTitle),
                "link" if self.link.is_none() => {
                    if matches!(rel.as_deref(), None | Some("alternate")) {
                        self.link = attribute(start, "href");
                    }
                }
                "entry" => self.open_item(),
                _ => {}
            }
        } else if self.in_item_body() {
            match name {
                "title" => self.capture(Field::ItemTitle),
                "published" => self.capture(Field::ItemPublished),
                "updated" => self.capture(Field::ItemUpdated),
                "link" if rel.as_deref() == Some("enclosure") => self.enclosure(
                    attribute(start, "href"),
                    attribute(start, "type"),
                    attribute(start, "length"),
                ),
                _ => {}
            }
        }
    }

    fn open_item(&mut self) {
        self.item = Some(ItemDraft {
            depth: self.stack.len(),
            ..ItemDraft::default()
        });
    }

    fn enclosure(&mut self, url: Option<String>, mime_type: Option<String>, length: Option<String>) {
        let Some(item) = self.item.as_mut() else {
            return;
        };
        // only the first enclosure of an item is played
        if item.enclosure_url.is_some() {
            return;
        }
        let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
            return;
        };
        item.enclosure_url = Some(url);
        item.mime_type = mime_type.filter(|m| !m.trim().is_empty());
        item.length = length.and_then(|l| l.trim().parse().ok());
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn end(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };
        let depth = self.stack.len();

        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            if let Some(capture) = self.capture.take() {
                self.store(capture);
            }
        }

        if self.item.as_ref().is_some_and(|item| item.depth == depth) {
            if let Some(item) = self.item.take() {
                self.close_item(item, &name);
            }
        }
    }

    fn store(&mut self, capture: Capture) {
        let value = capture.text.trim().to_string();
        match capture.field {
            Field::ChannelTitle => {
                self.title.get_or_insert(value);
            }
            Field::ChannelLink => {
                self.link.get_or_insert(value);
            }
            Field::ItemTitle | Field::ItemPublished | Field::ItemUpdated => {
                let Some(item) = self.item.as_mut() else {
                    return;
                };
                let slot = match capture.field {
                    Field::ItemTitle => &mut item.title,
                    Field::ItemPublished => &mut item.published,
                    _ => &mut item.updated,
                };
                slot.get_or_insert(value);
            }
        }
    }

    fn close_item(&mut self, item: ItemDraft, element: &str) {
        let title = item.title.unwrap_or_default();
        let Some(raw_url) = item.enclosure_url else {
            trace!(%element, %title, "Item without enclosure dropped");
            self.dropped += 1;
            return;
        };

        let enclosure_url = self.resolve(&raw_url);
        self.episodes.push(Episode {
            title,
            enclosure_url,
            mime_type: item.mime_type,
            length: item.length,
            published: item.published.or(item.updated).filter(|d| !d.is_empty()),
        });
    }

    fn resolve(&self, raw: &str) -> String {
        match Url::parse(raw) {
            Ok(url) => url.to_string(),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base {
                Some(base) => base
                    .join(raw)
                    .map(|url| url.to_string())
                    .unwrap_or_else(|_| raw.to_string()),
                None => raw.to_string(),
            },
            Err(_) => raw.to_string(),
        }
    }

    fn finish(self) -> Result<Feed, FeedParseError> {
        if let Some(open) = self.stack.last() {
            return Err(FeedParseError::Unterminated {
                element: open.clone(),
            });
        }
        if self.kind.is_none() {
            return Err(FeedParseError::NoRoot);
        }

        let title = self.title.unwrap_or_else(|| {
            warn!("Feed has no channel title");
            String::new()
        });
        let link = self.link.unwrap_or_else(|| {
            warn!("Feed has no channel link");
            String::new()
        });

        debug!(
            episodes = self.episodes.len(),
            dropped = self.dropped,
            "Feed decoded"
        );
        Ok(Feed {
            metadata: FeedMetadata { title, link },
            episodes: EpisodeList::new(self.episodes),
        })
    }
}

fn read_error(err: XmlError, position: u64) -> FeedParseError {
    match err {
        XmlError::Io(io) => FeedParseError::Read {
            message: io.to_string(),
            transport: FetchError::from_io_error(&io),
        },
        other => FeedParseError::Malformed {
            position,
            message: other.to_string(),
        },
    }
}

/// Decodes a feed from any async reader.
///
/// `base` is used to resolve relative enclosure URLs.
pub async fn decode_feed<R>(reader: R, base: Option<&str>) -> Result<Feed, FeedParseError>
where
    R: AsyncRead + Unpin,
{
    let base = base.and_then(|b| Url::parse(b).ok());
    let mut reader = Reader::from_reader(BufReader::new(reader));
    let mut builder = FeedBuilder::new(base);
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into_async(&mut buf).await {
            Ok(event) => event,
            Err(err) => return Err(read_error(err, reader.buffer_position() as u64)),
        };
        let position = reader.buffer_position() as u64;
        let malformed = |message: String| FeedParseError::Malformed { position, message };

        match event {
            Event::Start(start) => builder.start(&start)?,
            Event::Empty(start) => {
                builder.start(&start)?;
                builder.end();
            }
            Event::End(_) => builder.end(),
            Event::Text(text) => {
                let text: Cow<'_, str> = text.decode().map_err(|e| malformed(e.to_string()))?;
                builder.text(&text);
            }
            Event::CData(cdata) => {
                let text = cdata.decode().map_err(|e| malformed(e.to_string()))?;
                builder.text(&text);
            }
            Event::GeneralRef(reference) => {
                let text = resolve_reference(&reference).map_err(malformed)?;
                builder.text(&text);
            }
            Event::Eof => {
                if position == 0 {
                    return Err(FeedParseError::Empty);
                }
                break;
            }
            _ => {}
        }

        buf.clear();
    }

    builder.finish()
}

/// Decodes the feed carried by `stream`, resolving relative enclosure URLs
/// against the response URL.
pub async fn decode(stream: ByteStream) -> Result<Feed, FeedParseError> {
    let base = stream.url().to_string();
    decode_feed(stream, Some(&base)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(xml: &str) -> Result<Feed, FeedParseError> {
        decode_feed(xml.as_bytes(), Some("https://example.com/podcast/feed.xml")).await
    }

    #[tokio::test]
    async fn rss_item_fields() {
        let feed = parse(
            r#"<?xml version="1.0"?>
            <rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
              <channel>
                <title>Show</title>
                <link>https://example.com/</link>
                <itunes:title>Not the channel title</itunes:title>
                <item>
                  <title>First</title>
                  <itunes:title>Not the item title</itunes:title>
                  <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
                  <enclosure url="media/first.mp3" type="audio/mpeg" length="1234"/>
                  <enclosure url="https://cdn.example.com/second-enclosure.mp3"/>
                </item>
              </channel>
            </rss>"#,
        )
        .await
        .unwrap();

        assert_eq!(feed.metadata.title, "Show");
        let episode = feed.episodes.get(0).unwrap();
        assert_eq!(episode.title, "First");
        assert_eq!(
            episode.enclosure_url,
            "https://example.com/podcast/media/first.mp3"
        );
        assert_eq!(episode.mime_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(episode.length, Some(1234));
        assert_eq!(
            episode.published.as_deref(),
            Some("Mon, 06 Jan 2025 10:00:00 GMT")
        );
    }

    #[tokio::test]
    async fn references_and_cdata_are_resolved() {
        let feed = parse(
            "<rss><channel><title>Tom &amp; Jerry&#x27;s &#233;mission</title>\
             <link>https://h/</link>\
             <item><title><![CDATA[Q&A <live>]]> &nbsp;part</title>\
             <enclosure url=\"https://h/a.mp3?x=1&amp;y=2\"/></item>\
             </channel></rss>",
        )
        .await
        .unwrap();

        assert_eq!(feed.metadata.title, "Tom & Jerry's émission");
        let episode = feed.episodes.get(0).unwrap();
        assert_eq!(episode.title, "Q&A <live> &nbsp;part");
        assert_eq!(episode.enclosure_url, "https://h/a.mp3?x=1&y=2");
    }

    #[tokio::test]
    async fn rdf_items_sit_next_to_the_channel() {
        let feed = parse(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
                        xmlns="http://purl.org/rss/1.0/"
                        xmlns:enc="http://purl.oclc.org/net/rss_2.0/enc#">
                 <channel><title>Old school</title><link>http://h/</link></channel>
                 <item><title>One</title>
                   <enc:enclosure rdf:resource="http://h/one.mp3" enc:type="audio/mpeg"/>
                 </item>
                 <item><title>No audio</title></item>
               </rdf:RDF>"#,
        )
        .await
        .unwrap();

        assert_eq!(feed.metadata.title, "Old school");
        assert_eq!(feed.episodes.labels(), ["One"]);
        assert_eq!(feed.episodes.get(0).unwrap().enclosure_url, "http://h/one.mp3");
    }

    #[tokio::test]
    async fn html_is_an_unsupported_root() {
        assert_eq!(
            parse("<html><body>hi</body></html>").await,
            Err(FeedParseError::UnsupportedRoot("html".into()))
        );
    }

    #[tokio::test]
    async fn end_inside_an_element_is_unterminated() {
        assert_eq!(
            parse("<rss><channel><title>Cut").await,
            Err(FeedParseError::Unterminated {
                element: "title".into()
            })
        );
    }

    #[tokio::test]
    async fn mismatched_tags_are_malformed() {
        let err = parse("<rss><channel></rss>").await.unwrap_err();
        assert!(matches!(err, FeedParseError::Malformed { .. }), "{err:?}");
    }
}

//! RSS document → [`FeedSnapshot`]
//!
//! Event based parsing with `quick-xml`. Every field is optional: an item
//! missing a title, a date or an enclosure still becomes an episode with
//! empty strings, only a malformed document or a document without
//! `<channel>` is an error.
//!
//! Episode images follow an explicit ordered fallback chain:
//! 1. `<itunes:image href>` inside the item
//! 2. any element whose local name is `image` carrying an `href`
//!    (the same tag under another namespace prefix)
//! 3. the channel image (`<itunes:image href>`, else `<image><url>`)

use crate::error::{Error, Result};
use crate::models::{Episode, FeedSnapshot};
use chrono::{DateTime, Local};
use quick_xml::encoding::Decoder;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::{Error as XmlError, Reader};
use scraper::Html;
use std::fmt::Write;
use tracing::{debug, warn};

/// Default `chrono` pattern for episode dates
pub const DEFAULT_DATE_FORMAT: &str = "%d %b %Y";

const ITUNES_IMAGE: &str = "itunes:image";
const ITUNES_DURATION: &str = "itunes:duration";

/// Parses feed documents into snapshots
#[derive(Debug, Clone)]
pub struct FeedParser {
    date_format: String,
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

/// Text element currently being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    ChannelTitle,
    ChannelImageUrl,
    Title,
    Description,
    PubDate,
    ItunesDuration,
    BareDuration,
}

#[derive(Debug)]
struct Capture {
    target: Target,
    depth: usize,
    text: String,
}

#[derive(Debug, Default)]
struct ChannelFields {
    title: Option<String>,
    itunes_image: Option<String>,
    image_url: Option<String>,
}

impl ChannelFields {
    fn image(&self) -> String {
        first_non_empty([self.itunes_image.as_deref(), self.image_url.as_deref()])
    }
}

/// Raw values of one `<item>`, as found in the document
#[derive(Debug, Default)]
struct RawItem {
    title: Option<String>,
    description: Option<String>,
    pub_date: Option<String>,
    itunes_duration: Option<String>,
    bare_duration: Option<String>,
    enclosure_url: Option<String>,
    itunes_image: Option<String>,
    bare_image: Option<String>,
}

impl RawItem {
    fn into_episode(self, channel_image: &str, date_format: &str) -> Episode {
        let image_url = first_non_empty([
            self.itunes_image.as_deref(),
            self.bare_image.as_deref(),
            Some(channel_image),
        ]);

        Episode {
            title: self.title.unwrap_or_default(),
            description: strip_html(self.description.as_deref().unwrap_or_default()),
            published_at: format_pub_date(self.pub_date.as_deref().unwrap_or_default(), date_format),
            duration: first_non_empty([
                self.itunes_duration.as_deref(),
                self.bare_duration.as_deref(),
            ]),
            audio_url: self.enclosure_url.unwrap_or_default(),
            image_url,
        }
    }
}

impl FeedParser {
    pub fn new(date_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
        }
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// Parses a whole RSS document
    pub fn parse(&self, xml: &str) -> Result<FeedSnapshot> {
        let mut reader = Reader::from_str(xml);
        let decoder = reader.decoder();

        let mut stack: Vec<String> = Vec::new();
        let mut channel_depth: Option<usize> = None;
        let mut channel = ChannelFields::default();
        let mut items: Vec<RawItem> = Vec::new();
        let mut item: Option<(RawItem, usize)> = None;
        let mut capture: Option<Capture> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let depth = stack.len();
                    let name = qualified_name(&e);

                    if name == "channel" && channel_depth.is_none() {
                        channel_depth = Some(depth);
                    } else if name == "item" && channel_depth.is_some() && item.is_none() {
                        item = Some((RawItem::default(), depth));
                    } else if capture.is_none() {
                        let parent = stack.last().map(String::as_str);
                        match item.as_mut() {
                            Some((raw, _)) => {
                                Self::open_item_element(raw, &e, &name, decoder)?;
                                capture = Self::item_target(raw, &e, &name)
                                    .map(|target| Capture::new(target, depth));
                            }
                            None => {
                                if let Some(ch_depth) = channel_depth {
                                    Self::open_channel_element(
                                        &mut channel,
                                        &e,
                                        &name,
                                        depth.saturating_sub(ch_depth),
                                        decoder,
                                    )?;
                                    capture = Self::channel_target(&channel, &name, parent, depth.saturating_sub(ch_depth))
                                        .map(|target| Capture::new(target, depth));
                                }
                            }
                        }
                    }

                    stack.push(name);
                }
                Event::Empty(e) => {
                    let depth = stack.len();
                    let name = qualified_name(&e);
                    match item.as_mut() {
                        Some((raw, _)) => Self::open_item_element(raw, &e, &name, decoder)?,
                        None => {
                            if let Some(ch_depth) = channel_depth {
                                Self::open_channel_element(
                                    &mut channel,
                                    &e,
                                    &name,
                                    depth.saturating_sub(ch_depth),
                                    decoder,
                                )?;
                            }
                        }
                    }
                }
                Event::End(_) => {
                    let name = stack
                        .pop()
                        .ok_or_else(|| Error::parse("closing tag without opening tag"))?;
                    let depth = stack.len();

                    if capture.as_ref().is_some_and(|c| c.depth == depth) {
                        if let Some(done) = capture.take() {
                            match item.as_mut() {
                                Some((raw, _)) => done.store_item(raw),
                                None => done.store_channel(&mut channel),
                            }
                        }
                    }

                    if name == "item" && item.as_ref().is_some_and(|(_, d)| *d == depth) {
                        if let Some((raw, _)) = item.take() {
                            items.push(raw);
                        }
                    }
                }
                Event::Text(e) => {
                    if let Some(c) = capture.as_mut() {
                        c.text.push_str(&e.decode().map_err(XmlError::Encoding)?);
                    }
                }
                Event::CData(e) => {
                    if let Some(c) = capture.as_mut() {
                        c.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::GeneralRef(e) => {
                    if let Some(c) = capture.as_mut() {
                        c.text.push_str(&resolve_reference(&e)?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::parse(format!(
                "unexpected end of document inside <{}>",
                open
            )));
        }
        if channel_depth.is_none() {
            return Err(Error::parse("missing <channel> element"));
        }

        let channel_image = channel.image();
        let episodes: Vec<Episode> = items
            .into_iter()
            .map(|raw| raw.into_episode(&channel_image, &self.date_format))
            .collect();

        debug!(
            "Parsed feed '{}' with {} episode(s)",
            channel.title.as_deref().unwrap_or_default(),
            episodes.len()
        );

        Ok(FeedSnapshot {
            title: channel.title.unwrap_or_default(),
            image_url: channel_image,
            episodes,
        })
    }

    /// Attribute-carrying elements of an item (`<enclosure>`, images)
    fn open_item_element(
        raw: &mut RawItem,
        e: &BytesStart,
        name: &str,
        decoder: Decoder,
    ) -> Result<()> {
        if name == "enclosure" {
            if raw.enclosure_url.is_none() {
                raw.enclosure_url = attribute(e, "url", decoder)?;
            }
        } else if name == ITUNES_IMAGE {
            if raw.itunes_image.is_none() {
                raw.itunes_image = attribute(e, "href", decoder)?;
            }
        } else if local_name(e) == "image" && raw.bare_image.is_none() {
            raw.bare_image = attribute(e, "href", decoder)?;
        }
        Ok(())
    }

    fn item_target(raw: &RawItem, e: &BytesStart, name: &str) -> Option<Target> {
        let target = match name {
            "title" => Target::Title,
            "description" => Target::Description,
            "pubDate" => Target::PubDate,
            ITUNES_DURATION => Target::ItunesDuration,
            _ if local_name(e) == "duration" => Target::BareDuration,
            _ => return None,
        };
        let taken = match target {
            Target::Title => raw.title.is_some(),
            Target::Description => raw.description.is_some(),
            Target::PubDate => raw.pub_date.is_some(),
            Target::ItunesDuration => raw.itunes_duration.is_some(),
            Target::BareDuration => raw.bare_duration.is_some(),
            Target::ChannelTitle | Target::ChannelImageUrl => true,
        };
        (!taken).then_some(target)
    }

    /// `relative_depth` is 1 for direct children of `<channel>`
    fn open_channel_element(
        channel: &mut ChannelFields,
        e: &BytesStart,
        name: &str,
        relative_depth: usize,
        decoder: Decoder,
    ) -> Result<()> {
        if relative_depth == 1 && name == ITUNES_IMAGE && channel.itunes_image.is_none() {
            channel.itunes_image = attribute(e, "href", decoder)?;
        }
        Ok(())
    }

    fn channel_target(
        channel: &ChannelFields,
        name: &str,
        parent: Option<&str>,
        relative_depth: usize,
    ) -> Option<Target> {
        match (name, parent, relative_depth) {
            ("title", _, 1) if channel.title.is_none() => Some(Target::ChannelTitle),
            ("url", Some("image"), 2) if channel.image_url.is_none() => {
                Some(Target::ChannelImageUrl)
            }
            _ => None,
        }
    }
}

impl Capture {
    fn new(target: Target, depth: usize) -> Self {
        Self {
            target,
            depth,
            text: String::new(),
        }
    }

    fn store_item(self, raw: &mut RawItem) {
        let text = self.text.trim().to_string();
        let slot = match self.target {
            Target::Title => &mut raw.title,
            Target::Description => &mut raw.description,
            Target::PubDate => &mut raw.pub_date,
            Target::ItunesDuration => &mut raw.itunes_duration,
            Target::BareDuration => &mut raw.bare_duration,
            Target::ChannelTitle | Target::ChannelImageUrl => return,
        };
        slot.get_or_insert(text);
    }

    fn store_channel(self, channel: &mut ChannelFields) {
        let text = self.text.trim().to_string();
        match self.target {
            Target::ChannelTitle => {
                channel.title.get_or_insert(text);
            }
            Target::ChannelImageUrl => {
                channel.image_url.get_or_insert(text);
            }
            _ => {}
        }
    }
}

fn qualified_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart, key: &str, decoder: Decoder) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::parse(err.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .decode_and_unescape_value(decoder)
                .map_err(|err| Error::parse(err.to_string()))?;
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

/// `&amp;`, `&#233;`... Unknown named entities are kept verbatim.
fn resolve_reference(e: &BytesRef) -> Result<String> {
    if let Some(ch) = e
        .resolve_char_ref()
        .map_err(|err| Error::parse(err.to_string()))?
    {
        return Ok(ch.to_string());
    }
    let name = e.decode().map_err(|err| Error::parse(err.to_string()))?;
    Ok(match resolve_predefined_entity(&name) {
        Some(resolved) => resolved.to_string(),
        None => format!("&{};", name),
    })
}

fn first_non_empty<const N: usize>(candidates: [Option<&str>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Plain text content of an HTML fragment (tags dropped, entities decoded)
pub fn strip_html(raw: &str) -> String {
    if !raw.contains('<') && !raw.contains('&') {
        return raw.trim().to_string();
    }
    let fragment = Html::parse_fragment(raw);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Drops a leading `Mon,`; feeds often carry a weekday that does not match
/// the date, which RFC 2822 parsing rejects.
fn without_weekday(raw: &str) -> &str {
    match raw.split_once(',') {
        Some((day, rest))
            if !day.trim().is_empty() && day.trim().chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            rest.trim_start()
        }
        _ => raw,
    }
}

/// Formats an RSS date for display in local time.
///
/// RFC 2822 is tried first (again without the weekday if needed), then
/// RFC 3339. A date that cannot be parsed is returned trimmed as-is; an
/// empty date stays empty.
pub fn format_pub_date(raw: &str, format: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let parsed = DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(without_weekday(raw)))
        .or_else(|_| DateTime::parse_from_rfc3339(raw));
    let date = match parsed {
        Ok(date) => date.with_timezone(&Local),
        Err(e) => {
            debug!("Unparseable pubDate '{}': {}", raw, e);
            return raw.to_string();
        }
    };

    let mut out = String::new();
    if write!(out, "{}", date.format(format)).is_err() {
        warn!("Invalid date format '{}', keeping raw date", format);
        return raw.to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Vozes &amp; Histórias</title>
    <image>
      <url>https://example.com/feed.png</url>
      <title>ignored image title</title>
    </image>
    <itunes:image href="https://example.com/itunes-feed.jpg"/>
    <item>
      <title>Episode 2</title>
      <description><![CDATA[<p>Hello <b>world</b> &amp; friends</p>]]></description>
      <pubDate>Mon, 15 Jan 2024 12:00:00 +0000</pubDate>
      <itunes:duration>00:42:10</itunes:duration>
      <enclosure url="https://example.com/ep2.mp3" type="audio/mpeg" length="1"/>
      <itunes:image href="https://example.com/ep2.jpg"/>
    </item>
    <item>
      <title>Episode 1</title>
      <description>Plain text</description>
      <pubDate>not a date</pubDate>
      <duration>2530</duration>
      <enclosure url="https://example.com/ep1.mp3"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_channel_and_items_in_document_order() {
        let snap = FeedParser::default().parse(FEED).unwrap();

        assert_eq!(snap.title, "Vozes & Histórias");
        assert_eq!(snap.image_url, "https://example.com/itunes-feed.jpg");
        assert_eq!(snap.episodes.len(), 2);

        let ep2 = &snap.episodes[0];
        assert_eq!(ep2.title, "Episode 2");
        assert_eq!(ep2.description, "Hello world & friends");
        assert_eq!(ep2.published_at, "15 Jan 2024");
        assert_eq!(ep2.duration, "00:42:10");
        assert_eq!(ep2.audio_url, "https://example.com/ep2.mp3");
        assert_eq!(ep2.image_url, "https://example.com/ep2.jpg");

        let ep1 = &snap.episodes[1];
        assert_eq!(ep1.title, "Episode 1");
        assert_eq!(ep1.description, "Plain text");
        assert_eq!(ep1.published_at, "not a date");
        assert_eq!(ep1.duration, "2530");
        // no image of its own: channel image
        assert_eq!(ep1.image_url, "https://example.com/itunes-feed.jpg");
    }

    #[test]
    fn test_channel_image_falls_back_to_image_url() {
        let xml = r#"<rss><channel>
            <title>T</title>
            <image><url> https://example.com/feed.png </url></image>
            <item><title>A</title></item>
        </channel></rss>"#;
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.image_url, "https://example.com/feed.png");
        assert_eq!(snap.episodes[0].image_url, "https://example.com/feed.png");
    }

    #[test]
    fn test_image_from_other_namespace_prefix() {
        let xml = r#"<rss xmlns:ns1="http://www.itunes.com/dtds/podcast-1.0.dtd"><channel>
            <item><ns1:image href="https://example.com/prefixed.jpg"/></item>
        </channel></rss>"#;
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.episodes[0].image_url, "https://example.com/prefixed.jpg");
    }

    #[test]
    fn test_missing_images_resolve_to_empty_string() {
        let xml = "<rss><channel><title>T</title><item><title>A</title></item></channel></rss>";
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.image_url, "");
        assert_eq!(snap.episodes[0].image_url, "");
    }

    #[test]
    fn test_empty_itunes_href_falls_through() {
        let xml = r#"<rss><channel>
            <itunes:image href="https://example.com/feed.jpg"/>
            <item><itunes:image href=""/></item>
        </channel></rss>"#;
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.episodes[0].image_url, "https://example.com/feed.jpg");
    }

    #[test]
    fn test_partial_item_is_kept() {
        let xml = "<rss><channel><item></item><item><title>Only title</title></item></channel></rss>";
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.episodes.len(), 2);
        assert_eq!(snap.episodes[0], Episode::default());
        assert_eq!(snap.episodes[1].title, "Only title");
        assert!(!snap.episodes[1].is_playable());
    }

    #[test]
    fn test_item_title_does_not_leak_into_channel_title() {
        let xml = "<rss><channel><item><title>Item</title></item><title>Channel</title></channel></rss>";
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.title, "Channel");
        assert_eq!(snap.episodes[0].title, "Item");
    }

    #[test]
    fn test_malformed_documents_are_parse_errors() {
        let parser = FeedParser::default();
        for xml in [
            "<rss><channel><item></channel></rss>",
            "<rss><channel><title>open",
            "definitely not xml",
            "",
            "<rss><notachannel/></rss>",
        ] {
            let err = parser.parse(xml).unwrap_err();
            assert!(err.is_parse(), "{:?} -> {:?}", xml, err);
        }
    }

    #[test]
    fn test_character_references() {
        let xml = "<rss><channel><title>Caf&#233; &#x26; &lt;3 &nbsp;</title></channel></rss>";
        let snap = FeedParser::default().parse(xml).unwrap();
        assert_eq!(snap.title, "Café & <3 &nbsp;");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("  plain  "), "plain");
        assert_eq!(
            strip_html("<p>Um <a href=\"x\">link</a></p><br/>fim &eacute;"),
            "Um linkfim é"
        );
    }

    #[test]
    fn test_format_pub_date() {
        assert_eq!(format_pub_date("", "%d %b %Y"), "");
        assert_eq!(
            format_pub_date("Mon, 15 Jan 2024 12:00:00 +0000", "%Y-%m-%d"),
            "2024-01-15"
        );
        assert_eq!(
            format_pub_date("2024-01-15T12:00:00Z", "%Y-%m-%d"),
            "2024-01-15"
        );
        assert_eq!(format_pub_date(" yesterday ", "%Y"), "yesterday");
    }

    #[test]
    fn test_format_pub_date_ignores_wrong_weekday() {
        // 3 Jan 2024 was a Wednesday
        assert_eq!(
            format_pub_date("Mon, 03 Jan 2024 12:00:00 +0000", "%Y-%m-%d"),
            "2024-01-03"
        );
        assert_eq!(
            format_pub_date("03 Jan 2024 12:00:00 GMT", "%Y-%m-%d"),
            "2024-01-03"
        );
        assert_eq!(without_weekday("Mon, 03 Jan 2024"), "03 Jan 2024");
        assert_eq!(without_weekday("03 Jan 2024, noon"), "03 Jan 2024, noon");
    }

    #[test]
    fn test_custom_date_format() {
        let parser = FeedParser::new("%Y/%m/%d");
        let xml = "<rss><channel><item><pubDate>Tue, 16 Jan 2024 12:00:00 GMT</pubDate></item></channel></rss>";
        let snap = parser.parse(xml).unwrap();
        assert_eq!(snap.episodes[0].published_at, "2024/01/16");
    }
}

//! Minimal RSS 2.0 / Atom reader over `quick-xml` events.
//!
//! Only the fields the scrapers store are extracted. Elements are matched by
//! qualified name, so `content:encoded` and `dc:date` work for the usual
//! prefixes. Entity references are resolved as they stream in; unknown HTML
//! entities are kept verbatim for [`crate::normalize::strip_html`].

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use std::error::Error;

/// One `<item>` or `<entry>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// `description` (RSS) or `summary` (Atom).
    pub summary: String,
    /// `content:encoded` (RSS) or `content` (Atom).
    pub content: String,
    /// Raw `pubDate` / `published` / `updated` / `dc:date` text.
    pub published: Option<String>,
    /// `<source>` text, the publisher name on Google News.
    pub source_name: Option<String>,
    /// `<source url="...">`, the publisher home page on Google News.
    pub source_url: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    /// Channel or feed title.
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    FeedTitle,
    Title,
    Link,
    Summary,
    Content,
    Published,
    Updated,
    Source,
}

fn field_for(name: &str, in_entry: bool) -> Option<Field> {
    if !in_entry {
        return (name == "title").then_some(Field::FeedTitle);
    }
    Some(match name {
        "title" => Field::Title,
        "link" => Field::Link,
        "description" | "summary" => Field::Summary,
        "content:encoded" | "content" => Field::Content,
        "pubDate" | "published" | "dc:date" => Field::Published,
        "updated" => Field::Updated,
        "source" => Field::Source,
        _ => return None,
    })
}

fn attr(e: &BytesStart, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Attribute-carried data: Atom `<link href>`, Google News `<source url>`,
/// media thumbnails and image enclosures.
fn apply_attributes(entry: &mut FeedEntry, name: &str, e: &BytesStart) {
    match name {
        "link" => {
            let rel = attr(e, "rel");
            if let Some(href) = attr(e, "href") {
                if entry.link.is_empty() && matches!(rel.as_deref(), None | Some("alternate")) {
                    entry.link = href;
                }
            }
        }
        "source" => entry.source_url = attr(e, "url"),
        "media:content" | "media:thumbnail" | "enclosure" => {
            let is_image = attr(e, "type").is_none_or(|t| t.starts_with("image"))
                || attr(e, "medium").as_deref() == Some("image");
            if entry.image.is_none() && is_image {
                entry.image = attr(e, "url");
            }
        }
        _ => {}
    }
}

/// Parse an RSS or Atom document.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed, Box<dyn Error>> {
    let mut reader = Reader::from_str(xml);
    let mut feed = ParsedFeed::default();
    let mut current: Option<FeedEntry> = None;
    // The field being captured and the element name that closes it.
    let mut field: Option<(Field, String)> = None;
    let mut buf = String::new();
    // `updated` only dates an entry until a publish date shows up.
    let mut dated_by_update = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "item" || name == "entry" {
                    current = Some(FeedEntry::default());
                    field = None;
                    dated_by_update = false;
                    continue;
                }
                if field.is_some() {
                    // markup nested inside a captured element (xhtml content)
                    continue;
                }
                if let Some(entry) = current.as_mut() {
                    apply_attributes(entry, &name, &e);
                }
                if name == "title" && current.is_none() && feed.title.is_some() {
                    continue;
                }
                if let Some(f) = field_for(&name, current.is_some()) {
                    field = Some((f, name));
                    buf.clear();
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    apply_attributes(entry, &name, &e);
                }
            }
            Event::Text(e) => {
                if field.is_some() {
                    buf.push_str(&e.decode()?);
                }
            }
            Event::CData(e) => {
                if field.is_some() {
                    buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(r) => {
                if field.is_some() {
                    match r.resolve_char_ref()? {
                        Some(c) => buf.push(c),
                        None => {
                            let name = r.decode()?;
                            match resolve_predefined_entity(&name) {
                                Some(s) => buf.push_str(s),
                                None => {
                                    buf.push('&');
                                    buf.push_str(&name);
                                    buf.push(';');
                                }
                            }
                        }
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "item" || name == "entry" {
                    if let Some(entry) = current.take() {
                        feed.entries.push(entry);
                    }
                    field = None;
                    continue;
                }
                let closes = matches!(&field, Some((_, open)) if *open == name);
                if !closes {
                    continue;
                }
                let Some((f, _)) = field.take() else {
                    continue;
                };
                let text = buf.trim().to_string();
                match (f, current.as_mut()) {
                    (Field::FeedTitle, _) => feed.title = Some(text),
                    (Field::Title, Some(entry)) => entry.title = text,
                    (Field::Link, Some(entry)) if entry.link.is_empty() => entry.link = text,
                    (Field::Summary, Some(entry)) => entry.summary = text,
                    (Field::Content, Some(entry)) => entry.content = text,
                    (Field::Published, Some(entry)) if entry.published.is_none() || dated_by_update => {
                        entry.published = Some(text);
                        dated_by_update = false;
                    }
                    (Field::Updated, Some(entry)) if entry.published.is_none() => {
                        entry.published = Some(text);
                        dated_by_update = true;
                    }
                    (Field::Source, Some(entry)) => entry.source_name = Some(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(feed)
}

/// Whether `body` looks like an RSS or Atom document.
pub fn looks_like_feed(body: &str) -> bool {
    let head: String = body.chars().take(1024).collect();
    head.contains("<rss") || head.contains("<feed") || head.contains("<rdf:RDF")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Markets &amp; Finance</title>
    <link>https://example.com</link>
    <item>
      <title>Oil &amp; gas rally</title>
      <link>https://example.com/oil</link>
      <description><![CDATA[<p>Brent <b>up</b> 3%</p>]]></description>
      <pubDate>Tue, 10 Jun 2025 14:30:00 GMT</pubDate>
      <media:content url="https://example.com/oil.jpg" medium="image"/>
      <source url="https://www.reuters.com">Reuters</source>
    </item>
    <item>
      <title>Gilts &#8211; a quiet day</title>
      <link>https://example.com/gilts</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Desk</title>
  <entry>
    <title type="html">Fed &lt;em&gt;holds&lt;/em&gt;</title>
    <link rel="self" href="https://example.org/self/1"/>
    <link rel="alternate" href="https://example.org/fed"/>
    <published>2025-06-10T14:30:00Z</published>
    <updated>2025-06-11T09:00:00Z</updated>
    <summary>Rates unchanged</summary>
    <content type="xhtml"><div>Full <b>text</b></div></content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Markets & Finance"));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title, "Oil & gas rally");
        assert_eq!(first.link, "https://example.com/oil");
        assert_eq!(first.summary, "<p>Brent <b>up</b> 3%</p>");
        assert_eq!(first.published.as_deref(), Some("Tue, 10 Jun 2025 14:30:00 GMT"));
        assert_eq!(first.image.as_deref(), Some("https://example.com/oil.jpg"));
        assert_eq!(first.source_name.as_deref(), Some("Reuters"));
        assert_eq!(first.source_url.as_deref(), Some("https://www.reuters.com"));

        let second = &feed.entries[1];
        assert_eq!(second.title, "Gilts \u{2013} a quiet day");
        assert_eq!(second.summary, "");
        assert_eq!(second.published, None);
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Atom Desk"));
        let entry = &feed.entries[0];
        assert_eq!(entry.title, "Fed <em>holds</em>");
        assert_eq!(entry.link, "https://example.org/fed");
        assert_eq!(entry.published.as_deref(), Some("2025-06-10T14:30:00Z"));
        assert_eq!(entry.summary, "Rates unchanged");
        assert_eq!(entry.content, "Full text");
    }

    #[test]
    fn test_atom_prefers_published_over_earlier_updated() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Copper slides</title>
    <link href="https://example.org/copper"/>
    <updated>2025-06-12T08:00:00Z</updated>
    <published>2025-06-10T14:30:00Z</published>
  </entry>
  <entry>
    <title>Revised only</title>
    <link href="https://example.org/revised"/>
    <updated>2025-06-12T09:00:00Z</updated>
  </entry>
</feed>"#;
        let feed = parse_feed(xml).unwrap();
        assert_eq!(feed.entries[0].published.as_deref(), Some("2025-06-10T14:30:00Z"));
        assert_eq!(feed.entries[1].published.as_deref(), Some("2025-06-12T09:00:00Z"));
    }

    #[test]
    fn test_malformed_feed_is_an_error() {
        assert!(parse_feed("<rss><channel><item></channel>").is_err());
    }

    #[test]
    fn test_looks_like_feed() {
        assert!(looks_like_feed(RSS));
        assert!(looks_like_feed(ATOM));
        assert!(!looks_like_feed("<!doctype html><html></html>"));
    }
}

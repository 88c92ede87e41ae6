use chrono::{DateTime, Utc};

use crate::feed::document::{Document, Element};
use crate::feed::timestamp::{self, DateFormat};
use crate::storage::FeedRecord;

/// The single entry node chosen from a document, tagged by feed flavour.
#[derive(Debug, Clone, Copy)]
pub enum EntryNode<'a> {
    /// First `<entry>` of an Atom document.
    Atom(&'a Element),
    /// First `<item>` of an RSS document.
    Rss(&'a Element),
}

impl<'a> EntryNode<'a> {
    /// Pick the first Atom `entry`, or failing that the first RSS `item`.
    ///
    /// Atom wins when a document contains both.
    pub fn detect(document: &'a Document) -> Option<Self> {
        if let Some(entry) = document.first_element("entry") {
            return Some(Self::Atom(entry));
        }
        document.first_element("item").map(Self::Rss)
    }
}

/// Fields pulled out of one entry node before the feed name is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExtractedEntry {
    title: String,
    link: String,
    timestamp_seconds: i64,
}

/// Extract the latest-entry record for a feed document.
///
/// `feed_key` is the URL the document was fetched from. It becomes the
/// record's key and stands in for the display name when the document has
/// no (or an empty) `<title>`.
///
/// Returns `None` only when the document has neither an Atom `entry` nor an
/// RSS `item`. Missing fields inside the entry degrade to empty strings and
/// the fallback timestamp.
pub fn extract(document: &Document, feed_key: &str) -> Option<FeedRecord> {
    extract_at(document, feed_key, Utc::now())
}

/// Same as [`extract`], clamping and falling back relative to `now`.
pub fn extract_at(document: &Document, feed_key: &str, now: DateTime<Utc>) -> Option<FeedRecord> {
    let entry = match EntryNode::detect(document)? {
        EntryNode::Atom(node) => extract_atom(node, now),
        EntryNode::Rss(node) => extract_rss(node, now),
    };

    Some(FeedRecord {
        feed_key: feed_key.to_string(),
        display_name: display_name(document, feed_key),
        title: entry.title,
        link: entry.link,
        timestamp_seconds: entry.timestamp_seconds,
    })
}

fn display_name(document: &Document, feed_key: &str) -> String {
    match document.first_element("title").map(Element::text) {
        Some(name) if !name.is_empty() => name,
        _ => feed_key.to_string(),
    }
}

fn extract_atom(node: &Element, now: DateTime<Utc>) -> ExtractedEntry {
    let title = child_text(node, "title");
    let link = atom_link(node)
        .and_then(|link| link.attr("href"))
        .unwrap_or_default()
        .to_string();

    // `updated` preferred; `published` is only consulted when it is missing or unusable
    let timestamp_seconds = ["updated", "published"]
        .iter()
        .filter_map(|name| node.child(name))
        .find_map(|date| timestamp::resolve_at(&date.text(), DateFormat::OffsetDateTime, now))
        .unwrap_or_else(|| timestamp::fallback_timestamp_at(now));

    ExtractedEntry {
        title,
        link,
        timestamp_seconds,
    }
}

/// The entry's own page: the first `alternate` (or rel-less) link, else the
/// last `link` child.
fn atom_link(node: &Element) -> Option<&Element> {
    let mut last = None;
    for link in node.child_elements().filter(|child| child.name() == "link") {
        if matches!(link.attr("rel"), None | Some("alternate")) {
            return Some(link);
        }
        last = Some(link);
    }
    last
}

fn extract_rss(node: &Element, now: DateTime<Utc>) -> ExtractedEntry {
    let title = child_text(node, "title");
    let link = child_text(node, "link");
    let timestamp_seconds = node
        .child("pubDate")
        .and_then(|date| timestamp::resolve_at(&date.text(), DateFormat::Rfc1123, now))
        .unwrap_or_else(|| timestamp::fallback_timestamp_at(now));

    ExtractedEntry {
        title,
        link,
        timestamp_seconds,
    }
}

fn child_text(node: &Element, name: &str) -> String {
    node.child(name).map(Element::text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const FEED_URL: &str = "https://example.com/feed.xml";

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn parse(xml: &str) -> Document {
        Document::parse(xml.as_bytes()).unwrap()
    }

    #[test]
    fn test_atom_entry() {
        let doc = parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Feed A</title>
  <updated>2024-10-02T15:00:00Z</updated>
  <entry>
    <title>Hello</title>
    <link href="http://x/1"/>
    <id>urn:uuid:1</id>
    <updated>2024-10-02T15:00:00Z</updated>
  </entry>
  <entry>
    <title>Older</title>
    <link href="http://x/0"/>
    <updated>2024-10-01T15:00:00Z</updated>
  </entry>
</feed>"#,
        );

        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(
            record,
            FeedRecord {
                feed_key: FEED_URL.to_string(),
                display_name: "Feed A".to_string(),
                title: "Hello".to_string(),
                link: "http://x/1".to_string(),
                timestamp_seconds: 1727881200,
            }
        );
    }

    #[test]
    fn test_atom_future_date_is_clamped() {
        let doc = parse(
            r#"<feed><title>Feed A</title><entry><title>Hello</title><link href="http://x/1"/><updated>2999-01-01T00:00:00Z</updated></entry></feed>"#,
        );

        let record = extract_at(&doc, FEED_URL, fixed_now()).unwrap();

        assert_eq!(record.title, "Hello");
        assert_eq!(record.link, "http://x/1");
        assert_eq!(record.timestamp_seconds, fixed_now().timestamp());
    }

    #[test]
    fn test_atom_published_used_when_updated_missing() {
        let doc = parse(
            "<feed><entry><published>2024-10-02T15:00:00Z</published></entry></feed>",
        );
        assert_eq!(extract(&doc, FEED_URL).unwrap().timestamp_seconds, 1727881200);
    }

    #[test]
    fn test_atom_updated_preferred_over_published() {
        let doc = parse(
            "<feed><entry>\
               <published>2024-01-01T00:00:00Z</published>\
               <updated>2024-10-02T15:00:00Z</updated>\
             </entry></feed>",
        );
        assert_eq!(extract(&doc, FEED_URL).unwrap().timestamp_seconds, 1727881200);
    }

    #[test]
    fn test_atom_unparseable_updated_falls_through_to_published() {
        let doc = parse(
            "<feed><entry>\
               <updated>not a date</updated>\
               <published>2024-10-02T15:00:00Z</published>\
             </entry></feed>",
        );
        assert_eq!(extract(&doc, FEED_URL).unwrap().timestamp_seconds, 1727881200);
    }

    #[test]
    fn test_atom_missing_fields_default() {
        let doc = parse("<feed><title>Feed</title><entry><id>1</id></entry></feed>");

        let record = extract_at(&doc, FEED_URL, fixed_now()).unwrap();
        assert_eq!(record.title, "");
        assert_eq!(record.link, "");
        assert_eq!(
            record.timestamp_seconds,
            timestamp::fallback_timestamp_at(fixed_now())
        );
    }

    #[test]
    fn test_atom_link_without_href_is_empty() {
        let doc = parse("<feed><entry><link>http://x/1</link></entry></feed>");
        assert_eq!(extract(&doc, FEED_URL).unwrap().link, "");
    }

    #[test]
    fn test_atom_link_prefers_alternate() {
        let doc = parse(
            r#"<feed><entry>
  <link rel="replies" href="http://c/comments"/>
  <link rel="alternate" href="http://c/post"/>
  <link rel="self" href="http://c/self"/>
</entry></feed>"#,
        );
        assert_eq!(extract(&doc, FEED_URL).unwrap().link, "http://c/post");

        let doc = parse(
            r#"<feed><entry><link rel="edit" href="http://c/edit"/><link href="http://c/plain"/></entry></feed>"#,
        );
        assert_eq!(extract(&doc, FEED_URL).unwrap().link, "http://c/plain");
    }

    #[test]
    fn test_atom_link_without_alternate_takes_last() {
        let doc = parse(
            r#"<feed><entry>
  <link rel="replies" href="http://c/comments"/>
  <link rel="edit" href="http://c/edit"/>
</entry></feed>"#,
        );
        assert_eq!(extract(&doc, FEED_URL).unwrap().link, "http://c/edit");
    }

    #[test]
    fn test_one_now_per_extraction() {
        let doc = parse("<feed><entry><title>Undated</title></entry></feed>");
        let first = extract_at(&doc, FEED_URL, fixed_now()).unwrap();
        let later = fixed_now() + chrono::Duration::minutes(5);
        let second = extract_at(&doc, FEED_URL, later).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rss_item() {
        let doc = parse(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Feed B</title>
  <link>https://example.com/</link>
  <item>
    <title>First</title>
    <link>https://example.com/1</link>
    <pubDate>Wed, 02 Oct 2024 15:00:00 GMT</pubDate>
  </item>
  <item><title>Second</title></item>
</channel></rss>"#,
        );

        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(record.display_name, "Feed B");
        assert_eq!(record.title, "First");
        assert_eq!(record.link, "https://example.com/1");
        assert_eq!(record.timestamp_seconds, 1727881200);
    }

    #[test]
    fn test_rss_ignores_namespaced_link_and_title() {
        let doc = parse(
            r#"<rss xmlns:atom="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/">
<channel><title>B</title><item>
  <atom:link href="http://self" rel="self"/>
  <media:title>thumbnail</media:title>
  <title>Real</title>
  <link>http://r/1</link>
</item></channel></rss>"#,
        );

        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(record.title, "Real");
        assert_eq!(record.link, "http://r/1");
    }

    #[test]
    fn test_rss_missing_pub_date_uses_fallback() {
        let doc = parse("<rss><channel><title>B</title><item><title>x</title></item></channel></rss>");

        let record = extract_at(&doc, FEED_URL, fixed_now()).unwrap();
        assert_eq!(
            record.timestamp_seconds,
            timestamp::fallback_timestamp_at(fixed_now())
        );
    }

    #[test]
    fn test_rss_bad_pub_date_uses_fallback() {
        let doc = parse(
            "<rss><channel><item><pubDate>2024-10-02T15:00:00Z</pubDate></item></channel></rss>",
        );

        let record = extract_at(&doc, FEED_URL, fixed_now()).unwrap();
        assert_eq!(
            record.timestamp_seconds,
            timestamp::fallback_timestamp_at(fixed_now())
        );
    }

    #[test]
    fn test_atom_takes_precedence_over_rss() {
        let doc = parse(
            r#"<rss><channel>
  <item><title>rss item</title><link>http://rss/1</link></item>
  <entry><title>atom entry</title><link href="http://atom/1"/></entry>
</channel></rss>"#,
        );

        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(record.title, "atom entry");
        assert_eq!(record.link, "http://atom/1");
    }

    #[test]
    fn test_no_entry_is_absent() {
        let doc = parse("<rss><channel><title>Empty</title></channel></rss>");
        assert!(extract(&doc, FEED_URL).is_none());
    }

    #[test]
    fn test_missing_feed_title_uses_url() {
        let doc = parse("<rss><channel><item><title>x</title></item></channel></rss>");
        // The item's title is the first <title> in document order
        assert_eq!(extract(&doc, FEED_URL).unwrap().display_name, "x");

        let doc = parse("<rss><channel><item><link>l</link></item></channel></rss>");
        assert_eq!(extract(&doc, FEED_URL).unwrap().display_name, FEED_URL);
    }

    #[test]
    fn test_empty_feed_title_uses_url() {
        let doc = parse("<feed><title></title><entry><title>Hi</title></entry></feed>");
        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(record.display_name, FEED_URL);
        assert_eq!(record.title, "Hi");
    }

    #[test]
    fn test_whitespace_title_kept_literally() {
        let doc = parse("<feed><title>   </title><entry><title> </title></entry></feed>");
        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(record.display_name, "   ");
        assert_eq!(record.title, " ");
    }

    #[test]
    fn test_unknown_children_ignored() {
        let doc = parse(
            r#"<feed><entry>
  <author><name>someone</name></author>
  <title type="html">Tagged &amp; escaped</title>
  <summary>ignored</summary>
  <link rel="alternate" href="http://x/2"/>
</entry></feed>"#,
        );

        let record = extract(&doc, FEED_URL).unwrap();
        assert_eq!(record.title, "Tagged & escaped");
        assert_eq!(record.link, "http://x/2");
    }

    #[test]
    fn test_detect_variants() {
        let atom = parse("<feed><entry/></feed>");
        assert!(matches!(EntryNode::detect(&atom), Some(EntryNode::Atom(_))));

        let rss = parse("<rss><channel><item/></channel></rss>");
        assert!(matches!(EntryNode::detect(&rss), Some(EntryNode::Rss(_))));

        let neither = parse("<html><body/></html>");
        assert!(EntryNode::detect(&neither).is_none());
    }
}

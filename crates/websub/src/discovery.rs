//! Link discovery
//!
//! Decides whether fetched topic content still advertises this hub. Links
//! come from three places, in order: the `Link` response header, feed
//! metadata (`atom:link` elements in Atom/RSS/RDF documents) and HTML
//! `<link>` elements. Targets may be relative and are resolved against the
//! topic URL; a link counts when its `rel` value carries the `hub` token.

use encoding_rs::{Encoding, UTF_8};
use mime::Mime;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use url::Url;

/// A link in `{target, attributes}` shape, wherever it was found
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLink {
    /// The link target, possibly relative
    pub target: String,
    /// Attribute name/value pairs (`rel`, `type`, …)
    pub attributes: Vec<(String, String)>,
}

impl DiscoveredLink {
    /// First value for an attribute name, case-insensitively
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the `rel` value contains the given space-separated token
    pub fn rel_contains(&self, token: &str) -> bool {
        self.attribute("rel")
            .map(|rel| {
                rel.split_ascii_whitespace()
                    .any(|t| t.eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    }
}

/// Splits a Link header into link-values on commas that sit outside
/// `<...>` targets and quoted parameter values.
fn split_link_values(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_target = false;
    let mut in_quotes = false;

    for (i, c) in value.char_indices() {
        match c {
            '<' if !in_quotes => in_target = true,
            '>' if !in_quotes => in_target = false,
            '"' if !in_target => in_quotes = !in_quotes,
            ',' if !in_target && !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&value[start..]);
    parts
}

/// Parses one `Link` header value into links.
///
/// Accepts the common shape `<target>; rel="hub"; type=text/html` and keeps
/// every parameter as an attribute.
pub fn parse_link_header(value: &str) -> Vec<DiscoveredLink> {
    split_link_values(value)
        .into_iter()
        .filter_map(|link_value| {
            let link_value = link_value.trim();
            let rest = link_value.strip_prefix('<')?;
            let (target, params) = rest.split_once('>')?;

            let attributes = params
                .split(';')
                .filter_map(|param| {
                    let (name, value) = param.trim().split_once('=')?;
                    let value = value.trim().trim_matches('"');
                    Some((name.trim().to_ascii_lowercase(), value.to_owned()))
                })
                .collect();

            Some(DiscoveredLink {
                target: target.to_owned(),
                attributes,
            })
        })
        .collect()
}

enum MediaFamily {
    Html,
    Xml,
    Other,
}

fn media_family(mime: Option<&Mime>) -> MediaFamily {
    let Some(mime) = mime else {
        return MediaFamily::Other;
    };

    if mime.type_() == mime::TEXT && mime.subtype() == mime::HTML {
        return MediaFamily::Html;
    }

    if mime.subtype() == "xhtml" && mime.suffix() == Some(mime::XML) {
        return MediaFamily::Html;
    }

    if mime.subtype() == mime::XML || mime.suffix() == Some(mime::XML) {
        return MediaFamily::Xml;
    }

    MediaFamily::Other
}

/// Decodes the body to UTF-8 per the declared charset, substituting on
/// unmappable bytes.
fn body_to_utf8<'a>(mime: Option<&Mime>, body: &'a [u8]) -> std::borrow::Cow<'a, str> {
    let encoding = mime
        .and_then(|m| m.get_param(mime::CHARSET))
        .and_then(|cs| Encoding::for_label(cs.as_str().as_bytes()))
        .unwrap_or(UTF_8);

    encoding.decode(body).0
}

/// `atom:link` elements in feed metadata. Links inside entries/items belong
/// to the entries, not the feed, and are skipped.
fn feed_links(text: &str) -> Vec<DiscoveredLink> {
    let mut reader = Reader::from_str(text);
    let mut links = Vec::new();
    let mut entry_depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                match element.local_name().as_ref() {
                    b"entry" | b"item" => entry_depth += 1,
                    b"link" if entry_depth == 0 => {
                        if let Some(link) = element_link(&element) {
                            links.push(link);
                        }
                    }
                    _ => {}
                };
            }
            Ok(Event::Empty(element)) => {
                if element.local_name().as_ref() == b"link" && entry_depth == 0 {
                    if let Some(link) = element_link(&element) {
                        links.push(link);
                    }
                }
            }
            Ok(Event::End(element)) => {
                if matches!(element.local_name().as_ref(), b"entry" | b"item") {
                    entry_depth = entry_depth.saturating_sub(1);
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                tracing::debug!("Stopping feed link extraction on XML error: {}", err);
                break;
            }
            Ok(_) => {}
        }
    }

    links
}

fn element_link(element: &quick_xml::events::BytesStart<'_>) -> Option<DiscoveredLink> {
    let mut target = None;
    let mut attributes = Vec::new();

    for attribute in element.attributes().flatten() {
        let name = String::from_utf8_lossy(attribute.key.local_name().as_ref()).to_lowercase();
        let value = attribute.unescape_value().ok()?.into_owned();

        if name == "href" {
            target = Some(value.clone());
        }
        attributes.push((name, value));
    }

    // RSS's own <link> carries its target as text content and no rel;
    // only href-style links participate in discovery.
    target.map(|target| DiscoveredLink { target, attributes })
}

/// Every `<link>` element in an HTML document
fn html_links(text: &str) -> Vec<DiscoveredLink> {
    let document = Html::parse_document(text);
    let selector = match Selector::parse("link") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|element| {
            let target = element.value().attr("href")?.to_owned();
            let attributes = element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.to_owned()))
                .collect();

            Some(DiscoveredLink { target, attributes })
        })
        .collect()
}

/// All links advertised by a response: header links first, then links
/// extracted from the body per its media type.
pub fn discover_links(
    link_headers: &[String],
    content_type: Option<&str>,
    body: &[u8],
) -> Vec<DiscoveredLink> {
    let mut links: Vec<DiscoveredLink> = link_headers
        .iter()
        .flat_map(|value| parse_link_header(value))
        .collect();

    let mime = content_type.and_then(|ct| ct.parse::<Mime>().ok());

    match media_family(mime.as_ref()) {
        MediaFamily::Html => links.extend(html_links(&body_to_utf8(mime.as_ref(), body))),
        MediaFamily::Xml => links.extend(feed_links(&body_to_utf8(mime.as_ref(), body))),
        MediaFamily::Other => {}
    }

    links
}

/// Whether the discovered `rel=hub` set includes this hub.
///
/// Targets are resolved against the topic URL before comparison, so
/// relative hub links work.
pub fn hub_listed(
    self_url: &str,
    topic_url: &str,
    link_headers: &[String],
    content_type: Option<&str>,
    body: &[u8],
) -> bool {
    let Ok(self_url) = Url::parse(self_url) else {
        return false;
    };
    let Ok(topic_url) = Url::parse(topic_url) else {
        return false;
    };

    discover_links(link_headers, content_type, body)
        .iter()
        .filter(|link| link.rel_contains("hub"))
        .filter_map(|link| topic_url.join(&link.target).ok())
        .any(|resolved| resolved == self_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUB: &str = "https://hub.example.com/";
    const TOPIC: &str = "https://example.com/blog/feed";

    #[test]
    fn link_header_with_hub() {
        let headers = vec![format!(
            r#"<{HUB}>; rel="hub", <{TOPIC}>; rel="self""#
        )];
        assert!(hub_listed(HUB, TOPIC, &headers, None, b""));
    }

    #[test]
    fn link_header_without_hub() {
        let headers = vec![format!(r#"<{TOPIC}>; rel="self""#)];
        assert!(!hub_listed(HUB, TOPIC, &headers, None, b""));
    }

    #[test]
    fn link_header_multi_token_rel() {
        let headers = vec![format!(r#"<{HUB}>; rel="hub websub""#)];
        assert!(hub_listed(HUB, TOPIC, &headers, None, b""));
    }

    #[test]
    fn link_header_comma_inside_target_survives() {
        let links = parse_link_header(
            r#"<https://example.com/a,b>; rel="self", <https://hub.example.com/>; rel="hub""#,
        );
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "https://example.com/a,b");
        assert!(links[1].rel_contains("hub"));
    }

    #[test]
    fn atom_feed_hub_link() {
        let body = format!(
            r#"<?xml version="1.0"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <title>Blog</title>
              <link rel="hub" href="{HUB}"/>
              <link rel="self" href="{TOPIC}"/>
              <entry><link rel="hub" href="https://evil.example.net/"/></entry>
            </feed>"#
        );
        assert!(hub_listed(
            HUB,
            TOPIC,
            &[],
            Some("application/atom+xml"),
            body.as_bytes()
        ));
        // The entry-level link never counts as feed metadata
        assert!(!hub_listed(
            "https://evil.example.net/",
            TOPIC,
            &[],
            Some("application/atom+xml"),
            body.as_bytes()
        ));
    }

    #[test]
    fn rss_channel_atom_link() {
        let body = format!(
            r#"<?xml version="1.0"?>
            <rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
              <channel>
                <title>Blog</title>
                <link>https://example.com/blog/</link>
                <atom:link rel="hub" href="{HUB}"/>
                <item><title>Post</title><link>https://example.com/blog/1</link></item>
              </channel>
            </rss>"#
        );
        assert!(hub_listed(
            HUB,
            TOPIC,
            &[],
            Some("application/rss+xml"),
            body.as_bytes()
        ));
    }

    #[test]
    fn html_link_elements() {
        let body = format!(
            r#"<!DOCTYPE html>
            <html><head>
              <link rel="stylesheet" href="/style.css">
              <link rel="hub" href="{HUB}">
            </head><body></body></html>"#
        );
        assert!(hub_listed(HUB, TOPIC, &[], Some("text/html"), body.as_bytes()));
    }

    #[test]
    fn relative_hub_link_resolves_against_topic() {
        let body = r#"<html><head><link rel="hub" href="/hub"></head></html>"#;
        assert!(hub_listed(
            "https://example.com/hub",
            TOPIC,
            &[],
            Some("text/html"),
            body.as_bytes()
        ));
    }

    #[test]
    fn non_utf8_charset_is_transcoded() {
        // "café" in windows-1252, in an HTML doc carrying a hub link
        let mut body = Vec::new();
        body.extend_from_slice(b"<html><head><title>caf\xe9</title><link rel=\"hub\" href=\"");
        body.extend_from_slice(HUB.as_bytes());
        body.extend_from_slice(b"\"></head></html>");
        assert!(hub_listed(
            HUB,
            TOPIC,
            &[],
            Some("text/html; charset=windows-1252"),
            &body
        ));
    }

    #[test]
    fn plain_media_types_only_use_headers() {
        let body = format!(r#"<link rel="hub" href="{HUB}">"#);
        assert!(!hub_listed(
            HUB,
            TOPIC,
            &[],
            Some("text/plain"),
            body.as_bytes()
        ));
    }

    #[test]
    fn header_links_come_first() {
        let headers = vec![format!(r#"<{HUB}>; rel="hub""#)];
        let body = format!(r#"<html><head><link rel="hub" href="{HUB}"></head></html>"#);
        let links = discover_links(&headers, Some("text/html"), body.as_bytes());
        assert_eq!(links.len(), 2);
        assert!(links[0].rel_contains("hub"));
    }
}

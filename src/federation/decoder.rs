//! Wire decoding of pushed feeds
//!
//! Turns a delivery body into an `IncomingFeed`. Atom and RSS go through
//! `feed-rs`; JSON bodies use the serde representation of the models.

use feed_rs::model::{Entry, Person, Text};
use feed_rs::parser;
use serde::{Deserialize, Serialize};

use crate::data::{ActivityPayload, FeedMetadata, NewActivity, NewAuthor, TypedText};
use crate::error::AppError;

/// A parsed feed as pushed by a hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingFeed {
    /// Feed-level identifier from the document (Atom `<id>`)
    #[serde(default)]
    pub id: Option<String>,
    /// `rel="self"` link, when the document carries one
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub metadata: FeedMetadata,
    #[serde(default)]
    pub authors: Vec<NewAuthor>,
    #[serde(default)]
    pub contributors: Vec<NewAuthor>,
    #[serde(default)]
    pub entries: Vec<NewActivity>,
}

/// Decodes delivery bodies
pub trait FeedDecoder: Send + Sync {
    /// Parse `body` according to the request `Content-Type`
    fn decode(&self, body: &[u8], content_type: Option<&str>) -> Result<IncomingFeed, AppError>;
}

/// Body format selected from the `Content-Type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Xml,
    Json,
}

fn wire_format(content_type: Option<&str>) -> Result<WireFormat, AppError> {
    let Some(content_type) = content_type else {
        return Ok(WireFormat::Xml);
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "" | "application/atom+xml" | "application/rss+xml" | "application/xml" | "text/xml" => {
            Ok(WireFormat::Xml)
        }
        "application/json" | "application/activity+json" => Ok(WireFormat::Json),
        other if other.ends_with("+json") => Ok(WireFormat::Json),
        other if other.ends_with("+xml") => Ok(WireFormat::Xml),
        other => Err(AppError::Validation(format!(
            "Unsupported content type: {}",
            other
        ))),
    }
}

/// Default decoder for Atom, RSS and JSON deliveries
#[derive(Debug, Clone, Default)]
pub struct WireDecoder;

impl WireDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_json(&self, body: &[u8]) -> Result<IncomingFeed, AppError> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid feed document: {}", e)))
    }

    fn decode_xml(&self, body: &[u8]) -> Result<IncomingFeed, AppError> {
        let feed = parser::parse(body)
            .map_err(|e| AppError::Validation(format!("Invalid feed document: {}", e)))?;

        let hubs = feed
            .links
            .iter()
            .filter(|link| link.rel.as_deref() == Some("hub"))
            .map(|link| link.href.clone())
            .collect();
        let url = feed
            .links
            .iter()
            .find(|link| link.rel.as_deref() == Some("self"))
            .map(|link| link.href.clone());

        let metadata = FeedMetadata {
            title: feed.title.as_ref().map(typed_text),
            subtitle: feed.description.as_ref().map(typed_text),
            rights: feed.rights.as_ref().map(|rights| rights.content.clone()),
            icon: feed.icon.as_ref().map(|icon| icon.uri.clone()),
            logo: feed.logo.as_ref().map(|logo| logo.uri.clone()),
            generator: feed
                .generator
                .as_ref()
                .map(|generator| generator.content.clone()),
            categories: feed
                .categories
                .iter()
                .map(|category| category.term.clone())
                .collect(),
            hubs,
        };

        let entries = feed.entries.iter().map(entry_to_activity).collect();

        Ok(IncomingFeed {
            id: Some(feed.id.clone()).filter(|id| !id.is_empty()),
            url,
            metadata,
            authors: feed.authors.iter().map(person_to_author).collect(),
            contributors: feed.contributors.iter().map(person_to_author).collect(),
            entries,
        })
    }
}

impl FeedDecoder for WireDecoder {
    fn decode(&self, body: &[u8], content_type: Option<&str>) -> Result<IncomingFeed, AppError> {
        match wire_format(content_type)? {
            WireFormat::Xml => self.decode_xml(body),
            WireFormat::Json => self.decode_json(body),
        }
    }
}

/// Map a MIME type to the Atom text construct type
fn text_type(essence: &str) -> &'static str {
    match essence {
        "text/html" => "html",
        "application/xhtml+xml" => "xhtml",
        _ => "text",
    }
}

fn typed_text(text: &Text) -> TypedText {
    TypedText {
        content: text.content.clone(),
        text_type: text_type(&text.content_type.essence().to_string()).to_string(),
    }
}

/// Stable identity of a person: profile URI, then mail address, then name
fn person_to_author(person: &Person) -> NewAuthor {
    let external_id = person
        .uri
        .clone()
        .or_else(|| person.email.as_ref().map(|email| format!("mailto:{}", email)))
        .unwrap_or_else(|| person.name.clone());

    NewAuthor {
        external_id,
        name: person.name.clone(),
        uri: person.uri.clone(),
        email: person.email.clone(),
    }
}

fn entry_to_activity(entry: &Entry) -> NewActivity {
    let (content, content_type) = match (&entry.content, &entry.summary) {
        (Some(content), _) if content.body.is_some() => (
            content.body.clone().unwrap_or_default(),
            text_type(&content.content_type.essence().to_string()),
        ),
        (_, Some(summary)) => (
            summary.content.clone(),
            text_type(&summary.content_type.essence().to_string()),
        ),
        _ => (
            entry
                .title
                .as_ref()
                .map(|title| title.content.clone())
                .unwrap_or_default(),
            "text",
        ),
    };

    let url = entry
        .links
        .iter()
        .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|link| link.href.clone());

    NewActivity {
        external_id: entry.id.clone(),
        payload: ActivityPayload::Note {
            content,
            content_type: content_type.to_string(),
        },
        actor: entry.authors.first().map(person_to_author),
        url,
        source: None,
        in_reply_to: None,
        published_at: entry.published,
        updated_at: entry.updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>tag:remote.example,2024:feed</id>
  <title type="html">Alice &amp;amp; friends</title>
  <subtitle>Status updates</subtitle>
  <rights>CC-BY</rights>
  <icon>https://remote.example/icon.png</icon>
  <logo>https://remote.example/logo.png</logo>
  <generator>remote-pond</generator>
  <category term="pond"/>
  <link rel="self" href="http://a/feed"/>
  <link rel="hub" href="https://hub.example.com/"/>
  <author>
    <name>Alice</name>
    <uri>https://remote.example/alice</uri>
  </author>
  <contributor>
    <name>Bob</name>
    <email>bob@remote.example</email>
  </contributor>
  <updated>2024-01-02T00:00:00Z</updated>
  <entry>
    <id>E1</id>
    <title>First</title>
    <link rel="alternate" href="https://remote.example/notes/1"/>
    <updated>2024-01-01T00:00:00Z</updated>
    <content type="html">&lt;p&gt;hello&lt;/p&gt;</content>
    <author><name>Carol</name></author>
  </entry>
  <entry>
    <id>E2</id>
    <title>Second</title>
    <updated>2024-01-02T00:00:00Z</updated>
    <summary>just a summary</summary>
  </entry>
</feed>"#;

    #[test]
    fn atom_metadata_and_hubs_are_decoded() {
        let feed = WireDecoder::new()
            .decode(ATOM_FEED.as_bytes(), Some("application/atom+xml"))
            .unwrap();

        assert_eq!(feed.url.as_deref(), Some("http://a/feed"));
        assert_eq!(feed.metadata.hubs, vec!["https://hub.example.com/"]);
        assert_eq!(
            feed.metadata.subtitle.as_ref().map(|s| s.content.as_str()),
            Some("Status updates")
        );
        assert_eq!(feed.metadata.rights.as_deref(), Some("CC-BY"));
        assert_eq!(
            feed.metadata.icon.as_deref(),
            Some("https://remote.example/icon.png")
        );
        assert_eq!(feed.metadata.generator.as_deref(), Some("remote-pond"));
        assert_eq!(feed.metadata.categories, vec!["pond"]);
    }

    #[test]
    fn atom_people_get_stable_external_ids() {
        let feed = WireDecoder::new()
            .decode(ATOM_FEED.as_bytes(), None)
            .unwrap();

        assert_eq!(feed.authors.len(), 1);
        assert_eq!(feed.authors[0].external_id, "https://remote.example/alice");
        assert_eq!(feed.contributors[0].external_id, "mailto:bob@remote.example");

        let actor = feed.entries[0].actor.as_ref().unwrap();
        assert_eq!(actor.external_id, "Carol");
    }

    #[test]
    fn atom_entries_become_notes() {
        let feed = WireDecoder::new()
            .decode(ATOM_FEED.as_bytes(), Some("application/atom+xml; charset=utf-8"))
            .unwrap();

        assert_eq!(feed.entries.len(), 2);
        let first = &feed.entries[0];
        assert_eq!(first.external_id, "E1");
        assert_eq!(first.url.as_deref(), Some("https://remote.example/notes/1"));
        match &first.payload {
            ActivityPayload::Note {
                content,
                content_type,
            } => {
                assert!(content.contains("hello"));
                assert_eq!(content_type, "html");
            }
            other => panic!("expected note, got {:?}", other),
        }

        match &feed.entries[1].payload {
            ActivityPayload::Note { content, .. } => assert_eq!(content, "just a summary"),
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn json_documents_carry_tagged_payloads() {
        let body = serde_json::json!({
            "url": "http://a/feed",
            "title": { "content": "Alice", "type": "text" },
            "hubs": ["https://hub.example.com/"],
            "entries": [
                { "external_id": "E1", "type": "note", "content": "hi" },
                { "external_id": "E2", "type": "favorite_notice", "target": "E1" }
            ]
        });

        let feed = WireDecoder::new()
            .decode(body.to_string().as_bytes(), Some("application/json"))
            .unwrap();

        assert_eq!(feed.metadata.title, Some(TypedText::plain("Alice")));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(
            feed.entries[1].payload,
            ActivityPayload::FavoriteNotice {
                target: "E1".to_string()
            }
        );
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let decoder = WireDecoder::new();
        assert!(matches!(
            decoder.decode(b"hello", Some("application/atom+xml")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            decoder.decode(b"hello", Some("application/json")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn unsupported_content_type_is_rejected() {
        let result = WireDecoder::new().decode(b"hello", Some("image/png"));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}

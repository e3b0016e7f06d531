//! Turns raw fetched feed content into normalized candidate items.
//!
//! A feed's configuration decides how its content is interpreted: the
//! content format selects the item block and field tags, and the time
//! format is the strftime pattern its publish dates are parsed with.
//! Nothing is auto-detected. A single malformed item aborts the whole
//! feed so the freshness watermark never describes a partial ingest.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Supported feed content formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Rss,
    Atom,
}

impl FromStr for ContentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rss" => Ok(ContentFormat::Rss),
            "atom" => Ok(ContentFormat::Atom),
            other => Err(Error::MalformedItem(format!(
                "unknown content format '{other}'"
            ))),
        }
    }
}

impl ContentFormat {
    fn item_tags(&self) -> (&'static str, &'static str) {
        match self {
            ContentFormat::Rss => ("<item>", "</item>"),
            ContentFormat::Atom => ("<entry>", "</entry>"),
        }
    }

    fn description_tag(&self) -> &'static str {
        match self {
            ContentFormat::Rss => "description",
            ContentFormat::Atom => "summary",
        }
    }

    fn date_tag(&self) -> &'static str {
        match self {
            ContentFormat::Rss => "pubDate",
            ContentFormat::Atom => "published",
        }
    }
}

/// A normalized item candidate, not yet bound to a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub url: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

/// Parse raw feed content into candidate items.
///
/// Empty content yields an empty list, not an error. Any item missing a
/// required field, or carrying an unparsable publish date, fails the
/// whole document with [`Error::MalformedItem`].
pub fn parse_items(
    content: &str,
    format: ContentFormat,
    time_format: &str,
) -> Result<Vec<ParsedItem>> {
    let (open_tag, close_tag) = format.item_tags();

    let mut items = Vec::new();
    for block in content.split(open_tag).skip(1) {
        let end = block.find(close_tag).unwrap_or(block.len());
        items.push(parse_item_block(&block[..end], format, time_format)?);
    }
    Ok(items)
}

fn parse_item_block(
    block: &str,
    format: ContentFormat,
    time_format: &str,
) -> Result<ParsedItem> {
    let title = required_element(block, "title")?;
    let description = required_element(block, format.description_tag())?;

    let url = match format {
        ContentFormat::Rss => extract_element(block, "link"),
        ContentFormat::Atom => extract_link_href(block),
    }
    .filter(|v| !v.is_empty())
    .ok_or_else(|| Error::MalformedItem("item is missing its link".to_string()))?;

    let raw_date = required_element(block, format.date_tag())?;
    let published_at = parse_timestamp(&raw_date, time_format)?;

    Ok(ParsedItem {
        url,
        title,
        description,
        published_at,
    })
}

fn required_element(block: &str, tag: &str) -> Result<String> {
    extract_element(block, tag)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MalformedItem(format!("item is missing its {tag}")))
}

/// Extract the text content of the first `<tag>...</tag>` pair,
/// unwrapping a CDATA section if present.
fn extract_element(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml[start..].find(&end_tag)? + start;

    let value = xml[start..end].trim();
    let value = value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .unwrap_or(value);

    Some(value.trim().to_string())
}

/// Atom links live in an `href` attribute rather than element text.
fn extract_link_href(xml: &str) -> Option<String> {
    let link = xml.find("<link")?;
    let rest = &xml[link..];
    let href = rest.find("href=\"")? + "href=\"".len();
    let end = rest[href..].find('"')? + href;
    Some(rest[href..end].to_string())
}

/// Parse a publish date with the feed's configured pattern, normalized
/// to UTC. An explicit zone offset is preserved; a zoneless timestamp is
/// interpreted as UTC.
pub fn parse_timestamp(raw: &str, time_format: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(raw, time_format) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, time_format)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| Error::MalformedItem(format!("unparsable publish date '{raw}': {e}")))
}

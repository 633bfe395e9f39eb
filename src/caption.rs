//! Caption generation
//!
//! `Reminder – Day {day}` followed by up to twenty hashtags. Tags come from the
//! trending-searches RSS feed, or from a shuffled static list when the feed is
//! unreachable or empty.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

pub const MAX_TAGS: usize = 20;
const MAX_FEED_TAGS: usize = 30;
const FEED_TIMEOUT: Duration = Duration::from_secs(15);

pub const FALLBACK_TAGS: [&str; 20] = [
    "instagood",
    "photooftheday",
    "fashion",
    "beautiful",
    "happy",
    "cute",
    "followme",
    "picoftheday",
    "art",
    "nature",
    "style",
    "travel",
    "fitness",
    "love",
    "music",
    "motivation",
    "life",
    "inspiration",
    "friends",
    "explore",
];

#[async_trait]
pub trait TagSource: Send + Sync {
    /// Never fails; sources fall back to static tags.
    async fn tags(&self) -> Vec<String>;
}

/// Static tags in random order.
#[derive(Debug, Default)]
pub struct StaticTags;

#[async_trait]
impl TagSource for StaticTags {
    async fn tags(&self) -> Vec<String> {
        shuffled_fallback()
    }
}

pub struct TrendFeedTags {
    feed_url: String,
    client: reqwest::Client,
}

impl TrendFeedTags {
    pub fn new(feed_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            feed_url: feed_url.into(),
            client,
        }
    }

    async fn fetch(&self) -> Result<Vec<String>, reqwest::Error> {
        let body = self
            .client
            .get(&self.feed_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(feed_titles(&body)
            .into_iter()
            .map(|title| normalize_tag(&title))
            .filter(|tag| !tag.is_empty())
            .take(MAX_FEED_TAGS)
            .collect())
    }
}

#[async_trait]
impl TagSource for TrendFeedTags {
    async fn tags(&self) -> Vec<String> {
        match self.fetch().await {
            Ok(tags) if !tags.is_empty() => {
                debug!(count = tags.len(), "trending tags fetched");
                tags
            }
            Ok(_) => {
                warn!(feed = %self.feed_url, "trend feed empty, using static tags");
                shuffled_fallback()
            }
            Err(err) => {
                warn!(feed = %self.feed_url, %err, "trend feed unavailable, using static tags");
                shuffled_fallback()
            }
        }
    }
}

pub fn caption_for(day: u64, tags: &[String]) -> String {
    let hashtags = tags
        .iter()
        .map(|tag| normalize_tag(tag))
        .filter(|tag| !tag.is_empty())
        .take(MAX_TAGS)
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("Reminder – Day {day}\n\n{hashtags}")
}

fn shuffled_fallback() -> Vec<String> {
    let mut tags: Vec<String> = FALLBACK_TAGS.iter().map(|t| t.to_string()).collect();
    tags.shuffle(&mut rand::thread_rng());
    tags
}

fn normalize_tag(raw: &str) -> String {
    raw.trim_start_matches('#')
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// `<title>` of every `<item>` in an RSS document.
fn feed_titles(xml: &str) -> Vec<String> {
    xml.split("<item>")
        .skip(1)
        .filter_map(|item| {
            let start = item.find("<title>")? + "<title>".len();
            let end = item[start..].find("</title>")? + start;
            let title = item[start..end].trim();
            let title = title
                .strip_prefix("<![CDATA[")
                .and_then(|t| t.strip_suffix("]]>"))
                .unwrap_or(title);
            Some(unescape(title))
        })
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_caps_and_normalizes_tags() {
        let tags: Vec<String> = (0..25).map(|i| format!("Tag Number {i}")).collect();
        let caption = caption_for(5, &tags);
        let (head, body) = caption.split_once("\n\n").unwrap();
        assert_eq!(head, "Reminder – Day 5");
        let words: Vec<&str> = body.split(' ').collect();
        assert_eq!(words.len(), MAX_TAGS);
        assert_eq!(words[0], "#tagnumber0");
    }

    #[test]
    fn rss_titles_are_extracted() {
        let xml = "<rss><channel><title>Daily</title>\
            <item><title>World Cup</title></item>\
            <item><title><![CDATA[Tom &amp; Jerry]]></title></item></channel></rss>";
        assert_eq!(feed_titles(xml), vec!["World Cup", "Tom & Jerry"]);
        assert_eq!(normalize_tag("World Cup"), "worldcup");
    }

    #[tokio::test]
    async fn static_tags_are_a_permutation_of_the_fallback() {
        let mut tags = StaticTags.tags().await;
        tags.sort();
        let mut expected: Vec<String> = FALLBACK_TAGS.iter().map(|t| t.to_string()).collect();
        expected.sort();
        assert_eq!(tags, expected);
    }
}

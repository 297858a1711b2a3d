use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

// Platform selectors used by the engagement surface.
pub const COMPOSE_BOX: &str = r#"div[data-testid="tweetTextarea_0"]"#;
pub const POST_BUTTON: &str =
    r#"button[data-testid="tweetButton"]:not([aria-disabled="true"]), button[data-testid="tweetButtonInline"]:not([aria-disabled="true"])"#;
pub const CONFIRMATION_TOAST_LINK: &str = r#"div[data-testid="toast"] a[href*="/status/"]"#;
pub const COMPOSE_CLOSE: &str = r#"button[data-testid="app-bar-close"]"#;
pub const FOLLOWING_TAB: &str = r#"a[href="/home"][role="tab"]:nth-of-type(2)"#;
pub const LIKE_COUNT: &str = r#"a[href$="/likes"] span[data-testid="app-text-transition-container"]"#;

const ELEMENT_TIMEOUT: Duration = Duration::from_secs(15);
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(20);

/// One observed piece of content, normalized from the page.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: String,
}

impl FeedItem {
    /// Dedup key: the platform id when present, otherwise a fingerprint
    /// derived from author + content prefix.
    pub fn dedup_key(&self) -> String {
        if self.id.is_empty() {
            fingerprint(&self.author, &self.text)
        } else {
            self.id.clone()
        }
    }
}

/// Derived dedup key for content without a stable platform id.
pub fn fingerprint(author: &str, text: &str) -> String {
    let prefix: String = text.chars().take(40).collect();
    format!("{}::{}", author.trim().to_lowercase(), prefix)
}

/// A page the agent can observe.
#[derive(Debug, Clone)]
pub enum PageView {
    Home,
    Mentions,
    Profile(String),
    Search { query: String, latest: bool },
    Status(String),
}

/// Browser automation seam. Implementations own element lookup, typing and
/// clicking; everything above this trait reasons in normalized feed items.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Collect content items visible on the current page, newest-ish first
    async fn collect_items(&self, max: usize) -> Result<Vec<FeedItem>>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    async fn click(&self, selector: &str) -> Result<()>;
    /// Wait for an element and return its visible text
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<String>;
    /// Wait for an element and return one of its attributes
    async fn wait_for_attr(&self, selector: &str, attr: &str, timeout: Duration) -> Result<String>;
    /// Like the item with the given id if visible; false when already liked
    async fn like_item(&self, item_id: &str) -> Result<bool>;
    async fn page_source(&self) -> Result<String>;
}

/// Wraps the driver with platform URLs and the small composite flows the
/// executor and funnel need.
#[derive(Clone)]
pub struct Perception {
    driver: Arc<dyn BrowserDriver>,
    base_url: String,
}

impl Perception {
    pub fn new(driver: Arc<dyn BrowserDriver>, base_url: String) -> Self {
        Self {
            driver,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, view: &PageView) -> String {
        match view {
            PageView::Home => format!("{}/home", self.base_url),
            PageView::Mentions => format!("{}/notifications/mentions", self.base_url),
            PageView::Profile(handle) => {
                format!("{}/{}", self.base_url, handle.trim_start_matches('@'))
            }
            PageView::Search { query, latest } => {
                let mode = if *latest { "&f=live" } else { "" };
                format!("{}/search?q={}&src=typed_query{}", self.base_url, query, mode)
            }
            PageView::Status(id) => format!("{}/i/web/status/{}", self.base_url, id),
        }
    }

    /// Navigate to a view and let dynamic content settle
    pub async fn open(&self, view: &PageView) -> Result<()> {
        self.driver.navigate(&self.url_for(view)).await?;
        self.settle(3, 5).await;
        Ok(())
    }

    /// Confirm the session is authenticated: the home view must present a
    /// compose surface. Failure here is fatal to the loop.
    pub async fn verify_session(&self) -> Result<()> {
        self.open(&PageView::Home).await?;
        self.driver
            .wait_for(COMPOSE_BOX, ELEMENT_TIMEOUT)
            .await
            .context("No compose surface on home view; session not authenticated")?;
        Ok(())
    }

    pub async fn observed_items(&self, max: usize) -> Result<Vec<FeedItem>> {
        self.driver.collect_items(max).await
    }

    pub async fn switch_to_following_tab(&self) -> Result<()> {
        self.driver.click(FOLLOWING_TAB).await?;
        self.settle(2, 4).await;
        Ok(())
    }

    /// Reconstruct a readable conversation transcript for a content item
    pub async fn conversation_history(&self, item_id: &str) -> Result<String> {
        self.open(&PageView::Status(item_id.to_string())).await?;
        let items = self.driver.collect_items(20).await?;

        let mut seen = std::collections::HashSet::new();
        let mut lines = Vec::new();
        for item in items {
            let line = format!("{}: {}", item.author, item.text);
            if seen.insert(line.clone()) {
                lines.push(line);
            }
        }

        if lines.is_empty() {
            Ok("Could not retrieve conversation history.".to_string())
        } else {
            Ok(lines.join("\n"))
        }
    }

    /// Type into the open compose surface, submit, and wait for the
    /// confirmation toast. Returns the new content id extracted from the
    /// toast link when the platform provides one.
    pub async fn submit_composition(&self, text: &str) -> Result<Option<String>> {
        self.driver
            .wait_for(COMPOSE_BOX, ELEMENT_TIMEOUT)
            .await
            .context("Compose surface did not appear")?;
        self.driver.type_text(COMPOSE_BOX, text).await?;
        self.settle(2, 4).await;
        self.driver.click(POST_BUTTON).await?;

        let href = self
            .driver
            .wait_for_attr(CONFIRMATION_TOAST_LINK, "href", CONFIRMATION_TIMEOUT)
            .await
            .context("No confirmation toast after submit")?;
        Ok(extract_status_id(&href))
    }

    /// Best-effort: close any open compose surface after a failure
    pub async fn dismiss_compose(&self) {
        let _ = self.driver.click(COMPOSE_CLOSE).await;
    }

    pub async fn like_item(&self, item_id: &str) -> Result<bool> {
        self.driver.like_item(item_id).await
    }

    /// Read the like count from a status page
    pub async fn read_like_count(&self, item_id: &str) -> Result<i64> {
        self.open(&PageView::Status(item_id.to_string())).await?;
        let raw = self.driver.wait_for(LIKE_COUNT, ELEMENT_TIMEOUT).await?;
        let cleaned = raw.replace(',', "");
        if cleaned.trim().is_empty() {
            return Ok(0);
        }
        cleaned
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Unparseable like count: {}", raw))
    }

    // Randomized pause so dynamic content settles and pacing looks human;
    // not load-bearing for correctness.
    async fn settle(&self, min_secs: u64, max_secs: u64) {
        let secs = rand::thread_rng().gen_range(min_secs..=max_secs);
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}

/// Pull the trailing status id out of a permalink href
pub fn extract_status_id(href: &str) -> Option<String> {
    let trimmed = href.trim_end_matches('/');
    let (_, tail) = trimmed.rsplit_once("/status/")?;
    let id: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_status_id_from_permalink() {
        assert_eq!(
            extract_status_id("https://x.com/someone/status/17283940"),
            Some("17283940".to_string())
        );
        assert_eq!(
            extract_status_id("https://x.com/someone/status/17283940/analytics"),
            Some("17283940".to_string())
        );
        assert_eq!(extract_status_id("https://x.com/someone"), None);
    }

    #[test]
    fn fingerprint_is_stable_and_case_insensitive_on_author() {
        let a = fingerprint("@Alice", "a sufficiently long piece of content text");
        let b = fingerprint("@alice", "a sufficiently long piece of content text");
        assert_eq!(a, b);
        assert!(a.starts_with("@alice::"));
    }

    #[test]
    fn dedup_key_prefers_platform_id() {
        let item = FeedItem {
            id: "42".to_string(),
            author: "@a".to_string(),
            text: "text".to_string(),
            timestamp: None,
            url: String::new(),
        };
        assert_eq!(item.dedup_key(), "42");

        let anonymous = FeedItem {
            id: String::new(),
            ..item
        };
        assert_eq!(anonymous.dedup_key(), fingerprint("@a", "text"));
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::perception::{BrowserDriver, FeedItem};

// W3C WebDriver element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const ITEM_SELECTOR: &str = r#"article[data-testid="tweet"]"#;
const ITEM_TEXT_SELECTOR: &str = r#"div[data-testid="tweetText"]"#;
const ITEM_AUTHOR_SELECTOR: &str = r#"div[data-testid="User-Name"] span"#;
const ITEM_LINK_SELECTOR: &str = r#"a[href*="/status/"]"#;
const LIKE_BUTTON: &str = r#"button[data-testid="like"]"#;
const UNLIKE_BUTTON: &str = r#"button[data-testid="unlike"]"#;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Driver speaking the W3C WebDriver REST protocol to a local
/// chromedriver/geckodriver-compatible endpoint.
pub struct RemoteDriver {
    base_url: String,
    session_id: String,
    client: reqwest::Client,
}

impl RemoteDriver {
    /// Establish a new browser session. Failure here is a setup failure.
    pub async fn connect(webdriver_url: &str) -> Result<Self> {
        let client = reqwest::Client::new();
        let base_url = webdriver_url.trim_end_matches('/').to_string();

        let response: Value = client
            .post(format!("{}/session", base_url))
            .json(&json!({
                "capabilities": {
                    "alwaysMatch": {
                        "goog:chromeOptions": {
                            "args": ["--disable-notifications", "--log-level=3"]
                        }
                    }
                }
            }))
            .send()
            .await
            .context("Failed to reach WebDriver endpoint")?
            .json()
            .await
            .context("Failed to parse WebDriver session response")?;

        let session_id = response["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("WebDriver did not return a session id"))?
            .to_string();

        tracing::info!("Browser session established: {}", session_id);
        Ok(Self {
            base_url,
            session_id,
            client,
        })
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response: Value = self
            .client
            .post(self.session_url(path))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("WebDriver POST {} failed", path))?
            .json()
            .await
            .with_context(|| format!("WebDriver POST {} returned invalid JSON", path))?;
        if let Some(error) = response["value"]["error"].as_str() {
            anyhow::bail!("WebDriver error on {}: {}", path, error);
        }
        Ok(response)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response: Value = self
            .client
            .get(self.session_url(path))
            .send()
            .await
            .with_context(|| format!("WebDriver GET {} failed", path))?
            .json()
            .await
            .with_context(|| format!("WebDriver GET {} returned invalid JSON", path))?;
        if let Some(error) = response["value"]["error"].as_str() {
            anyhow::bail!("WebDriver error on {}: {}", path, error);
        }
        Ok(response)
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<String>> {
        let response = self
            .post(
                "/elements",
                json!({"using": "css selector", "value": selector}),
            )
            .await?;
        Ok(element_ids(&response))
    }

    async fn find_nested(&self, parent: &str, selector: &str) -> Result<Vec<String>> {
        let response = self
            .post(
                &format!("/element/{}/elements", parent),
                json!({"using": "css selector", "value": selector}),
            )
            .await?;
        Ok(element_ids(&response))
    }

    async fn element_text(&self, element: &str) -> Result<String> {
        let response = self.get(&format!("/element/{}/text", element)).await?;
        Ok(response["value"].as_str().unwrap_or_default().to_string())
    }

    async fn element_attr(&self, element: &str, attr: &str) -> Result<Option<String>> {
        let response = self
            .get(&format!("/element/{}/attribute/{}", element, attr))
            .await?;
        Ok(response["value"].as_str().map(|s| s.to_string()))
    }

    async fn click_element(&self, element: &str) -> Result<()> {
        self.post(&format!("/element/{}/click", element), json!({}))
            .await?;
        Ok(())
    }

    /// Normalize one article element into a FeedItem; None when the article
    /// carries no readable text (ads, deleted content).
    async fn read_item(&self, article: &str) -> Result<Option<FeedItem>> {
        let text = match self.find_nested(article, ITEM_TEXT_SELECTOR).await?.first() {
            Some(node) => self.element_text(node).await?,
            None => return Ok(None),
        };

        let mut id = String::new();
        let mut url = String::new();
        if let Some(link) = self.find_nested(article, ITEM_LINK_SELECTOR).await?.first() {
            if let Some(href) = self.element_attr(link, "href").await? {
                if let Some(status_id) = crate::perception::extract_status_id(&href) {
                    id = status_id;
                    url = href;
                }
            }
        }

        let mut author = String::new();
        for span in self.find_nested(article, ITEM_AUTHOR_SELECTOR).await? {
            let span_text = self.element_text(&span).await?;
            if span_text.starts_with('@') {
                author = span_text;
                break;
            }
        }

        let mut timestamp = None;
        if let Some(time_node) = self.find_nested(article, "time").await?.first() {
            if let Some(datetime) = self.element_attr(time_node, "datetime").await? {
                timestamp = DateTime::parse_from_rfc3339(&datetime)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            }
        }

        Ok(Some(FeedItem {
            id,
            author,
            text,
            timestamp,
            url,
        }))
    }

    /// Find the article element containing a link to the given status id
    async fn find_article_for(&self, item_id: &str) -> Result<Option<String>> {
        for article in self.find_elements(ITEM_SELECTOR).await? {
            for link in self.find_nested(&article, ITEM_LINK_SELECTOR).await? {
                if let Some(href) = self.element_attr(&link, "href").await? {
                    if crate::perception::extract_status_id(&href).as_deref() == Some(item_id) {
                        return Ok(Some(article));
                    }
                }
            }
        }
        Ok(None)
    }
}

fn element_ids(response: &Value) -> Vec<String> {
    response["value"]
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| e[ELEMENT_KEY].as_str().map(|id| id.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BrowserDriver for RemoteDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.post("/url", json!({"url": url})).await?;
        Ok(())
    }

    async fn collect_items(&self, max: usize) -> Result<Vec<FeedItem>> {
        let mut items = Vec::new();
        for article in self.find_elements(ITEM_SELECTOR).await?.iter().take(max) {
            match self.read_item(article).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => continue,
                // A single stale element must not poison the whole scan
                Err(e) => {
                    tracing::debug!("Skipping unreadable feed item: {:#}", e);
                    continue;
                }
            }
        }
        Ok(items)
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .find_elements(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No element matches {}", selector))?;
        self.click_element(&element).await?;
        self.post(&format!("/element/{}/value", element), json!({"text": text}))
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .find_elements(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No element matches {}", selector))?;
        self.click_element(&element).await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_elements(selector).await?.first() {
                return self.element_text(element).await;
            }
            if Instant::now() >= deadline {
                anyhow::bail!("Timed out waiting for {}", selector);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_attr(&self, selector: &str, attr: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_elements(selector).await?.first() {
                if let Some(value) = self.element_attr(element, attr).await? {
                    return Ok(value);
                }
            }
            if Instant::now() >= deadline {
                anyhow::bail!("Timed out waiting for {}@{}", selector, attr);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn like_item(&self, item_id: &str) -> Result<bool> {
        let article = self
            .find_article_for(item_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Item {} not visible", item_id))?;

        if !self.find_nested(&article, UNLIKE_BUTTON).await?.is_empty() {
            return Ok(false);
        }
        if let Some(button) = self.find_nested(&article, LIKE_BUTTON).await?.first() {
            self.click_element(button).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn page_source(&self) -> Result<String> {
        let response = self.get("/source").await?;
        Ok(response["value"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_ids_reads_w3c_shape() {
        let response = json!({
            "value": [
                {ELEMENT_KEY: "abc"},
                {ELEMENT_KEY: "def"},
                {"unexpected": true}
            ]
        });
        assert_eq!(element_ids(&response), vec!["abc", "def"]);
    }

    #[test]
    fn element_ids_handles_error_payload() {
        let response = json!({"value": {"error": "no such element"}});
        assert!(element_ids(&response).is_empty());
    }
}

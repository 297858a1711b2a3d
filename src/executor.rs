use anyhow::Result;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::{MemoryKind, VectorMemory};
use crate::perception::{FeedItem, PageView, Perception};
use crate::store::AgentStore;

/// Submits generated content through the perception adapter and records the
/// outcome. Failed attempts are logged and abandoned for the cycle; retry
/// happens through normal goal selection on a later cycle.
pub struct EngagementExecutor {
    perception: Perception,
    store: Arc<AgentStore>,
    memory: Arc<VectorMemory>,
    llm: LlmClient,
}

impl EngagementExecutor {
    pub fn new(
        perception: Perception,
        store: Arc<AgentStore>,
        memory: Arc<VectorMemory>,
        llm: LlmClient,
    ) -> Self {
        Self {
            perception,
            store,
            memory,
            llm,
        }
    }

    /// Publish a standalone post. Returns true when the platform confirmed
    /// the submission.
    pub async fn post(&self, subject: &str, content: &str) -> Result<bool> {
        tracing::info!("Publishing new post on subject: {}", subject);

        let submission = async {
            self.perception.open(&PageView::Home).await?;
            self.perception.submit_composition(content).await
        };

        match submission.await {
            Ok(confirmed_id) => {
                let post_id = confirmed_id
                    .unwrap_or_else(|| crate::perception::fingerprint(subject, content));
                tracing::info!("Post published: {}", post_id);

                self.store.insert_observation(&post_id, subject, content)?;
                self.remember_own_post(&post_id, subject, content).await;
                self.store.log_action("post_content", subject, "SUCCESS")?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Post submission failed: {:#}", e);
                self.perception.dismiss_compose().await;
                self.store
                    .log_action("post_content", subject, &format!("FAILURE: {:#}", e))?;
                Ok(false)
            }
        }
    }

    /// Reply to an observed item. Skips silently when the target was already
    /// engaged (outbound idempotence).
    pub async fn reply(
        &self,
        target: &FeedItem,
        engagement_type: &str,
        content: &str,
    ) -> Result<bool> {
        let dedup_key = target.dedup_key();
        if self.store.has_engaged(&dedup_key)? {
            tracing::debug!("Already engaged with {}, skipping", dedup_key);
            return Ok(false);
        }

        tracing::info!("Replying to {} ({})", dedup_key, engagement_type);

        let submission = async {
            self.perception
                .open(&PageView::Status(target.id.clone()))
                .await?;
            self.perception.submit_composition(content).await
        };

        match submission.await {
            Ok(_) => {
                self.store
                    .insert_engagement(engagement_type, &dedup_key, content, "success")?;
                self.store
                    .log_action(engagement_type, &dedup_key, "SUCCESS")?;
                tracing::info!("Reply delivered to {}", dedup_key);
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Reply to {} failed: {:#}", dedup_key, e);
                self.perception.dismiss_compose().await;
                self.store
                    .log_action(engagement_type, &dedup_key, &format!("FAILURE: {:#}", e))?;
                Ok(false)
            }
        }
    }

    // Self-authored content feeds the agent's own semantic memory; an
    // embedding failure only costs future recall, not the post itself.
    async fn remember_own_post(&self, post_id: &str, subject: &str, content: &str) {
        match self.llm.embed(content).await {
            Ok(embedding) => {
                if let Err(e) = self.memory.add(
                    post_id,
                    &embedding,
                    content,
                    MemoryKind::SelfPosted,
                    Some(subject),
                ) {
                    tracing::warn!("Failed to store self-posted memory: {:#}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to embed self-posted content: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::BrowserDriver;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Driver that counts navigations and refuses everything else; reply
    /// dedup must short-circuit before any browser traffic.
    #[derive(Default)]
    struct CountingDriver {
        navigations: AtomicU32,
    }

    #[async_trait]
    impl BrowserDriver for CountingDriver {
        async fn navigate(&self, _url: &str) -> Result<()> {
            self.navigations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn collect_items(&self, _max: usize) -> Result<Vec<FeedItem>> {
            Ok(Vec::new())
        }
        async fn type_text(&self, _selector: &str, _text: &str) -> Result<()> {
            anyhow::bail!("offline")
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            anyhow::bail!("offline")
        }
        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<String> {
            anyhow::bail!("offline")
        }
        async fn wait_for_attr(
            &self,
            _selector: &str,
            _attr: &str,
            _timeout: Duration,
        ) -> Result<String> {
            anyhow::bail!("offline")
        }
        async fn like_item(&self, _item_id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn page_source(&self) -> Result<String> {
            Ok(String::new())
        }
    }

    fn build_executor(driver: Arc<CountingDriver>) -> (tempfile::TempDir, EngagementExecutor) {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(AgentStore::new(dir.path().join("state.db")).expect("store"));
        let memory = Arc::new(VectorMemory::open(dir.path().join("memory.db")).expect("memory"));
        let llm = LlmClient::new(
            "http://localhost:1".to_string(),
            None,
            "test-embed".to_string(),
        );
        let perception = Perception::new(driver, "https://x.test".to_string());
        let executor = EngagementExecutor::new(perception, store, memory, llm);
        (dir, executor)
    }

    #[tokio::test]
    async fn already_engaged_target_is_skipped_without_browser_traffic() {
        let driver = Arc::new(CountingDriver::default());
        let (_dir, executor) = build_executor(driver.clone());

        executor
            .store
            .insert_engagement("reply", "777", "earlier reply", "success")
            .expect("seed engagement");

        let target = FeedItem {
            id: "777".to_string(),
            author: "@someone".to_string(),
            text: "an interesting observation".to_string(),
            timestamp: None,
            url: "https://x.test/someone/status/777".to_string(),
        };

        let engaged = executor
            .reply(&target, "discovery_reply", "would-be reply")
            .await
            .expect("reply call");
        assert!(!engaged);
        assert_eq!(driver.navigations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_submission_records_failure_and_no_engagement() {
        let driver = Arc::new(CountingDriver::default());
        let (_dir, executor) = build_executor(driver);

        let target = FeedItem {
            id: "888".to_string(),
            author: "@other".to_string(),
            text: "text".to_string(),
            timestamp: None,
            url: "https://x.test/other/status/888".to_string(),
        };

        let engaged = executor
            .reply(&target, "discovery_reply", "reply text")
            .await
            .expect("reply call");
        assert!(!engaged);
        assert!(!executor.store.has_engaged("888").expect("check"));

        let actions = executor.store.recent_actions(5).expect("actions");
        assert!(actions
            .iter()
            .any(|a| a.action_name == "discovery_reply" && a.status.starts_with("FAILURE")));
    }

    #[tokio::test]
    async fn fingerprint_dedup_applies_when_id_missing() {
        let driver = Arc::new(CountingDriver::default());
        let (_dir, executor) = build_executor(driver.clone());

        let target = FeedItem {
            id: String::new(),
            author: "@ghost".to_string(),
            text: "content without a stable id".to_string(),
            timestamp: None,
            url: String::new(),
        };

        executor
            .store
            .insert_engagement("reply", &target.dedup_key(), "earlier", "success")
            .expect("seed engagement");

        let engaged = executor
            .reply(&target, "reply", "new attempt")
            .await
            .expect("reply call");
        assert!(!engaged);
        assert_eq!(driver.navigations.load(Ordering::SeqCst), 0);
    }
}

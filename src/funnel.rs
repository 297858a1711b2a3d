use anyhow::{Context, Result};
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::llm::LlmClient;
use crate::memory::{MemoryKind, VectorMemory};
use crate::perception::{PageView, Perception};
use crate::retry::RetryPolicy;
use crate::store::{AgentStore, PartnerStatus};

pub const VETTING_ACTION: &str = "vet_potential_partner";
pub const DEEP_DIVE_ACTION: &str = "perform_deep_dive";

const PROFILE_SAMPLE: usize = 8;
const DEEP_DIVE_SAMPLE: usize = 20;
const SENTIMENT_SAMPLE: usize = 15;

#[derive(Debug, Deserialize)]
struct VettingRaw {
    relevance_score: Option<i64>,
    activity_score: Option<i64>,
    legitimacy_score: Option<i64>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecommendationRaw {
    status: Option<String>,
    next_step: Option<String>,
}

/// Moves discovered accounts through the vetting and deep-dive pipeline.
/// Failed analyses revert the partner to its pre-analysis status so a later
/// cycle can retry.
pub struct PartnerFunnel {
    perception: Perception,
    store: Arc<AgentStore>,
    memory: Arc<VectorMemory>,
    llm: LlmClient,
    reflective_model: String,
    creation_model: String,
    core_topics: Vec<String>,
    profile_handle: String,
    vetting_daily_limit: u32,
    retry: RetryPolicy,
}

impl PartnerFunnel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        perception: Perception,
        store: Arc<AgentStore>,
        memory: Arc<VectorMemory>,
        llm: LlmClient,
        reflective_model: String,
        creation_model: String,
        core_topics: Vec<String>,
        profile_handle: String,
        vetting_daily_limit: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            perception,
            store,
            memory,
            llm,
            reflective_model,
            creation_model,
            core_topics,
            profile_handle,
            vetting_daily_limit,
            retry,
        }
    }

    /// Insert every unknown handle mentioned in `text` as a discovered
    /// partner. Returns the number of new rows.
    pub fn discover_handles(&self, text: &str) -> Result<u32> {
        let mut new_rows = 0;
        for handle in extract_handles(text) {
            if handle.eq_ignore_ascii_case(&self.profile_handle) {
                continue;
            }
            if self
                .core_topics
                .iter()
                .any(|topic| topic.eq_ignore_ascii_case(&handle))
            {
                continue;
            }
            if self.store.insert_discovered_partner(&handle)? {
                tracing::info!("Discovered potential partner: {}", handle);
                new_rows += 1;
            }
        }
        Ok(new_rows)
    }

    /// True when today's vetting budget is spent
    pub fn vetting_capped(&self) -> Result<bool> {
        Ok(self.store.actions_today(VETTING_ACTION)? >= self.vetting_daily_limit)
    }

    /// Vet one discovered partner, respecting the daily cap. Returns false
    /// when there is nothing to do.
    pub async fn vet_next(&self) -> Result<bool> {
        if self.vetting_capped()? {
            tracing::info!(
                "Daily vetting limit ({}) reached, skipping",
                self.vetting_daily_limit
            );
            return Ok(false);
        }
        match self
            .store
            .random_partner_with_status(PartnerStatus::Discovered)?
        {
            Some(handle) => self.vet(&handle).await,
            None => {
                tracing::debug!("No discovered partners awaiting vetting");
                Ok(false)
            }
        }
    }

    /// Score a partner profile and move it to vetted / deep_dive_candidate /
    /// archived. Any failure reverts the row to discovered.
    pub async fn vet(&self, handle: &str) -> Result<bool> {
        tracing::info!("Vetting profile: {}", handle);
        self.store.log_action(VETTING_ACTION, handle, "STARTED")?;
        self.store
            .set_partner_status(handle, PartnerStatus::Vetting)?;

        match self.run_vetting(handle).await {
            Ok(status) => {
                tracing::info!("Vetting of {} complete: {}", handle, status.as_db_str());
                self.store.log_action(
                    VETTING_ACTION,
                    handle,
                    &format!("SUCCESS: {}", status.as_db_str()),
                )?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Vetting of {} failed: {:#}", handle, e);
                self.store
                    .set_partner_status(handle, PartnerStatus::Discovered)?;
                self.store
                    .log_action(VETTING_ACTION, handle, &format!("FAILURE: {:#}", e))?;
                Ok(false)
            }
        }
    }

    async fn run_vetting(&self, handle: &str) -> Result<PartnerStatus> {
        self.perception
            .open(&PageView::Profile(handle.to_string()))
            .await?;
        let items = self.perception.observed_items(PROFILE_SAMPLE).await?;
        let samples = items
            .iter()
            .map(|item| format!("  - {}", item.text))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are an analyst of crypto and web3 projects. Objectively assess this \
             profile from its recent posts.\n\nProfile under analysis: {}\nAgent core \
             topics (context): {}\n\nRecent posts:\n{}\n\nScore the profile 1-10 in \
             three categories:\n1. relevance_score: how closely the profile's subject \
             matter matches the core topics (1=unrelated, 10=perfect fit)\n2. \
             activity_score: quality and apparent frequency of publication, community \
             engagement (1=dead profile, 10=very active and engaging)\n3. \
             legitimacy_score: does this look like a genuine project or expert rather \
             than a bot, scam, or airdrop farm (1=suspicious, 10=highly credible)\n\n\
             Finish with a one-sentence summary.\n\nReturn ONLY a JSON object with keys \
             \"relevance_score\", \"activity_score\", \"legitimacy_score\", \"summary\".",
            handle,
            self.core_topics.join(", "),
            samples
        );

        let raw = self
            .retry
            .run("partner vetting", || {
                self.llm
                    .complete_json::<VettingRaw>(&self.reflective_model, &prompt)
            })
            .await?;

        let relevance = clamp_score(raw.relevance_score);
        let activity = clamp_score(raw.activity_score);
        let legitimacy = clamp_score(raw.legitimacy_score);
        let summary = raw.summary.unwrap_or_else(|| "No summary.".to_string());

        let status = status_for_score(relevance + activity + legitimacy);
        self.store
            .record_vetting(handle, status, relevance, activity, legitimacy, &summary)?;
        tracing::info!(
            "{} scored R:{} A:{} L:{}",
            handle,
            relevance,
            activity,
            legitimacy
        );
        Ok(status)
    }

    /// Deep-dive one candidate. Returns false when no candidate exists.
    pub async fn deep_dive_next(&self) -> Result<bool> {
        match self
            .store
            .random_partner_with_status(PartnerStatus::DeepDiveCandidate)?
        {
            Some(handle) => self.deep_dive(&handle).await,
            None => {
                tracing::debug!("No deep-dive candidates");
                Ok(false)
            }
        }
    }

    /// Extended research pass: profile memo, external sentiment sweep, and a
    /// final structured recommendation. Failure reverts the row to vetted.
    pub async fn deep_dive(&self, handle: &str) -> Result<bool> {
        tracing::info!("Starting deep dive on {}", handle);
        self.store.log_action(DEEP_DIVE_ACTION, handle, "STARTED")?;
        self.store
            .set_partner_status(handle, PartnerStatus::DeepDive)?;

        match self.run_deep_dive(handle).await {
            Ok(status) => {
                tracing::info!("Deep dive on {} complete: {}", handle, status.as_db_str());
                self.store.log_action(
                    DEEP_DIVE_ACTION,
                    handle,
                    &format!("SUCCESS: {}", status.as_db_str()),
                )?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Deep dive on {} failed: {:#}", handle, e);
                self.store
                    .set_partner_status(handle, PartnerStatus::Vetted)?;
                self.store
                    .log_action(DEEP_DIVE_ACTION, handle, &format!("FAILURE: {:#}", e))?;
                Ok(false)
            }
        }
    }

    async fn run_deep_dive(&self, handle: &str) -> Result<PartnerStatus> {
        // Extended profile sample
        self.perception
            .open(&PageView::Profile(handle.to_string()))
            .await?;
        let items = self.perception.observed_items(DEEP_DIVE_SAMPLE).await?;
        let posts = items
            .iter()
            .map(|item| format!("- {}", item.text))
            .collect::<Vec<_>>()
            .join("\n");

        let memo_prompt = format!(
            "You are an intelligence analyst. From these posts, write a concise \
             research memo on the project {}. Cover:\n1. The core technology and goal.\n\
             2. Recent milestones and announcements.\n3. Community sentiment and \
             engagement (from their own posts).\n4. Open questions worth \
             investigating.\n\nCollected posts:\n{}",
            handle, posts
        );
        let memo = self
            .retry
            .run("research memo", || {
                self.llm.complete(&self.reflective_model, &memo_prompt)
            })
            .await?;
        self.persist_memory(&memo, MemoryKind::ResearchMemo, handle)
            .await
            .context("Failed to persist research memo")?;

        // External sentiment, excluding the project's own posts
        let bare = handle.trim_start_matches('@');
        let sentiment = self.external_sentiment(handle, bare).await?;

        let final_prompt = format!(
            "You are a web3 strategy analyst. You have researched the project {}.\n\n\
             YOUR INTERNAL MEMO:\n{}\n\nCOMMUNITY SENTIMENT ANALYSIS:\n{}\n\nTask:\n\
             1. Form a strategic recommendation: PRIORITY_ALPHA, MONITORING, or \
             ARCHIVED.\n2. Propose a creative, concrete next step uniquely suited to \
             this project. Avoid generic advice; consider analytical posts, public \
             questions, direct interaction, or collaboration proposals.\n3. Return \
             ONLY a JSON object with keys \"status\" and \"next_step\".",
            handle, memo, sentiment
        );
        let decision = self
            .retry
            .run("strategic recommendation", || {
                self.llm
                    .complete_json::<RecommendationRaw>(&self.creation_model, &final_prompt)
            })
            .await?;

        let status = parse_recommendation_status(decision.status.as_deref());
        let next_step = decision
            .next_step
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Continue passive monitoring.".to_string());
        self.store.record_recommendation(handle, status, &next_step)?;
        tracing::info!("Next step for {}: {}", handle, next_step);
        Ok(status)
    }

    async fn external_sentiment(&self, handle: &str, bare: &str) -> Result<String> {
        let query = format!("({}) -from:{}", handle, bare);
        self.perception
            .open(&PageView::Search { query, latest: true })
            .await?;
        let mentions = self.perception.observed_items(SENTIMENT_SAMPLE).await?;
        if mentions.is_empty() {
            return Ok("Not enough external mentions for sentiment analysis.".to_string());
        }

        let formatted = mentions
            .iter()
            .map(|item| format!("- {}", item.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Assess the overall sentiment (positive, negative, neutral) of these \
             mentions of {}. Identify the main points of praise and criticism from \
             the community.\n\nCollected mentions:\n{}",
            handle, formatted
        );
        let summary = self
            .retry
            .run("sentiment summary", || {
                self.llm.complete(&self.reflective_model, &prompt)
            })
            .await?;
        self.persist_memory(&summary, MemoryKind::SentimentSummary, handle)
            .await
            .context("Failed to persist sentiment summary")?;
        Ok(summary)
    }

    async fn persist_memory(&self, document: &str, kind: MemoryKind, subject: &str) -> Result<()> {
        let embedding = self.llm.embed(document).await?;
        self.memory.add(
            &format!("{}-{}", kind.as_db_str(), Uuid::new_v4()),
            &embedding,
            document,
            kind,
            Some(subject),
        )
    }
}

/// Composite score bands deciding the post-vetting status
pub fn status_for_score(total: i64) -> PartnerStatus {
    if total >= 24 {
        PartnerStatus::DeepDiveCandidate
    } else if total >= 18 {
        PartnerStatus::Vetted
    } else {
        PartnerStatus::Archived
    }
}

fn clamp_score(raw: Option<i64>) -> i64 {
    raw.unwrap_or(0).clamp(0, 10)
}

fn parse_recommendation_status(raw: Option<&str>) -> PartnerStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("priority_alpha") => PartnerStatus::PriorityAlpha,
        Some("archived") => PartnerStatus::Archived,
        _ => PartnerStatus::Monitoring,
    }
}

/// All distinct `@handle` mentions in `text`, in order of first appearance
pub fn extract_handles(text: &str) -> Vec<String> {
    let pattern = match Regex::new(r"@(\w+)") {
        Ok(pattern) => pattern,
        Err(_) => return Vec::new(),
    };
    let mut seen = std::collections::HashSet::new();
    let mut handles = Vec::new();
    for capture in pattern.captures_iter(text) {
        if let Some(name) = capture.get(1) {
            let handle = format!("@{}", name.as_str());
            if seen.insert(handle.to_lowercase()) {
                handles.push(handle);
            }
        }
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::{BrowserDriver, FeedItem};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    struct OfflineDriver;

    #[async_trait]
    impl BrowserDriver for OfflineDriver {
        async fn navigate(&self, _url: &str) -> Result<()> {
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

    fn build_funnel() -> (tempfile::TempDir, PartnerFunnel) {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(AgentStore::new(dir.path().join("state.db")).expect("store"));
        let memory = Arc::new(VectorMemory::open(dir.path().join("memory.db")).expect("memory"));
        // Unreachable model endpoint: every analysis pass fails fast
        let llm = LlmClient::new(
            "http://localhost:1".to_string(),
            None,
            "test-embed".to_string(),
        );
        let perception = Perception::new(Arc::new(OfflineDriver), "https://x.test".to_string());
        let funnel = PartnerFunnel::new(
            perception,
            store,
            memory,
            llm,
            "reflective".to_string(),
            "creation".to_string(),
            vec!["$SOL".to_string(), "@ownproject".to_string()],
            "@agent_self".to_string(),
            2,
            RetryPolicy::new(1, Duration::ZERO),
        );
        (dir, funnel)
    }

    #[test]
    fn score_bands_are_exact_at_boundaries() {
        assert_eq!(status_for_score(24), PartnerStatus::DeepDiveCandidate);
        assert_eq!(status_for_score(23), PartnerStatus::Vetted);
        assert_eq!(status_for_score(18), PartnerStatus::Vetted);
        assert_eq!(status_for_score(17), PartnerStatus::Archived);
        assert_eq!(status_for_score(30), PartnerStatus::DeepDiveCandidate);
    }

    #[test]
    fn recommendation_status_defaults_to_monitoring() {
        assert_eq!(
            parse_recommendation_status(Some("PRIORITY_ALPHA")),
            PartnerStatus::PriorityAlpha
        );
        assert_eq!(
            parse_recommendation_status(Some("archived")),
            PartnerStatus::Archived
        );
        assert_eq!(
            parse_recommendation_status(Some("something else")),
            PartnerStatus::Monitoring
        );
        assert_eq!(parse_recommendation_status(None), PartnerStatus::Monitoring);
    }

    #[test]
    fn handle_extraction_dedups_case_insensitively() {
        let handles = extract_handles("cc @Alice and @bob_99; also @alice again");
        assert_eq!(handles, vec!["@Alice", "@bob_99"]);
    }

    #[test]
    fn discovery_skips_own_handle_and_core_topics() {
        let (_dir, funnel) = build_funnel();
        let new_rows = funnel
            .discover_handles("watching @agent_self, @ownproject and @newcomer closely")
            .expect("discover");
        assert_eq!(new_rows, 1);
        assert!(funnel.store.partner_exists("@newcomer").expect("exists"));
        assert!(!funnel.store.partner_exists("@agent_self").expect("exists"));
    }

    #[tokio::test]
    async fn failed_vet_reverts_to_discovered() {
        let (_dir, funnel) = build_funnel();
        funnel
            .store
            .insert_discovered_partner("@target")
            .expect("insert");

        let vetted = funnel.vet("@target").await.expect("vet call");
        assert!(!vetted);

        let partner = funnel
            .store
            .get_partner("@target")
            .expect("get")
            .expect("row");
        assert_eq!(partner.status, PartnerStatus::Discovered);

        let actions = funnel.store.recent_actions(5).expect("actions");
        assert!(actions
            .iter()
            .any(|a| a.action_name == VETTING_ACTION && a.status.starts_with("FAILURE")));
    }

    #[tokio::test]
    async fn failed_deep_dive_reverts_to_vetted() {
        let (_dir, funnel) = build_funnel();
        funnel
            .store
            .insert_discovered_partner("@candidate")
            .expect("insert");
        funnel
            .store
            .set_partner_status("@candidate", PartnerStatus::DeepDiveCandidate)
            .expect("set");

        let done = funnel.deep_dive("@candidate").await.expect("deep dive");
        assert!(!done);
        let partner = funnel
            .store
            .get_partner("@candidate")
            .expect("get")
            .expect("row");
        assert_eq!(partner.status, PartnerStatus::Vetted);
    }

    #[tokio::test]
    async fn daily_cap_makes_vetting_a_noop() {
        let (_dir, funnel) = build_funnel();
        funnel
            .store
            .insert_discovered_partner("@waiting")
            .expect("insert");
        funnel
            .store
            .log_action(VETTING_ACTION, "@a", "STARTED")
            .expect("log");
        funnel
            .store
            .log_action(VETTING_ACTION, "@a", "SUCCESS: vetted")
            .expect("log");

        let acted = funnel.vet_next().await.expect("vet_next");
        assert!(!acted);

        // No new STARTED row beyond the cap
        let started = funnel
            .store
            .recent_actions(10)
            .expect("actions")
            .into_iter()
            .filter(|a| a.action_name == VETTING_ACTION && a.status == "STARTED")
            .count();
        assert_eq!(started, 1);
        let partner = funnel
            .store
            .get_partner("@waiting")
            .expect("get")
            .expect("row");
        assert_eq!(partner.status, PartnerStatus::Discovered);
    }
}

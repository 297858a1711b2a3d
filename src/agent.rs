use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::executor::EngagementExecutor;
use crate::funnel::PartnerFunnel;
use crate::llm::LlmClient;
use crate::market::MarketResearch;
use crate::memory::{MemoryKind, VectorMemory};
use crate::perception::{BrowserDriver, FeedItem, PageView, Perception};
use crate::retry::RetryPolicy;
use crate::scheduler::{Goal, GoalPlanner, PreMentionsDecision, StoreSignals};
use crate::store::{
    AgentStore, PartnerStatus, LAST_MENTIONS_CHECK_KEY, LAST_REFLECTION_KEY, LAST_SEEN_KEY,
    RESEARCH_WEIGHTS_KEY,
};
use crate::synthesizer::{ContentSynthesizer, TriageOutcome};

const FEED_SCAN_LIMIT: usize = 20;
const MENTIONS_SCAN_LIMIT: usize = 15;
const MONITOR_SCAN_LIMIT: usize = 5;
const REFLECTION_POST_LIMIT: usize = 10;
const MENTION_MAX_AGE_DAYS: i64 = 5;
const FEED_MAX_AGE_HOURS: i64 = 5;
const MIN_CANDIDATE_TEXT_LEN: usize = 40;
const ERROR_BACKOFF_SECS: u64 = 60;

const DISCOVERED_PARTNER_CHANCE: f64 = 0.25;
const HIGH_VALUE_PARTNER_CHANCE: f64 = 0.5;
const LIKE_BOOST_THRESHOLD: i64 = 5;

/// The agent runtime: owns every component and drives the scheduler loop.
pub struct Agent {
    config: AgentConfig,
    store: Arc<AgentStore>,
    memory: Arc<VectorMemory>,
    llm: LlmClient,
    perception: Perception,
    synthesizer: ContentSynthesizer,
    executor: EngagementExecutor,
    funnel: PartnerFunnel,
    market: MarketResearch,
    planner: GoalPlanner,
    rng: StdRng,
    // Immutable weight snapshot, replaced wholesale after each reflection
    research_weights: Arc<HashMap<String, f64>>,
    running: Arc<AtomicBool>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        driver: Arc<dyn BrowserDriver>,
        rng: StdRng,
        planner_rng: StdRng,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let store = Arc::new(AgentStore::new(&config.database_path)?);
        let memory = Arc::new(VectorMemory::open(&config.memory_path)?);
        let llm = LlmClient::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.embedding_model.clone(),
        );
        let perception = Perception::new(driver, config.platform_base_url.clone());

        let synthesizer = ContentSynthesizer::new(
            llm.clone(),
            memory.clone(),
            config.creation_model.clone(),
            config.reflective_model.clone(),
            config.persona_template.clone(),
            config.reply_template.clone(),
        );
        let executor = EngagementExecutor::new(
            perception.clone(),
            store.clone(),
            memory.clone(),
            llm.clone(),
        );
        let funnel = PartnerFunnel::new(
            perception.clone(),
            store.clone(),
            memory.clone(),
            llm.clone(),
            config.reflective_model.clone(),
            config.creation_model.clone(),
            config.core_topics.clone(),
            config.profile_handle.clone(),
            config.vetting_daily_limit,
            RetryPolicy::default(),
        );
        let market = MarketResearch::new(
            llm.clone(),
            config.reflective_model.clone(),
            synthesizer.primer().to_string(),
        );
        let planner = GoalPlanner::new(
            planner_rng,
            ChronoDuration::minutes(config.post_cooldown_mins as i64),
        );
        let research_weights = Arc::new(load_research_weights(&store, &config));

        Ok(Self {
            config,
            store,
            memory,
            llm,
            perception,
            synthesizer,
            executor,
            funnel,
            market,
            planner,
            rng,
            research_weights,
            running,
        })
    }

    /// Fatal when the perception session cannot be verified
    pub async fn verify_session(&self) -> Result<()> {
        self.perception.verify_session().await
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    /// The unbounded decision loop. Ends only when the stop flag flips.
    pub async fn run_loop(&mut self) {
        tracing::info!("Agent loop started");
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.store.touch_marker(LAST_SEEN_KEY) {
                tracing::warn!("Failed to stamp last-seen marker: {:#}", e);
            }

            match self.run_cycle().await {
                Ok(goal) => tracing::info!("Cycle complete (goal: {})", goal.as_str()),
                Err(e) => {
                    tracing::error!("Cycle failed: {:#}", e);
                    self.interruptible_sleep(Duration::from_secs(ERROR_BACKOFF_SECS))
                        .await;
                }
            }

            if self.running.load(Ordering::SeqCst) {
                let secs = self
                    .rng
                    .gen_range(self.config.min_sleep_secs..=self.config.max_sleep_secs);
                tracing::info!("Sleeping {}s before next cycle", secs);
                self.interruptible_sleep(Duration::from_secs(secs)).await;
            }
        }
        tracing::info!("Agent loop stopped");
    }

    async fn run_cycle(&mut self) -> Result<Goal> {
        let signals = self.gather_signals()?;
        let goal = match self.planner.decide_pre_mentions(&signals) {
            PreMentionsDecision::Decided(goal) => goal,
            PreMentionsDecision::CheckMentions => {
                // The probe replies as a side effect; an engaged mention
                // consumes the cycle.
                let engaged = match self.scan_mentions().await {
                    Ok(engaged) => engaged,
                    Err(e) => {
                        tracing::warn!("Mentions probe failed: {:#}", e);
                        false
                    }
                };
                self.planner.decide_post_mentions(&signals, engaged)
            }
            PreMentionsDecision::SkipMentions => self.planner.decide_post_mentions(&signals, false),
        };

        tracing::info!("Goal for this cycle: {}", goal.as_str());
        self.planner.record(goal);
        self.dispatch(goal).await?;
        Ok(goal)
    }

    async fn dispatch(&mut self, goal: Goal) -> Result<()> {
        match goal {
            Goal::SelfReflection => self.self_reflection().await,
            Goal::DeepDive => self.funnel.deep_dive_next().await.map(|_| ()),
            Goal::VetPotentialPartner => self.funnel.vet_next().await.map(|_| ()),
            // The mentions probe already performed the engagement
            Goal::NurtureEngagement => Ok(()),
            Goal::ExpandReach => self.expand_reach().await,
            Goal::BrowseFollowingFeed => self.browse_following_feed().await,
            Goal::CuriosityDrivenDiscovery => self.curiosity_driven_discovery().await,
            Goal::MonitorCoreSubjects => self.monitor_core_subjects(None).await,
        }
    }

    fn gather_signals(&self) -> Result<StoreSignals> {
        Ok(StoreSignals {
            reflection_overdue: self.store.marker_elapsed(
                LAST_REFLECTION_KEY,
                hours_duration(self.config.reflection_interval_hours),
            )?,
            has_deep_dive_candidate: self
                .store
                .any_partner_with_status(PartnerStatus::DeepDiveCandidate)?,
            has_discovered_partner: self
                .store
                .any_partner_with_status(PartnerStatus::Discovered)?,
            mentions_check_due: self.store.marker_elapsed(
                LAST_MENTIONS_CHECK_KEY,
                hours_duration(self.config.mentions_check_interval_hours),
            )?,
            vetting_capped: self.funnel.vetting_capped()?,
            last_post_time: self.store.latest_post_time()?,
        })
    }

    // --- Goal actions ---

    /// Research the market, pick a subject, generate and publish a post
    pub async fn expand_reach(&mut self) -> Result<()> {
        self.store.log_action("expand_reach", "system", "STARTED")?;
        let market_summary = self.market.context_line().await;

        let subject = if market_summary.contains("Extreme") {
            "Market Sentiment".to_string()
        } else {
            self.random_core_topic()
        };

        match self
            .synthesizer
            .generate_post(&subject, &market_summary)
            .await
        {
            Some(content) => {
                self.executor.post(&subject, &content).await?;
                Ok(())
            }
            None => {
                tracing::warn!("No content generated, skipping post this cycle");
                Ok(())
            }
        }
    }

    /// Scan the following feed, pick the most worthwhile fresh item, reply
    pub async fn browse_following_feed(&mut self) -> Result<()> {
        self.store
            .log_action("browse_following_feed", "system", "STARTED")?;
        self.perception.open(&PageView::Home).await?;
        if let Err(e) = self.perception.switch_to_following_tab().await {
            tracing::warn!("Could not switch to following tab: {:#}", e);
        }

        let items = self.perception.observed_items(FEED_SCAN_LIMIT).await?;
        let engaged = self.store.engaged_target_ids()?;
        let own_handle = format!("@{}", self.config.bare_handle()).to_lowercase();
        let cutoff = Utc::now() - ChronoDuration::hours(FEED_MAX_AGE_HOURS);

        let candidates: Vec<(usize, FeedItem)> = items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| {
                if item.id.is_empty() || item.author.trim().to_lowercase() == own_handle {
                    return false;
                }
                if engaged.contains(&item.dedup_key()) {
                    return false;
                }
                if item.timestamp.map(|t| t < cutoff).unwrap_or(true) {
                    return false;
                }
                item.text.chars().count() >= MIN_CANDIDATE_TEXT_LEN
            })
            .collect();

        if candidates.is_empty() {
            tracing::info!("No fresh, unengaged posts in the feed");
            return Ok(());
        }

        let listing: Vec<(usize, String)> = candidates
            .iter()
            .map(|(i, item)| (*i, item.text.clone()))
            .collect();
        let mission = "Analyze these fresh posts from your following feed and identify \
                       the single most intellectually stimulating one to comment on, \
                       consistent with your character.";
        let best = match self.synthesizer.pick_best_candidate(mission, &listing).await {
            Some(index) => index,
            None => {
                tracing::info!("No feed candidate selected");
                return Ok(());
            }
        };

        if let Some((_, target)) = candidates.into_iter().find(|(i, _)| *i == best) {
            let context = self.perception.conversation_history(&target.id).await?;
            self.engage_item(&target, "following_feed_reply", &context)
                .await?;
        }
        Ok(())
    }

    /// Weighted-category search expedition; engages one promising thread
    pub async fn curiosity_driven_discovery(&mut self) -> Result<()> {
        self.store
            .log_action("curiosity_driven_discovery", "system", "STARTED")?;

        let query = match self.pick_research_category()? {
            Some(query) => query,
            None => {
                tracing::warn!("No research categories configured");
                return Ok(());
            }
        };
        self.store
            .log_action("curiosity_driven_discovery", &query, "QUERY")?;

        let since = (Utc::now() - ChronoDuration::days(1)).format("%Y-%m-%d");
        let search = format!(
            "{} -from:{} since:{}",
            query,
            self.config.bare_handle(),
            since
        );

        for latest in [false, true] {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            let mode = if latest { "Latest" } else { "Top" };
            tracing::info!("Searching ({}) for: {}", mode, query);
            self.perception
                .open(&PageView::Search {
                    query: search.clone(),
                    latest,
                })
                .await?;

            let items = self.perception.observed_items(10).await?;
            let candidates: Vec<(usize, FeedItem)> = {
                let mut kept = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if item.id.is_empty() || self.store.has_engaged(&item.dedup_key())? {
                        continue;
                    }
                    kept.push((i, item));
                }
                kept
            };
            if candidates.is_empty() {
                tracing::debug!("No unengaged candidates in {} results", mode);
                continue;
            }

            let listing: Vec<(usize, String)> = candidates
                .iter()
                .map(|(i, item)| (*i, item.text.clone()))
                .collect();
            let mission = format!(
                "Analyze these posts discovered while researching '{}'. Identify the \
                 single most intellectually stimulating thread to engage with.",
                query
            );
            let best = match self.synthesizer.pick_best_candidate(&mission, &listing).await {
                Some(index) => index,
                None => continue,
            };

            if let Some((_, target)) = candidates.into_iter().find(|(i, _)| *i == best) {
                let context = self.perception.conversation_history(&target.id).await?;
                if self
                    .engage_item(&target, "discovery_reply", &context)
                    .await?
                {
                    return Ok(());
                }
            }
        }

        tracing::info!("Expedition ended without an engagement");
        Ok(())
    }

    /// Watch a profile: a high-value partner, a discovered candidate, or a
    /// core topic. Discovers mentioned handles and likes probabilistically.
    pub async fn monitor_core_subjects(&mut self, target_override: Option<String>) -> Result<()> {
        self.store
            .log_action("monitor_core_subjects", "system", "STARTED")?;

        let target = match target_override {
            Some(target) => target,
            None => self.pick_monitor_target()?,
        };
        tracing::info!("Monitoring profile: {}", target);

        self.perception
            .open(&PageView::Profile(target.clone()))
            .await?;
        let items = self.perception.observed_items(MONITOR_SCAN_LIMIT).await?;

        for item in items {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Err(e) = self.funnel.discover_handles(&item.text) {
                tracing::warn!("Handle discovery failed: {:#}", e);
            }

            if !item.id.is_empty() && self.rng.gen::<f64>() <= self.config.like_chance {
                match self.perception.like_item(&item.id).await {
                    Ok(true) => {
                        tracing::info!("Liked a post on {}", target);
                        self.store
                            .log_action("monitor_core_subjects", &target, "SUCCESS_LIKED")?;
                    }
                    Ok(false) => tracing::debug!("Post already liked or no like control"),
                    Err(e) => tracing::warn!("Like failed on {}: {:#}", target, e),
                }
            }
        }
        Ok(())
    }

    /// Review recent posts' performance, derive insights, and adapt the
    /// research-category weights. The reflection timer resets even when the
    /// pass fails, so a broken model cannot wedge the ladder's top tier.
    pub async fn self_reflection(&mut self) -> Result<()> {
        self.store
            .log_action("self_reflection", "system", "STARTED")?;
        let outcome = self.run_reflection().await;
        if let Err(e) = self.store.touch_marker(LAST_REFLECTION_KEY) {
            tracing::warn!("Failed to reset reflection timer: {:#}", e);
        }
        match outcome {
            Ok(()) => self.store.log_action("self_reflection", "system", "SUCCESS"),
            Err(e) => {
                self.store
                    .log_action("self_reflection", "system", &format!("FAILURE: {:#}", e))?;
                Err(e)
            }
        }
    }

    async fn run_reflection(&mut self) -> Result<()> {
        let posts = self.store.recent_observations(REFLECTION_POST_LIMIT)?;
        if posts.is_empty() {
            tracing::info!("No posts to reflect on yet");
            return Ok(());
        }
        tracing::info!("Reflecting on {} recent posts", posts.len());

        let mut insights = Vec::new();
        let mut weights: HashMap<String, f64> = (*self.research_weights).clone();

        for post in posts {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let likes = match post.likes {
                Some(likes) => likes,
                None => match self.perception.read_like_count(&post.tweet_id).await {
                    Ok(likes) => {
                        self.store.review_observation(&post.tweet_id, likes)?;
                        likes
                    }
                    Err(e) => {
                        tracing::warn!("Could not read likes for {}: {:#}", post.tweet_id, e);
                        continue;
                    }
                },
            };

            let prompt = format!(
                "Analyze the performance of this post:\n- Subject: {}\n- Likes: {}\n\n\
                 Based on its success or failure, generate a single, actionable \
                 strategic insight for future content. Focus on the TONE, STYLE, or \
                 ANGLE, not just the topic. Generate the insight:",
                post.subject, likes
            );
            match self.synthesizer.analyze(&prompt).await {
                Ok(insight) => {
                    let insight = insight.trim().to_string();
                    tracing::info!("Insight from {} ({} likes): {}", post.tweet_id, likes, insight);
                    insights.push(insight);
                }
                Err(e) => {
                    tracing::warn!("Insight generation failed for {}: {:#}", post.tweet_id, e);
                }
            }

            weights = boost_matching_categories(weights, &post.subject, likes);
        }

        let normalized = normalize_weights(weights);
        match serde_json::to_string(&normalized) {
            Ok(snapshot) => self.store.set_state(RESEARCH_WEIGHTS_KEY, &snapshot)?,
            Err(e) => tracing::warn!("Could not serialize weight snapshot: {}", e),
        }
        tracing::info!("Adapted research weights: {:?}", normalized);
        self.research_weights = Arc::new(normalized);

        self.persist_insights(&insights).await;
        Ok(())
    }

    // Insights feed future generation prompts; a failed embedding only costs
    // that one insight.
    async fn persist_insights(&self, insights: &[String]) {
        for insight in insights {
            let embedding = match self.llm.embed(insight).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!("Failed to embed insight: {:#}", e);
                    continue;
                }
            };
            let id = format!("insight-{}", Uuid::new_v4());
            if let Err(e) = self
                .memory
                .add(&id, &embedding, insight, MemoryKind::Insight, None)
            {
                tracing::warn!("Failed to store insight: {:#}", e);
            }
        }
    }

    /// Vet a specific partner, or the next discovered one
    pub async fn vet_partner(&self, target: Option<String>) -> Result<bool> {
        match target {
            Some(handle) => self.funnel.vet(&handle).await,
            None => self.funnel.vet_next().await,
        }
    }

    /// Deep-dive a specific partner, or the next candidate
    pub async fn deep_dive_partner(&self, target: Option<String>) -> Result<bool> {
        match target {
            Some(handle) => self.funnel.deep_dive(&handle).await,
            None => self.funnel.deep_dive_next().await,
        }
    }

    /// Check for recent unhandled mentions; replies to the first viable one.
    /// Returns whether an engagement happened.
    pub async fn scan_mentions(&mut self) -> Result<bool> {
        self.store
            .log_action("scan_mentions", "system", "STARTED")?;
        self.store.touch_marker(LAST_MENTIONS_CHECK_KEY)?;

        self.perception.open(&PageView::Mentions).await?;
        let items = self.perception.observed_items(MENTIONS_SCAN_LIMIT).await?;
        let replied = self.store.replied_target_ids()?;
        let candidates = fresh_mentions(items, &replied, Utc::now());

        for mention in candidates {
            tracing::info!("Unhandled mention found: {}", mention.id);
            let context = match self.perception.conversation_history(&mention.id).await {
                Ok(context) => context,
                Err(e) => {
                    tracing::debug!("Skipping mention {}: {:#}", mention.id, e);
                    continue;
                }
            };
            if self
                .engage_item(&mention, "mention_reply_with_context", &context)
                .await?
            {
                return Ok(true);
            }
        }

        tracing::debug!("No new unhandled mentions");
        Ok(false)
    }

    /// Shared reply path: triage, generate within budget, submit
    async fn engage_item(
        &self,
        target: &FeedItem,
        engagement_type: &str,
        context: &str,
    ) -> Result<bool> {
        let (strategy, shill_level) =
            match self.synthesizer.triage(&target.text, &target.author).await {
                TriageOutcome::Reply {
                    strategy,
                    shill_level,
                } => (strategy, shill_level),
                TriageOutcome::Ignore => {
                    tracing::debug!("Triage declined {}", target.dedup_key());
                    return Ok(false);
                }
            };

        let content = match self
            .synthesizer
            .generate_reply(context, &target.text, &strategy, &shill_level)
            .await
        {
            Some(content) => content,
            None => {
                tracing::warn!("No reply generated for {}", target.dedup_key());
                return Ok(false);
            }
        };

        self.executor.reply(target, engagement_type, &content).await
    }

    // --- Target selection helpers ---

    fn random_core_topic(&mut self) -> String {
        let topics = &self.config.core_topics;
        if topics.is_empty() {
            return "the market".to_string();
        }
        topics[self.rng.gen_range(0..topics.len())].clone()
    }

    /// Monitoring target: high-value vetted partner (p=0.5), else a random
    /// discovered partner (p=0.25 of the remainder), else a core topic.
    fn pick_monitor_target(&mut self) -> Result<String> {
        if self.rng.gen::<f64>() < HIGH_VALUE_PARTNER_CHANCE {
            if let Some(partner) = self.store.high_value_vetted_partner()? {
                tracing::info!("Proactively engaging high-value partner: {}", partner);
                return Ok(partner);
            }
        }
        if self.rng.gen::<f64>() < DISCOVERED_PARTNER_CHANCE {
            if let Some(partner) = self
                .store
                .random_partner_with_status(PartnerStatus::Discovered)?
            {
                tracing::info!("Proactively checking potential partner: {}", partner);
                return Ok(partner);
            }
        }
        Ok(self.random_core_topic())
    }

    /// Weighted category pick, avoiding categories queried recently
    fn pick_research_category(&mut self) -> Result<Option<String>> {
        let recent: Vec<String> = self
            .store
            .recent_actions(30)?
            .into_iter()
            .filter(|a| a.action_name == "curiosity_driven_discovery" && a.status == "QUERY")
            .take(3)
            .map(|a| a.target)
            .collect();

        let mut available: HashMap<String, f64> = self
            .research_weights
            .iter()
            .filter(|(category, _)| !recent.contains(*category))
            .map(|(category, weight)| (category.clone(), *weight))
            .collect();
        if available.is_empty() {
            available = (*self.research_weights).clone();
        }

        Ok(weighted_pick(&mut self.rng, &available))
    }

    // Sleep in one-second slices so the stop flag interrupts long waits
    async fn interruptible_sleep(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && self.running.load(Ordering::SeqCst) {
            let slice = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
}

fn hours_duration(hours: f64) -> ChronoDuration {
    ChronoDuration::seconds((hours * 3600.0) as i64)
}

/// Stored weight snapshot when present, otherwise the configured baseline
pub fn load_research_weights(store: &AgentStore, config: &AgentConfig) -> HashMap<String, f64> {
    if let Ok(Some(raw)) = store.get_state(RESEARCH_WEIGHTS_KEY) {
        if let Ok(parsed) = serde_json::from_str::<HashMap<String, f64>>(&raw) {
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }
    config.research_categories.clone()
}

/// Boost categories related to a successful post's subject; the more likes,
/// the bigger the boost. Posts at or below the threshold leave weights alone.
pub fn boost_matching_categories(
    mut weights: HashMap<String, f64>,
    subject: &str,
    likes: i64,
) -> HashMap<String, f64> {
    if likes <= LIKE_BOOST_THRESHOLD {
        return weights;
    }
    let subject = subject.to_lowercase();
    let factor = 1.0 + (likes as f64 / 100.0);
    for (category, weight) in weights.iter_mut() {
        let category = category.to_lowercase();
        if subject.contains(&category) || category.contains(&subject) {
            *weight *= factor;
        }
    }
    weights
}

/// Scale weights to sum to 1.0; empty or all-zero maps pass through
pub fn normalize_weights(mut weights: HashMap<String, f64>) -> HashMap<String, f64> {
    let total: f64 = weights.values().sum();
    if total > 0.0 {
        for weight in weights.values_mut() {
            *weight /= total;
        }
    }
    weights
}

/// Weighted random choice over a category map
pub fn weighted_pick(rng: &mut StdRng, weights: &HashMap<String, f64>) -> Option<String> {
    let total: f64 = weights.values().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return weights.keys().next().cloned();
    }
    let mut roll = rng.gen::<f64>() * total;
    let mut last = None;
    for (category, weight) in weights {
        if *weight <= 0.0 {
            continue;
        }
        if roll < *weight {
            return Some(category.clone());
        }
        roll -= weight;
        last = Some(category.clone());
    }
    last
}

/// Mentions worth engaging: recent, carrying a platform id, not yet replied to
pub fn fresh_mentions(
    items: Vec<FeedItem>,
    replied: &std::collections::HashSet<String>,
    now: chrono::DateTime<Utc>,
) -> Vec<FeedItem> {
    let cutoff = now - ChronoDuration::days(MENTION_MAX_AGE_DAYS);
    items
        .into_iter()
        .filter(|item| {
            !item.id.is_empty()
                && !replied.contains(&item.id)
                && item.timestamp.map(|t| t >= cutoff).unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn item(id: &str, days_old: i64) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            author: "@someone".to_string(),
            text: "mention text".to_string(),
            timestamp: Some(Utc::now() - ChronoDuration::days(days_old)),
            url: String::new(),
        }
    }

    #[test]
    fn fresh_mentions_filters_old_replied_and_anonymous() {
        let mut replied = HashSet::new();
        replied.insert("2".to_string());
        let mut no_timestamp = item("4", 0);
        no_timestamp.timestamp = None;

        let kept = fresh_mentions(
            vec![item("1", 1), item("2", 1), item("3", 7), no_timestamp],
            &replied,
            Utc::now(),
        );
        let ids: Vec<&str> = kept.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn boost_applies_only_above_threshold_and_on_subject_match() {
        let mut weights = HashMap::new();
        weights.insert("defi".to_string(), 0.5);
        weights.insert("infrastructure".to_string(), 0.5);

        let unchanged = boost_matching_categories(weights.clone(), "DeFi yields", 3);
        assert_eq!(unchanged["defi"], 0.5);

        let boosted = boost_matching_categories(weights, "DeFi yields", 20);
        assert!((boosted["defi"] - 0.6).abs() < 1e-9);
        assert_eq!(boosted["infrastructure"], 0.5);
    }

    #[test]
    fn normalization_sums_to_one() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 2.0);
        weights.insert("b".to_string(), 6.0);
        let normalized = normalize_weights(weights);
        let total: f64 = normalized.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((normalized["b"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn weighted_pick_respects_weights() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut weights = HashMap::new();
        weights.insert("heavy".to_string(), 0.99);
        weights.insert("light".to_string(), 0.01);

        let mut heavy = 0;
        for _ in 0..1000 {
            if weighted_pick(&mut rng, &weights).as_deref() == Some("heavy") {
                heavy += 1;
            }
        }
        assert!(heavy > 950);

        assert_eq!(weighted_pick(&mut rng, &HashMap::new()), None);
    }

    #[test]
    fn stored_weight_snapshot_wins_over_config() {
        let dir = tempdir().expect("tempdir");
        let store = AgentStore::new(dir.path().join("state.db")).expect("store");
        let config = AgentConfig::default();

        // No snapshot yet: config baseline
        let baseline = load_research_weights(&store, &config);
        assert_eq!(baseline, config.research_categories);

        store
            .set_state(RESEARCH_WEIGHTS_KEY, r#"{"defi": 0.9, "nfts": 0.1}"#)
            .expect("set");
        let loaded = load_research_weights(&store, &config);
        assert_eq!(loaded["defi"], 0.9);
        assert_eq!(loaded.len(), 2);
    }
}

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::{MemoryKind, VectorMemory};
use crate::retry::RetryPolicy;

/// Hard budget for a standalone post.
pub const POST_CHAR_LIMIT: usize = 280;
/// Tighter budget for replies, leaving headroom for platform chrome.
pub const REPLY_CHAR_LIMIT: usize = 240;

/// Outcome of triaging an observed item before engaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageOutcome {
    Reply { strategy: String, shill_level: String },
    Ignore,
}

#[derive(Debug, Deserialize)]
struct TriageRaw {
    decision: Option<String>,
    strategy: Option<String>,
    shill_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BestIndexRaw {
    best_index: Option<i64>,
    #[allow(dead_code)]
    reason: Option<String>,
}

/// Builds prompts from templates and recalled memory, calls the model, and
/// enforces format and length constraints. Model failures degrade to "no
/// content" so callers can skip the action instead of erroring.
pub struct ContentSynthesizer {
    llm: LlmClient,
    memory: Arc<VectorMemory>,
    creation_model: String,
    reflective_model: String,
    persona_template: String,
    reply_template: String,
    persona_primer: String,
    retry: RetryPolicy,
}

impl ContentSynthesizer {
    pub fn new(
        llm: LlmClient,
        memory: Arc<VectorMemory>,
        creation_model: String,
        reflective_model: String,
        persona_template: String,
        reply_template: String,
    ) -> Self {
        let persona_primer = persona_primer(&persona_template);
        Self {
            llm,
            memory,
            creation_model,
            reflective_model,
            persona_template,
            reply_template,
            persona_primer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn primer(&self) -> &str {
        &self.persona_primer
    }

    /// Retrieve up to `k` memory documents semantically near `query`.
    /// Never errors the caller: retrieval failures degrade to an empty set.
    pub async fn recall(&self, query: &str, kinds: &[MemoryKind], k: usize) -> Vec<String> {
        let embedding = match self.llm.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Recall embedding failed, continuing without memory: {:#}", e);
                return Vec::new();
            }
        };
        match self.memory.query(&embedding, k, kinds) {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!("Memory query failed, continuing without memory: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Strategic context block injected into generation prompts: market
    /// summary plus insights and operator directives recalled from memory.
    async fn strategic_context(&self, subject: &str, market_context: &str) -> String {
        let query = format!("strategic insights about {} and market sentiment", subject);
        let insights = self
            .recall(
                &query,
                &[MemoryKind::Insight, MemoryKind::UserDirective],
                3,
            )
            .await;
        let insight_block = if insights.is_empty() {
            "No strategic insights found in memory.".to_string()
        } else {
            tracing::debug!("Applying {} recalled insights", insights.len());
            insights
                .iter()
                .map(|doc| format!("- {}", doc))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let own_posts = self.recall(subject, &[MemoryKind::SelfPosted], 2).await;
        let consistency_block = if own_posts.is_empty() {
            String::new()
        } else {
            let formatted = own_posts
                .iter()
                .map(|doc| format!("- {}", doc))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "\n\n3. YOUR OWN PREVIOUS STATEMENTS ON THIS TOPIC:\n{}",
                formatted
            )
        };

        let market = if market_context.trim().is_empty() {
            "No specific market event."
        } else {
            market_context
        };

        format!(
            "1. CONTEXTUAL SUMMARY:\n{}\n\n2. STRATEGIC INSIGHTS FROM PAST PERFORMANCE (Your Memory):\n{}{}",
            market, insight_block, consistency_block
        )
    }

    /// Generate a standalone post about `subject`. Returns None when the
    /// model is unavailable so the caller can skip the cycle.
    pub async fn generate_post(&self, subject: &str, market_context: &str) -> Option<String> {
        let context = self.strategic_context(subject, market_context).await;
        let prompt = self
            .persona_template
            .replace("{observed_subject}", subject)
            .replace("{successful_examples}", &context);

        let raw = match self
            .retry
            .run("post generation", || {
                self.llm.complete(&self.creation_model, &prompt)
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Post generation failed: {:#}", e);
                return None;
            }
        };

        let cleaned = clean_model_text(&raw);
        Some(self.enforce_limit(cleaned, POST_CHAR_LIMIT).await)
    }

    /// Generate a reply within a conversation, parameterized by the triage
    /// strategy and promotional-intensity tags.
    pub async fn generate_reply(
        &self,
        conversation_history: &str,
        source_text: &str,
        strategy: &str,
        shill_level: &str,
    ) -> Option<String> {
        let prompt = self
            .reply_template
            .replace("{conversation_history}", conversation_history)
            .replace("{user_reply_text}", source_text)
            .replace("{strategy}", strategy)
            .replace("{shill_level}", shill_level);

        let raw = match self
            .retry
            .run("reply generation", || {
                self.llm.complete(&self.creation_model, &prompt)
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Reply generation failed: {:#}", e);
                return None;
            }
        };

        let cleaned = clean_model_text(&raw);
        Some(self.enforce_limit(cleaned, REPLY_CHAR_LIMIT).await)
    }

    /// Decide whether an observed item deserves a reply. Any model failure
    /// or ambiguous output defaults to Ignore.
    pub async fn triage(&self, source_text: &str, author: &str) -> TriageOutcome {
        let prompt = format!(
            "{} You observed this post from {}:\n\"{}\"\n\nDecide whether to reply. \
             Return ONLY a JSON object with keys \"decision\" (REPLY or IGNORE), \
             \"strategy\" (a short tag describing the angle, e.g. \"analytical\", \
             \"curious_question\", \"supportive\") and \"shill_level\" (none, low, or high).",
            self.persona_primer, author, source_text
        );

        match self
            .llm
            .complete_json::<TriageRaw>(&self.reflective_model, &prompt)
            .await
        {
            Ok(raw) => parse_triage(raw),
            Err(e) => {
                tracing::debug!("Triage failed, defaulting to ignore: {:#}", e);
                TriageOutcome::Ignore
            }
        }
    }

    /// Ask the model to pick the single most worthwhile candidate. Returns
    /// None when it declines or answers out of range (no action, not error).
    pub async fn pick_best_candidate(
        &self,
        mission: &str,
        candidates: &[(usize, String)],
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let valid: Vec<usize> = candidates.iter().map(|(i, _)| *i).collect();
        let listing = candidates
            .iter()
            .map(|(i, text)| format!("[{}] {}", i, text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "{} {}\n\nCandidates:\n{}\n\nValid indices are: {:?}. Return a JSON \
             object with 'best_index' and a brief 'reason'. If none are worthy, \
             return an empty JSON object.",
            self.persona_primer, mission, listing, valid
        );

        match self
            .llm
            .complete_json::<BestIndexRaw>(&self.reflective_model, &prompt)
            .await
        {
            Ok(raw) => validate_best_index(raw.best_index, &valid),
            Err(e) => {
                tracing::debug!("Candidate scoring failed: {:#}", e);
                None
            }
        }
    }

    /// Request a free-form analytical completion with the reflective model
    pub async fn analyze(&self, prompt: &str) -> Result<String> {
        self.retry
            .run("analysis", || self.llm.complete(&self.reflective_model, prompt))
            .await
    }

    // One re-shortening request, then deterministic truncation. The returned
    // text never exceeds `limit` characters.
    async fn enforce_limit(&self, text: String, limit: usize) -> String {
        if text.chars().count() <= limit {
            return text;
        }

        tracing::debug!(
            "Generated text over budget ({} chars > {}), requesting shorter version",
            text.chars().count(),
            limit
        );
        let shortening_prompt = format!(
            "CRITICAL: The following text MUST be under {} characters. Ruthlessly \
             shorten it to be WELL UNDER the limit while preserving the core \
             meaning. Output only the shortened text. TEXT: '{}'",
            limit, text
        );
        let shortened = match self
            .llm
            .complete(&self.reflective_model, &shortening_prompt)
            .await
        {
            Ok(raw) => clean_model_text(&raw),
            Err(_) => text,
        };

        truncate_to_limit(&shortened, limit)
    }
}

/// Parse a raw triage payload with fail-safe defaults
fn parse_triage(raw: TriageRaw) -> TriageOutcome {
    match raw.decision.as_deref().map(str::trim) {
        Some(decision) if decision.eq_ignore_ascii_case("reply") => TriageOutcome::Reply {
            strategy: raw
                .strategy
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "analytical".to_string()),
            shill_level: raw
                .shill_level
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "none".to_string()),
        },
        _ => TriageOutcome::Ignore,
    }
}

fn validate_best_index(best_index: Option<i64>, valid: &[usize]) -> Option<usize> {
    let index = usize::try_from(best_index?).ok()?;
    valid.contains(&index).then_some(index)
}

/// First sentence of the persona template, reused as a primer for internal
/// decision prompts.
pub fn persona_primer(template: &str) -> String {
    match template.split('.').next().map(str::trim) {
        Some(first) if !first.is_empty() => format!("{}.", first),
        _ => "You are an autonomous research agent.".to_string(),
    }
}

/// Strip wrapping quotes and leading role-name prefixes from model output
pub fn clean_model_text(raw: &str) -> String {
    let mut text = raw.trim();

    for quote in ['"', '\u{201c}', '\u{2018}', '\''] {
        let closing = match quote {
            '\u{201c}' => '\u{201d}',
            '\u{2018}' => '\u{2019}',
            other => other,
        };
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(closing) {
            text = text[quote.len_utf8()..text.len() - closing.len_utf8()].trim();
        }
    }

    // Models sometimes speak in character: "Agent: the actual post"
    for role in ["assistant", "agent", "ai", "reply", "post", "tweet"] {
        if let Some(rest) = text
            .split_once(':')
            .filter(|(prefix, _)| prefix.trim().eq_ignore_ascii_case(role))
            .map(|(_, rest)| rest.trim())
        {
            text = rest;
            break;
        }
    }

    text.to_string()
}

/// Deterministic truncation: cut at the last sentence-ending punctuation
/// inside the budget when one lands past the halfway mark, otherwise
/// hard-cut with an ellipsis. Never returns more than `limit` characters.
pub fn truncate_to_limit(text: &str, limit: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }

    let window = &chars[..limit];
    let sentence_end = window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?'))
        .filter(|pos| *pos >= limit / 2);

    match sentence_end {
        Some(pos) => window[..=pos].iter().collect(),
        None => {
            let mut cut: String = chars[..limit.saturating_sub(1)].iter().collect();
            cut.push('\u{2026}');
            cut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_budget_with_no_punctuation() {
        let pathological = "x".repeat(1000);
        let result = truncate_to_limit(&pathological, 280);
        assert!(result.chars().count() <= 280);
        assert!(result.ends_with('\u{2026}'));
    }

    #[test]
    fn truncation_cuts_at_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(200), "b".repeat(200));
        let result = truncate_to_limit(&text, 280);
        assert_eq!(result, format!("{}.", "a".repeat(200)));
    }

    #[test]
    fn truncation_ignores_too_early_sentence_break() {
        let text = format!("Hi. {}", "c".repeat(500));
        let result = truncate_to_limit(&text, 280);
        assert!(result.chars().count() <= 280);
        assert!(result.ends_with('\u{2026}'));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_limit("fine as is", 280), "fine as is");
    }

    #[test]
    fn reply_budget_is_enforced_too() {
        let result = truncate_to_limit(&"y".repeat(600), REPLY_CHAR_LIMIT);
        assert!(result.chars().count() <= REPLY_CHAR_LIMIT);
    }

    #[test]
    fn cleaning_strips_quotes_and_role_prefixes() {
        assert_eq!(clean_model_text("\"quoted output\""), "quoted output");
        assert_eq!(clean_model_text("Agent: the real text"), "the real text");
        assert_eq!(
            clean_model_text("  \"Reply: nested cleanup\"  "),
            "nested cleanup"
        );
        assert_eq!(
            clean_model_text("Note: colons in content survive"),
            "Note: colons in content survive"
        );
    }

    #[test]
    fn triage_defaults_to_ignore() {
        let outcome = parse_triage(TriageRaw {
            decision: None,
            strategy: None,
            shill_level: None,
        });
        assert_eq!(outcome, TriageOutcome::Ignore);

        let outcome = parse_triage(TriageRaw {
            decision: Some("MAYBE".to_string()),
            strategy: Some("analytical".to_string()),
            shill_level: Some("low".to_string()),
        });
        assert_eq!(outcome, TriageOutcome::Ignore);
    }

    #[test]
    fn triage_reply_fills_missing_tags() {
        let outcome = parse_triage(TriageRaw {
            decision: Some("reply".to_string()),
            strategy: None,
            shill_level: Some("".to_string()),
        });
        assert_eq!(
            outcome,
            TriageOutcome::Reply {
                strategy: "analytical".to_string(),
                shill_level: "none".to_string(),
            }
        );
    }

    #[test]
    fn best_index_must_be_in_range() {
        assert_eq!(validate_best_index(Some(2), &[0, 2, 5]), Some(2));
        assert_eq!(validate_best_index(Some(3), &[0, 2, 5]), None);
        assert_eq!(validate_best_index(Some(-1), &[0, 2, 5]), None);
        assert_eq!(validate_best_index(None, &[0, 2, 5]), None);
    }

    #[test]
    fn primer_is_first_sentence() {
        assert_eq!(
            persona_primer("You are a careful analyst. You write posts."),
            "You are a careful analyst."
        );
        assert_eq!(persona_primer(""), "You are an autonomous research agent.");
    }
}

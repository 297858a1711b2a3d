use anyhow::{Context, Result};
use serde_json::Value;

use crate::llm::LlmClient;

const PRICE_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin,solana&vs_currencies=usd&include_24hr_change=true";
const GLOBAL_URL: &str = "https://api.coingecko.com/api/v3/global";
const FEAR_GREED_URL: &str = "https://api.alternative.me/fng/?limit=1";

/// Pulls a coarse market snapshot from public endpoints and condenses it to a
/// one-line analyst note for generation prompts. Everything degrades to a
/// neutral placeholder; market color is never worth failing a cycle over.
pub struct MarketResearch {
    client: reqwest::Client,
    llm: LlmClient,
    reflective_model: String,
    persona_primer: String,
}

impl MarketResearch {
    pub fn new(llm: LlmClient, reflective_model: String, persona_primer: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            llm,
            reflective_model,
            persona_primer,
        }
    }

    /// Raw snapshot line, e.g. "BTC Dominance: 54.10%, Fear & Greed: 71 (Greed), ..."
    pub async fn snapshot(&self) -> String {
        match self.fetch_snapshot().await {
            Ok(line) => {
                tracing::info!("Market snapshot: {}", line);
                line
            }
            Err(e) => {
                tracing::warn!("Market data fetch failed: {:#}", e);
                "Market data currently unavailable.".to_string()
            }
        }
    }

    async fn fetch_snapshot(&self) -> Result<String> {
        let prices = self.fetch_json(PRICE_URL).await?;
        let btc_change = read_f64(&prices, &["bitcoin", "usd_24h_change"]);
        let sol_price = read_f64(&prices, &["solana", "usd"]);
        let sol_change = read_f64(&prices, &["solana", "usd_24h_change"]);

        let fng = self.fetch_json(FEAR_GREED_URL).await?;
        let fear_greed_value = fng["data"][0]["value"]
            .as_str()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(50);
        let fear_greed_text = fng["data"][0]["value_classification"]
            .as_str()
            .unwrap_or("Neutral")
            .to_string();

        let global = self.fetch_json(GLOBAL_URL).await?;
        let btc_dominance = read_f64(&global, &["data", "market_cap_percentage", "btc"]);

        Ok(format!(
            "BTC Dominance: {:.2}%, Fear & Greed: {} ({}), BTC 24h Change: {:.2}%, \
             SOL Price: ${:.2}, SOL 24h Change: {:.2}%",
            btc_dominance, fear_greed_value, fear_greed_text, btc_change, sol_price, sol_change
        ))
    }

    async fn fetch_json(&self, url: &str) -> Result<Value> {
        self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .json()
            .await
            .with_context(|| format!("Response from {} was not JSON", url))
    }

    /// One-sentence in-persona interpretation of the raw snapshot
    pub async fn analyst_note(&self, raw: &str) -> String {
        if raw.contains("unavailable") {
            return "Market data was unavailable.".to_string();
        }
        let prompt = format!(
            "{} You are currently in the role of a market analyst. Based on the raw \
             data provided, generate a one-sentence summary for your own internal \
             analysis, interpreting the key data points (BTC dominance, fear/greed, \
             relative asset performance) in your established persona.\n\nRaw Data:\n{}\n\n\
             Provide your one-sentence clinical summary:",
            self.persona_primer, raw
        );
        match self.llm.complete(&self.reflective_model, &prompt).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::warn!("Market analyst summary failed: {:#}", e);
                "Failed to analyze market state.".to_string()
            }
        }
    }

    /// Full research pass: snapshot then in-persona summary
    pub async fn context_line(&self) -> String {
        let raw = self.snapshot().await;
        self.analyst_note(&raw).await
    }
}

fn read_f64(value: &Value, path: &[&str]) -> f64 {
    let mut node = value;
    for key in path {
        node = &node[*key];
    }
    node.as_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_f64_walks_nested_keys() {
        let value = json!({"data": {"market_cap_percentage": {"btc": 54.3}}});
        assert_eq!(
            read_f64(&value, &["data", "market_cap_percentage", "btc"]),
            54.3
        );
        assert_eq!(read_f64(&value, &["data", "missing"]), 0.0);
    }
}

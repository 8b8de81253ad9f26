//! Analysis capabilities: gather data, then ask the model with a dedicated prompt

use super::{lang_param, symbol_param, DataSources};
use crate::catalog::{Arguments, Capability, InputShape};
use crate::decision::TextGeneration;
use crate::formatters::{format_derivatives, format_header, format_kline, format_news};
use crate::prompts::{analyst_persona, grounded_analysis_prompt, AnalysisKind};
use crate::tools::news::RECENT_NEWS_DEFAULT;
use crate::validators::validate_symbol;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AnalysisCapability {
    kind: AnalysisKind,
    sources: DataSources,
    generator: Arc<dyn TextGeneration>,
    days: usize,
}

impl AnalysisCapability {
    pub fn new(
        kind: AnalysisKind,
        sources: DataSources,
        generator: Arc<dyn TextGeneration>,
        days: usize,
    ) -> Self {
        Self {
            kind,
            sources,
            generator,
            days,
        }
    }

    async fn news_text(&self, symbol: &str) -> Result<String> {
        let news = self.sources.news()?.recent_news(symbol, RECENT_NEWS_DEFAULT).await?;
        Ok(format_news(&news))
    }

    /// News is optional context for the combined analyses.
    async fn news_text_or_note(&self, symbol: &str) -> String {
        match self.news_text(symbol).await {
            Ok(text) => text,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "News unavailable for combined analysis");
                "暂无相关新闻".to_string()
            }
        }
    }

    /// Everything the quantitative and summary prompts score over.
    async fn combined_data(&self, symbol: &str) -> Result<String> {
        let market = &self.sources.market;
        let (header, kline, derivatives) = futures::try_join!(
            market.header(symbol),
            market.kline(symbol),
            market.derivatives(symbol),
        )?;
        let news = self.news_text_or_note(symbol).await;

        Ok(format!(
            "## 基础信息\n{}\n\n## 日线数据\n{}\n\n## 衍生品数据\n{}\n\n## 近期新闻\n{}",
            format_header(&header),
            format_kline(&kline, self.days),
            format_derivatives(&derivatives),
            news,
        ))
    }

    async fn build_prompt(&self, symbol: &str, template: String) -> Result<String> {
        let market = &self.sources.market;

        let prompt = match self.kind {
            AnalysisKind::Technical => {
                let (header, kline) = futures::try_join!(market.header(symbol), market.kline(symbol))?;
                grounded_analysis_prompt(
                    symbol,
                    &template,
                    &format_header(&header),
                    &format_kline(&kline, self.days),
                )
            }
            AnalysisKind::News => {
                format!("{}\n\n新闻数据：\n{}", template, self.news_text(symbol).await?)
            }
            AnalysisKind::Derivatives => {
                let snapshot = market.derivatives(symbol).await?;
                format!("{}\n\n{}", template, format_derivatives(&snapshot))
            }
            AnalysisKind::Quantitative | AnalysisKind::Summary => {
                format!("{}\n\n# 数据\n{}", template, self.combined_data(symbol).await?)
            }
        };

        Ok(prompt)
    }
}

#[async_trait::async_trait]
impl Capability for AnalysisCapability {
    fn name(&self) -> &'static str {
        match self.kind {
            AnalysisKind::Technical => "technical_analysis",
            AnalysisKind::News => "news_analysis",
            AnalysisKind::Derivatives => "derivatives_analysis",
            AnalysisKind::Quantitative => "quantitative_analysis",
            AnalysisKind::Summary => "summary_analysis",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            AnalysisKind::Technical => {
                "Technical analysis from daily candles: trend, support/resistance, indicators."
            }
            AnalysisKind::News => "Analyze recent news for a crypto asset: sentiment and event impact.",
            AnalysisKind::Derivatives => {
                "Analyze derivatives market data: long-short structure, capital flows, sentiment."
            }
            AnalysisKind::Quantitative => {
                "Quantitative analysis with a six-factor scoring model, giving a probability assessment."
            }
            AnalysisKind::Summary => "Final summary combining technical, news, derivatives and quantitative views.",
        }
    }

    fn input_shape(&self) -> InputShape {
        InputShape::new(vec![symbol_param(), lang_param()])
    }

    async fn execute(&self, args: &Arguments) -> Result<String> {
        let symbol = validate_symbol(args.str("symbol")?)?;
        let lang = args.language("lang");

        let prompt = self.build_prompt(&symbol, self.kind.template(&symbol, lang)).await?;
        debug!(capability = self.name(), prompt_chars = prompt.chars().count(), "Analysis prompt built");

        self.generator.generate(analyst_persona(lang), &prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawArguments;
    use crate::error::AnalystError;
    use crate::tools::testing::{sources, RecordingGenerator};
    use serde_json::json;

    async fn run(kind: AnalysisKind, with_news: bool, raw: serde_json::Value) -> (Result<String>, Arc<RecordingGenerator>) {
        let generator = Arc::new(RecordingGenerator::default());
        let capability = AnalysisCapability::new(kind, sources(with_news), generator.clone(), 30);
        let args = RawArguments::from_value(raw).normalize(&capability.input_shape()).unwrap();
        (capability.execute(&args).await, generator)
    }

    #[tokio::test]
    async fn test_technical_prompt_is_grounded_in_data() {
        let (output, generator) = run(AnalysisKind::Technical, true, json!("btc")).await;
        assert_eq!(output.unwrap(), "generated analysis");

        let prompts = generator.prompts.lock().unwrap();
        let (system, prompt) = &prompts[0];
        assert!(system.contains("加密货币分析师"));
        assert!(prompt.contains("## 币种（BTC）基础信息"));
        assert!(prompt.contains("2024-01-01"));
    }

    #[tokio::test]
    async fn test_english_persona() {
        let (_, generator) = run(AnalysisKind::Derivatives, true, json!({"symbol": "ETH", "lang": "en"})).await;
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].0.starts_with("You are a professional"));
        assert!(prompts[0].1.contains("derivatives market data for ETH"));
    }

    #[tokio::test]
    async fn test_news_analysis_requires_news_source() {
        let (output, _) = run(AnalysisKind::News, false, json!("BTC")).await;
        assert!(matches!(output, Err(AnalystError::Capability(_))));
    }

    #[tokio::test]
    async fn test_summary_tolerates_missing_news() {
        let (output, generator) = run(AnalysisKind::Summary, false, json!("BTC")).await;
        assert!(output.is_ok());
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].1.contains("## 近期新闻\n暂无相关新闻"));
        assert!(prompts[0].1.contains("## 衍生品数据"));
    }
}

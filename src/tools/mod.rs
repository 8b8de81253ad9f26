//! Concrete capability set
//!
//! Data capabilities fetch and format upstream data. Analysis capabilities
//! additionally hand that data to a text generator with a dedicated prompt.

use crate::catalog::{CapabilityCatalog, ParamKind, ParamSpec};
use crate::config::Settings;
use crate::data::{MarketDataSource, NewsSource};
use crate::decision::TextGeneration;
use crate::error::AnalystError;
use crate::Result;
use serde_json::json;
use std::sync::Arc;

pub mod analysis;
pub mod derivatives;
pub mod market;
pub mod news;
pub mod prompt;

pub use analysis::AnalysisCapability;
pub use derivatives::{DerivativesCapability, DerivativesKind};
pub use market::{MarketCapability, MarketKind};
pub use news::{NewsCapability, NewsKind};
pub use prompt::{PromptTemplateCapability, SystemPromptCapability};

/// Upstream collaborators shared by all capabilities.
#[derive(Clone)]
pub struct DataSources {
    pub market: Arc<dyn MarketDataSource>,
    /// `None` when no news database is configured.
    pub news: Option<Arc<dyn NewsSource>>,
}

impl DataSources {
    pub(crate) fn news(&self) -> Result<&Arc<dyn NewsSource>> {
        self.news.as_ref().ok_or_else(|| {
            AnalystError::Capability("NEWS_DATABASE_URL is not configured".to_string())
        })
    }
}

pub(crate) fn symbol_param() -> ParamSpec {
    ParamSpec::required("symbol", ParamKind::String, "Crypto asset symbol, e.g. BTC or ETH")
}

pub(crate) fn lang_param() -> ParamSpec {
    ParamSpec::optional("lang", ParamKind::String, "Output language: zh or en", Some(json!("zh")))
}

pub(crate) fn limit_param(default: Option<u32>) -> ParamSpec {
    ParamSpec::optional(
        "limit",
        ParamKind::Integer,
        "Maximum number of news items to return",
        default.map(|d| json!(d)),
    )
}

/// Create the catalog with all capabilities, in advertised order.
pub fn create_default_catalog(
    settings: &Settings,
    sources: DataSources,
    generator: Arc<dyn TextGeneration>,
) -> Result<CapabilityCatalog> {
    let days = settings.kline_days_limit;
    let max_news = settings.max_news_items;

    let mut builder = CapabilityCatalog::builder();

    for kind in MarketKind::ALL {
        builder = builder.register(Arc::new(MarketCapability::new(kind, sources.market.clone(), days)));
    }
    for kind in NewsKind::ALL {
        builder = builder.register(Arc::new(NewsCapability::new(kind, sources.news.clone(), max_news)));
    }
    for kind in DerivativesKind::ALL {
        builder = builder.register(Arc::new(DerivativesCapability::new(kind, sources.market.clone())));
    }
    for kind in crate::prompts::AnalysisKind::ALL {
        builder = builder.register(Arc::new(AnalysisCapability::new(
            kind,
            sources.clone(),
            generator.clone(),
            days,
        )));
    }

    builder
        .register(Arc::new(PromptTemplateCapability))
        .register(Arc::new(SystemPromptCapability))
        .build()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::data::testing::{StaticMarketData, StaticNews};
    use std::sync::Mutex;

    /// Records prompts and answers with a fixed string.
    #[derive(Default)]
    pub struct RecordingGenerator {
        pub prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl TextGeneration for RecordingGenerator {
        async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push((system.to_string(), prompt.to_string()));
            Ok("generated analysis".to_string())
        }
    }

    pub fn sources(with_news: bool) -> DataSources {
        DataSources {
            market: Arc::new(StaticMarketData { fail: false }),
            news: if with_news {
                Some(Arc::new(StaticNews::with_items(30)) as Arc<dyn NewsSource>)
            } else {
                None
            },
        }
    }
}

use super::{limit_param, symbol_param};
use crate::catalog::{Arguments, Capability, InputShape};
use crate::data::NewsSource;
use crate::error::AnalystError;
use crate::formatters::format_news;
use crate::validators::{validate_limit, validate_symbol};
use crate::Result;
use std::sync::Arc;

pub const RECENT_NEWS_DEFAULT: u32 = 20;
pub const RECENT_NEWS_MAX: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsKind {
    Feed,
    Recent,
    Count,
}

impl NewsKind {
    pub const ALL: [NewsKind; 3] = [NewsKind::Feed, NewsKind::Recent, NewsKind::Count];
}

pub struct NewsCapability {
    kind: NewsKind,
    source: Option<Arc<dyn NewsSource>>,
    max_items: u32,
}

impl NewsCapability {
    pub fn new(kind: NewsKind, source: Option<Arc<dyn NewsSource>>, max_items: u32) -> Self {
        Self {
            kind,
            source,
            max_items,
        }
    }

    fn max_limit(&self) -> u32 {
        match self.kind {
            NewsKind::Recent => RECENT_NEWS_MAX.min(self.max_items),
            _ => self.max_items,
        }
    }
}

#[async_trait::async_trait]
impl Capability for NewsCapability {
    fn name(&self) -> &'static str {
        match self.kind {
            NewsKind::Feed => "get_news_data",
            NewsKind::Recent => "get_recent_news",
            NewsKind::Count => "get_news_count",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            NewsKind::Feed => {
                "Get news related to a crypto asset. Use for news, market sentiment and event impact questions."
            }
            NewsKind::Recent => "Get the most recent news for a crypto asset (20 items by default).",
            NewsKind::Count => "Count news items related to a crypto asset, as a measure of attention.",
        }
    }

    fn input_shape(&self) -> InputShape {
        let default = match self.kind {
            NewsKind::Recent => Some(RECENT_NEWS_DEFAULT),
            _ => None,
        };
        InputShape::new(vec![symbol_param(), limit_param(default)])
    }

    async fn execute(&self, args: &Arguments) -> Result<String> {
        let symbol = validate_symbol(args.str("symbol")?)?;
        let limit = validate_limit(args.opt_i64("limit"), self.max_limit())?;

        let source = self.source.as_ref().ok_or_else(|| {
            AnalystError::Capability("NEWS_DATABASE_URL is not configured".to_string())
        })?;
        let news = source.recent_news(&symbol, limit).await?;
        let count = news.len();

        let output = match self.kind {
            NewsKind::Feed => format!(
                "{symbol}相关新闻（共{count}条）：\n\n{}\n\n已获取{symbol}相关的{count}条新闻数据。",
                format_news(&news)
            ),
            NewsKind::Recent => format!(
                "{symbol}近期新闻（最近{limit}条，实际{count}条）：\n\n{}\n\n已获取{symbol}的{count}条近期新闻。",
                format_news(&news)
            ),
            NewsKind::Count => format!(
                "{symbol}相关的新闻数量统计：\n\n时间段：最近{limit}条记录\n新闻数量：{count}条\n\n{symbol}相关的新闻数量为{count}条。"
            ),
        };

        Ok(output)
    }
}

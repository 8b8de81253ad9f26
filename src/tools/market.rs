use super::symbol_param;
use crate::catalog::{Arguments, Capability, InputShape};
use crate::data::MarketDataSource;
use crate::formatters::{format_header, format_kline};
use crate::validators::validate_symbol;
use crate::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    /// Header plus candles.
    Overview,
    Kline,
    Header,
}

impl MarketKind {
    pub const ALL: [MarketKind; 3] = [MarketKind::Overview, MarketKind::Kline, MarketKind::Header];
}

pub struct MarketCapability {
    kind: MarketKind,
    source: Arc<dyn MarketDataSource>,
    days: usize,
}

impl MarketCapability {
    pub fn new(kind: MarketKind, source: Arc<dyn MarketDataSource>, days: usize) -> Self {
        Self { kind, source, days }
    }
}

#[async_trait::async_trait]
impl Capability for MarketCapability {
    fn name(&self) -> &'static str {
        match self.kind {
            MarketKind::Overview => "get_market_data",
            MarketKind::Kline => "get_kline_data",
            MarketKind::Header => "get_header_data",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            MarketKind::Overview => {
                "Get market data for a crypto asset: daily candles plus basic info. Use for price, history or overview questions."
            }
            MarketKind::Kline => {
                "Get daily candle (kline) price history for a crypto asset. Use for price trend and technical questions."
            }
            MarketKind::Header => {
                "Get basic info for a crypto asset: price, market cap, rank, supply, all-time high/low."
            }
        }
    }

    fn input_shape(&self) -> InputShape {
        InputShape::new(vec![symbol_param()])
    }

    async fn execute(&self, args: &Arguments) -> Result<String> {
        let symbol = validate_symbol(args.str("symbol")?)?;
        let days = self.days;

        let output = match self.kind {
            MarketKind::Overview => {
                let (kline, header) =
                    futures::try_join!(self.source.kline(&symbol), self.source.header(&symbol))?;
                format!(
                    "{}\n\nK线数据（最近{days}天）：\n{}\n\n已获取{symbol}的市场数据，包括{days}天K线数据和基本信息。",
                    format_header(&header),
                    format_kline(&kline, days),
                )
            }
            MarketKind::Kline => {
                let kline = self.source.kline(&symbol).await?;
                format!(
                    "K线数据（最近{days}天）：\n{}\n\n已获取{symbol}的K线数据，包含最近{days}天的价格信息。",
                    format_kline(&kline, days),
                )
            }
            MarketKind::Header => {
                let header = self.source.header(&symbol).await?;
                format!(
                    "{}\n\n已获取{symbol}的基本信息，包括价格、市值、排名等关键指标。",
                    format_header(&header),
                )
            }
        };

        Ok(output)
    }
}

use super::symbol_param;
use crate::catalog::{Arguments, Capability, InputShape};
use crate::data::MarketDataSource;
use crate::formatters::{format_derivatives, format_exchange_series, format_flat};
use crate::validators::validate_symbol;
use crate::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativesKind {
    All,
    BuySellRatio,
    OpenInterest,
    TradingVolume,
    FundingRate,
}

impl DerivativesKind {
    pub const ALL: [DerivativesKind; 5] = [
        DerivativesKind::All,
        DerivativesKind::BuySellRatio,
        DerivativesKind::OpenInterest,
        DerivativesKind::TradingVolume,
        DerivativesKind::FundingRate,
    ];
}

pub struct DerivativesCapability {
    kind: DerivativesKind,
    source: Arc<dyn MarketDataSource>,
}

impl DerivativesCapability {
    pub fn new(kind: DerivativesKind, source: Arc<dyn MarketDataSource>) -> Self {
        Self { kind, source }
    }
}

#[async_trait::async_trait]
impl Capability for DerivativesCapability {
    fn name(&self) -> &'static str {
        match self.kind {
            DerivativesKind::All => "get_derivatives_data",
            DerivativesKind::BuySellRatio => "get_buy_sell_ratio",
            DerivativesKind::OpenInterest => "get_open_interest",
            DerivativesKind::TradingVolume => "get_trading_volume",
            DerivativesKind::FundingRate => "get_funding_rate",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            DerivativesKind::All => {
                "Get derivatives market data for a crypto asset: buy/sell ratio, open interest, trading volume and funding rate."
            }
            DerivativesKind::BuySellRatio => {
                "Get taker buy/sell ratio across exchanges, reflecting the balance of long and short pressure."
            }
            DerivativesKind::OpenInterest => {
                "Get open interest across exchanges, reflecting participation and long-short positioning."
            }
            DerivativesKind::TradingVolume => {
                "Get trading volume across major exchanges, reflecting activity and liquidity."
            }
            DerivativesKind::FundingRate => {
                "Get perpetual swap funding rates, reflecting the long-short balance of the contract market."
            }
        }
    }

    fn input_shape(&self) -> InputShape {
        InputShape::new(vec![symbol_param()])
    }

    async fn execute(&self, args: &Arguments) -> Result<String> {
        let symbol = validate_symbol(args.str("symbol")?)?;

        let output = match self.kind {
            DerivativesKind::All => {
                let snapshot = self.source.derivatives(&symbol).await?;
                format!(
                    "{symbol}衍生品市场数据：\n\n{}\n\n已获取{symbol}的衍生品市场数据，包括买卖比例、持仓量、交易量和资金费率。",
                    format_derivatives(&snapshot)
                )
            }
            DerivativesKind::BuySellRatio => {
                let series = self.source.buy_sell_ratio(&symbol).await?;
                format!(
                    "{}\n已获取{symbol}的买卖比例数据，包含多个交易所的数据。",
                    format_exchange_series(&format!("{symbol}买卖比例数据"), &series)
                )
            }
            DerivativesKind::OpenInterest => {
                let series = self.source.open_interest(&symbol).await?;
                format!(
                    "{}\n已获取{symbol}的持仓量数据，包含多个交易所的数据。",
                    format_exchange_series(&format!("{symbol}持仓量数据"), &series)
                )
            }
            DerivativesKind::TradingVolume => {
                let series = self.source.trading_volume(&symbol).await?;
                format!(
                    "{}\n已获取{symbol}的交易量数据，包含多个交易所的数据。",
                    format_exchange_series(&format!("{symbol}交易量数据"), &series)
                )
            }
            DerivativesKind::FundingRate => {
                let rates = self.source.funding_rate().await?;
                format!(
                    "{symbol}资金费率数据：\n{}\n已获取{symbol}的资金费率数据，反映永续合约市场的多空平衡。",
                    format_flat(&rates, "")
                )
            }
        };

        Ok(output)
    }
}

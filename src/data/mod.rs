//! Upstream data collaborators
//!
//! Market and derivatives data come from a JSON HTTP service; news comes
//! from a MySQL table (see [`news`]). Capabilities only see the traits.

use crate::config::Settings;
use crate::error::AnalystError;
use crate::Result;
use futures::future::try_join_all;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub mod news;
pub use news::{MySqlNewsSource, NewsItem, NewsSource};

pub const BUY_SELL_RATIO_EXCHANGES: &[&str] = &["Binance", "Kraken"];
pub const OPEN_INTEREST_EXCHANGES: &[&str] = &["binance", "bitget"];
pub const TRADING_VOLUME_EXCHANGES: &[&str] = &[
    "Binance", "Bybit", "Bitget", "Okx", "Coinbase", "Bitfinex", "Gate", "Kucoin", "Bitmart", "mexc",
];

/// Per-exchange payloads, in exchange order.
pub type ExchangeSeries = Vec<(String, Value)>;

/// Everything the derivatives capabilities can combine.
#[derive(Debug, Clone, Default)]
pub struct DerivativesSnapshot {
    pub buy_sell_ratio: ExchangeSeries,
    pub open_interest: ExchangeSeries,
    pub trading_volume: ExchangeSeries,
    pub funding_rate: Value,
}

#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Daily candles: `{"categoryData": [dates], "values": [[o, c, l, h]]}`.
    async fn kline(&self, symbol: &str) -> Result<Value>;
    async fn header(&self, symbol: &str) -> Result<Value>;
    async fn buy_sell_ratio(&self, symbol: &str) -> Result<ExchangeSeries>;
    async fn open_interest(&self, symbol: &str) -> Result<ExchangeSeries>;
    async fn trading_volume(&self, symbol: &str) -> Result<ExchangeSeries>;
    /// Market-wide; not filtered by symbol upstream.
    async fn funding_rate(&self) -> Result<Value>;

    async fn derivatives(&self, symbol: &str) -> Result<DerivativesSnapshot> {
        let (buy_sell_ratio, open_interest, trading_volume, funding_rate) = futures::try_join!(
            self.buy_sell_ratio(symbol),
            self.open_interest(symbol),
            self.trading_volume(symbol),
            self.funding_rate(),
        )?;

        Ok(DerivativesSnapshot {
            buy_sell_ratio,
            open_interest,
            trading_volume,
            funding_rate,
        })
    }
}

/// HTTP client for the kline/header and derivatives services.
#[derive(Clone)]
pub struct HttpMarketData {
    client: Client,
    kline_base: String,
    derivatives_base: String,
}

impl HttpMarketData {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(settings.data_timeout)
            .build()?;

        Ok(Self {
            client,
            kline_base: settings.kline_api_base.trim_end_matches('/').to_string(),
            derivatives_base: settings.derivatives_api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url = %url, "Fetching upstream data");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AnalystError::DataFetch(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalystError::DataFetch(format!(
                "{} returned {}",
                url, status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AnalystError::DataFetch(format!("invalid JSON from {}: {}", url, e)))
    }

    async fn per_exchange<F>(&self, exchanges: &[&str], url_for: F) -> Result<ExchangeSeries>
    where
        F: Fn(&str) -> String,
    {
        let fetches = exchanges.iter().map(|ex| {
            let url = url_for(ex);
            async move { Ok::<_, AnalystError>((ex.to_string(), self.get_json(&url).await?)) }
        });
        try_join_all(fetches).await
    }
}

/// Unwrap the `{code, data, errorMsg}` envelope used by the detail endpoints.
pub fn unwrap_envelope(body: Value, what: &str) -> Result<Value> {
    match body.get("code").and_then(Value::as_i64) {
        Some(0) => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        _ => {
            let msg = body
                .get("errorMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(AnalystError::DataFetch(format!("{} request rejected: {}", what, msg)))
        }
    }
}

#[async_trait::async_trait]
impl MarketDataSource for HttpMarketData {
    async fn kline(&self, symbol: &str) -> Result<Value> {
        let url = format!("{}/detail/kline?symbol={}&type=2", self.kline_base, symbol);
        unwrap_envelope(self.get_json(&url).await?, "kline")
    }

    async fn header(&self, symbol: &str) -> Result<Value> {
        let url = format!("{}/detail/header?symbol={}", self.kline_base, symbol);
        unwrap_envelope(self.get_json(&url).await?, "header")
    }

    async fn buy_sell_ratio(&self, symbol: &str) -> Result<ExchangeSeries> {
        // upstream spells the type "but_sell_ratio"
        self.per_exchange(BUY_SELL_RATIO_EXCHANGES, |ex| {
            format!(
                "{}/histratio?coin={}&exchange={}&type=but_sell_ratio",
                self.derivatives_base, symbol, ex
            )
        })
        .await
    }

    async fn open_interest(&self, symbol: &str) -> Result<ExchangeSeries> {
        self.per_exchange(OPEN_INTEREST_EXCHANGES, |ex| {
            format!("{}/histUsd?coin={}&exchange={}", self.derivatives_base, symbol, ex)
        })
        .await
    }

    async fn trading_volume(&self, symbol: &str) -> Result<ExchangeSeries> {
        self.per_exchange(TRADING_VOLUME_EXCHANGES, |ex| {
            format!(
                "{}/historytradingval?coin={}&exchange={}",
                self.derivatives_base, symbol, ex
            )
        })
        .await
    }

    async fn funding_rate(&self) -> Result<Value> {
        let url = format!("{}/foundrate", self.derivatives_base);
        self.get_json(&url).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned upstream data for capability tests.

    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    pub struct StaticMarketData {
        pub fail: bool,
    }

    impl StaticMarketData {
        fn guard(&self) -> Result<()> {
            if self.fail {
                Err(AnalystError::DataFetch("upstream unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn series(exchanges: &[&str]) -> ExchangeSeries {
        exchanges
            .iter()
            .map(|ex| (ex.to_string(), json!({"ratio": 1.2})))
            .collect()
    }

    #[async_trait::async_trait]
    impl MarketDataSource for StaticMarketData {
        async fn kline(&self, _symbol: &str) -> Result<Value> {
            self.guard()?;
            Ok(json!({
                "categoryData": ["2024-01-01", "2024-01-02"],
                "values": [[1.0, 2.0, 0.5, 2.5], [2.0, 3.0, 1.5, 3.5]],
            }))
        }

        async fn header(&self, symbol: &str) -> Result<Value> {
            self.guard()?;
            Ok(json!({"symbol": symbol, "currentPrice": 42000, "marketCapRank": 1}))
        }

        async fn buy_sell_ratio(&self, _symbol: &str) -> Result<ExchangeSeries> {
            self.guard()?;
            Ok(series(BUY_SELL_RATIO_EXCHANGES))
        }

        async fn open_interest(&self, _symbol: &str) -> Result<ExchangeSeries> {
            self.guard()?;
            Ok(series(OPEN_INTEREST_EXCHANGES))
        }

        async fn trading_volume(&self, _symbol: &str) -> Result<ExchangeSeries> {
            self.guard()?;
            Ok(series(TRADING_VOLUME_EXCHANGES))
        }

        async fn funding_rate(&self) -> Result<Value> {
            self.guard()?;
            Ok(json!({"BTC": 0.0001}))
        }
    }

    #[derive(Default)]
    pub struct StaticNews {
        pub items: Vec<NewsItem>,
        pub requested: Mutex<Vec<(String, u32)>>,
    }

    impl StaticNews {
        pub fn with_items(count: usize) -> Self {
            Self {
                items: (0..count)
                    .map(|i| NewsItem {
                        title: format!("headline {}", i),
                        create_time: format!("2024-01-{:02} 08:00:00", i % 28 + 1),
                        topic: "market".to_string(),
                    })
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl NewsSource for StaticNews {
        async fn recent_news(&self, symbol: &str, limit: u32) -> Result<Vec<NewsItem>> {
            self.requested.lock().unwrap().push((symbol.to_string(), limit));
            Ok(self.items.iter().take(limit as usize).cloned().collect())
        }
    }
}

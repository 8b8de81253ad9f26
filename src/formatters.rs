//! Text rendering of upstream payloads for model consumption

use crate::data::{DerivativesSnapshot, ExchangeSeries, NewsItem};
use serde_json::Value;

pub const MAX_NEWS_LINES: usize = 20;

const HEADER_FIELDS: &[(&str, &str)] = &[
    ("symbol", "币种"),
    ("currentPrice", "当前价格"),
    ("marketCap", "市值"),
    ("marketCapRank", "市值排名"),
    ("fullyDilutedValuation", "完全稀释的市值"),
    ("totalVolume", "总交易额（usd）"),
    ("high_24h", "24小时最高价"),
    ("low_24h", "24小时最低价"),
    ("priceChange_24h", "24小时价格变化"),
    ("priceChangePercentage_24h", "24小时价格变化百分比"),
    ("marketCapChange_24h", "24小时市值变化"),
    ("marketCapChangePercentage_24h", "24小时市值变化百分比"),
    ("circulatingSupply", "流通供应量"),
    ("totalSupply", "总供应量"),
    ("ath", "历史最高价"),
    ("athChangePercentage", "历史最高价变化百分比"),
    ("athDate", "历史最高价日期"),
    ("atl", "历史最低价"),
    ("atlChangePercentage", "历史最低价变化百分比"),
    ("atlDate", "历史最低价日期"),
];

fn tail(values: &[Value], n: usize) -> &[Value] {
    &values[values.len().saturating_sub(n)..]
}

/// Last `days` dates and `[open, close, low, high]` rows.
pub fn format_kline(kline: &Value, days: usize) -> String {
    let values = kline.get("values").and_then(Value::as_array);
    let dates = kline.get("categoryData").and_then(Value::as_array);

    match (values, dates) {
        (Some(values), Some(dates)) if !values.is_empty() && !dates.is_empty() => {
            format!(
                "日期数组: {}\nK线数据数组: {}",
                Value::from(tail(dates, days).to_vec()),
                Value::from(tail(values, days).to_vec()),
            )
        }
        _ => "无有效的K线数据".to_string(),
    }
}

pub fn format_header(header: &Value) -> String {
    HEADER_FIELDS
        .iter()
        .map(|(key, label)| {
            let value = match header.get(*key) {
                None | Some(Value::Null) => "N/A".to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            format!("{}: {}", label, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_news(news: &[NewsItem]) -> String {
    if news.is_empty() {
        return "暂无相关新闻".to_string();
    }
    news.iter()
        .take(MAX_NEWS_LINES)
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One block per exchange; object payloads are expanded one key per line.
pub fn format_exchange_series(title: &str, series: &ExchangeSeries) -> String {
    let mut out = format!("{}：\n", title);
    for (exchange, data) in series {
        out.push_str(&format!("\n{}:\n", exchange));
        out.push_str(&format_flat(data, "  "));
    }
    out
}

pub fn format_flat(data: &Value, indent: &str) -> String {
    match data {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}{}: {}\n", indent, k, v))
            .collect(),
        other => format!("{}{}\n", indent, other),
    }
}

pub fn format_derivatives(snapshot: &DerivativesSnapshot) -> String {
    let mut sections = Vec::new();

    let mut section = |title: &str, series: &ExchangeSeries| {
        let lines: Vec<String> = series
            .iter()
            .filter(|(_, data)| data.as_object().map_or(false, |m| !m.is_empty()))
            .map(|(exchange, data)| format!("  {}: {}", exchange, data))
            .collect();
        if !lines.is_empty() {
            sections.push(format!("{}:\n{}", title, lines.join("\n")));
        }
    };

    section("买卖比例", &snapshot.buy_sell_ratio);
    section("持仓量", &snapshot.open_interest);
    section("交易量", &snapshot.trading_volume);

    if !snapshot.funding_rate.is_null() {
        sections.push(format!("资金费率:\n{}", snapshot.funding_rate));
    }

    sections.join("\n\n")
}

//! News feed backed by the processed-news MySQL table

use crate::error::AnalystError;
use crate::Result;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub create_time: String,
    pub topic: String,
}

impl fmt::Display for NewsItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}｜{}｜{}", self.create_time, self.title, self.topic)
    }
}

#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    /// Newest first, at most `limit` items.
    async fn recent_news(&self, symbol: &str, limit: u32) -> Result<Vec<NewsItem>>;
}

pub struct MySqlNewsSource {
    pool: MySqlPool,
}

impl MySqlNewsSource {
    /// The pool connects on first query, so an unreachable database surfaces
    /// as a capability error rather than a startup failure.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)?;
        info!("News source: mysql");
        Ok(Self { pool })
    }

    /// `None` when no URL is configured or the URL is unusable.
    pub fn from_url(url: Option<&str>) -> Option<Self> {
        let url = url?;
        match Self::connect_lazy(url) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Failed to initialize news source, news capabilities disabled: {}", e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl NewsSource for MySqlNewsSource {
    async fn recent_news(&self, symbol: &str, limit: u32) -> Result<Vec<NewsItem>> {
        let rows = sqlx::query(
            r#"
            SELECT title, topic, CAST(create_time AS CHAR) AS ct
            FROM ods_news_feed_processed_di
            WHERE coins RLIKE ?
            ORDER BY create_time DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalystError::Database(format!("failed to load news for {}: {}", symbol, e)))?;

        Ok(rows
            .into_iter()
            .map(|row| NewsItem {
                title: row.try_get::<Option<String>, _>("title").ok().flatten().unwrap_or_default(),
                create_time: row.try_get::<Option<String>, _>("ct").ok().flatten().unwrap_or_default(),
                topic: row.try_get::<Option<String>, _>("topic").ok().flatten().unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_news_item_display() {
        let item = NewsItem {
            title: "ETF inflows".into(),
            create_time: "2024-03-01 10:00:00".into(),
            topic: "macro".into(),
        };
        assert_eq!(item.to_string(), "2024-03-01 10:00:00｜ETF inflows｜macro");
    }

    #[test]
    fn test_missing_url_disables_source() {
        assert!(MySqlNewsSource::from_url(None).is_none());
    }
}

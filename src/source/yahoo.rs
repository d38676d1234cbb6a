use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;
use crate::source::PriceSource;

const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

pub struct YahooSource {
    client: reqwest::Client,
}

impl YahooSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for YahooSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceSource for YahooSource {
    fn fetch_price(&self, ticker: &str) -> BoxFuture<'_, Result<f64, Report<FetchError>>> {
        let ticker = ticker.to_owned();
        Box::pin(async move {
            let url = format!("{YAHOO_BASE_URL}/v8/finance/chart/{ticker}");
            let params = [("interval", "1d"), ("range", "1d")];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(FetchError::Request {
                    ticker: ticker.clone(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(FetchError::Request { ticker })
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let raw: ChartResponse =
                response
                    .json()
                    .await
                    .change_context(FetchError::ResponseParse {
                        ticker: ticker.clone(),
                    })?;

            let price = raw
                .last_price()
                .ok_or_else(|| {
                    Report::new(FetchError::MissingPrice {
                        ticker: ticker.clone(),
                    })
                })?;

            if !(price.is_finite() && price > 0.0) {
                return Err(
                    Report::new(FetchError::MissingPrice { ticker }).attach(format!(
                        "unusable price in response: {price}"
                    )),
                );
            }

            debug!(ticker = %ticker, price, "quote fetch complete");

            Ok(price)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

impl ChartResponse {
    fn last_price(&self) -> Option<f64> {
        self.chart
            .result
            .as_ref()?
            .first()?
            .meta
            .regular_market_price
    }
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

pub mod yahoo;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::FetchError;

/// Quote provider for a ticker symbol.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn PriceSource`). Any failure (network,
/// unknown ticker, rate limit) is a `FetchError` and means the price is
/// simply unavailable this cycle.
pub trait PriceSource: Send + Sync {
    fn fetch_price(&self, ticker: &str) -> BoxFuture<'_, Result<f64, Report<FetchError>>>;
}

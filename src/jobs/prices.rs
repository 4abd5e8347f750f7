use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::{BatchReport, JobContext, Tally};
use crate::coin::Coin;
use crate::coingecko::Quote;
use crate::retry::{RetryOutcome, retry_rate_limited};
use crate::store::{Filter, select_coins};

/// One row of the price table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinQuote {
    pub coin: String,
    pub coingecko_id: String,
    #[serde(flatten)]
    pub quote: Quote,
}

type Quotes = Arc<Mutex<Vec<CoinQuote>>>;

/// Price, 24h and 7d change for every coin with a CoinGecko id.
///
/// Quotes come back in row order; coins whose chart could not be fetched or
/// is too short are left out.
#[tracing::instrument(skip_all, fields(job = "prices"))]
pub async fn price_table(ctx: &JobContext) -> Result<(BatchReport, Vec<CoinQuote>)> {
    let started_at = Utc::now();
    let coins = select_coins(ctx.store.as_ref(), "id,coin_name,coingecko_id", &[Filter::not_null("coingecko_id")]).await?;
    info!(count = coins.len(), "fetching market charts");

    let tally = Arc::new(Tally::default());
    let quotes: Quotes = Arc::default();
    let mut enqueued = 0;
    for coin in coins {
        ctx.queue.enqueue(quote_item(ctx.clone(), coin, Arc::clone(&quotes), Arc::clone(&tally)));
        enqueued += 1;
    }
    ctx.queue.wait_idle().await;

    let quotes = std::mem::take(&mut *quotes.lock().unwrap_or_else(PoisonError::into_inner));
    Ok((BatchReport::new("prices", enqueued, &tally, started_at), quotes))
}

async fn quote_item(ctx: JobContext, coin: Coin, quotes: Quotes, tally: Arc<Tally>) {
    let Some(coingecko_id) = coin.coingecko_id.clone() else {
        return;
    };
    let outcome = retry_rate_limited(&coingecko_id, &ctx.retry, || {
        ctx.coingecko.market_chart(&coingecko_id, ctx.chart_days)
    })
    .await;
    let RetryOutcome::Success { value: chart, .. } = outcome else {
        return;
    };
    let Some(quote) = chart.quote() else {
        warn!(coin = %coingecko_id, points = chart.prices.len(), "not enough price history");
        return;
    };

    quotes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(CoinQuote {
            coin: coin.label(),
            coingecko_id,
            quote,
        });
    tally.record(true);
}

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use super::{BatchReport, JobContext, Tally, update_coins};
use crate::coin::CoinPatch;
use crate::retry::{RetryOutcome, retry_rate_limited};
use crate::store::{Filter, select_coins};

/// Fill in `logo_url` for published coins that have none yet.
#[tracing::instrument(skip_all, fields(job = "icons"))]
pub async fn refresh_icons(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let coins = select_coins(
        ctx.store.as_ref(),
        "id,coin_name,coingecko_id",
        &[
            Filter::is_null("logo_url"),
            Filter::not_null("coin_base"),
            Filter::not_null("ai_content"),
            Filter::not_null("coingecko_id"),
        ],
    )
    .await?;
    info!(count = coins.len(), "fetched coins without a logo");

    let tally = Arc::new(Tally::default());
    let mut enqueued = 0;
    for coingecko_id in coins.into_iter().filter_map(|c| c.coingecko_id) {
        ctx.queue.enqueue(icon_item(ctx.clone(), coingecko_id, Arc::clone(&tally)));
        enqueued += 1;
    }
    ctx.queue.wait_idle().await;

    Ok(BatchReport::new("icons", enqueued, &tally, started_at))
}

async fn icon_item(ctx: JobContext, coingecko_id: String, tally: Arc<Tally>) {
    let outcome = retry_rate_limited(&coingecko_id, &ctx.retry, || ctx.coingecko.market_image(&coingecko_id)).await;
    let url = match outcome {
        RetryOutcome::Success { value: Some(url), .. } => url,
        RetryOutcome::Success { value: None, .. } => {
            warn!(coin = %coingecko_id, "no market data image");
            return;
        }
        _ => return,
    };

    let ok = update_coins(
        ctx.store.as_ref(),
        &ctx.retry,
        &coingecko_id,
        &CoinPatch::logo_url(url),
        &[Filter::eq("coingecko_id", &coingecko_id)],
    )
    .await;
    tally.record(ok);
}

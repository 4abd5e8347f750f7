use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::{BatchReport, JobContext, Tally, fetch_in_queue, update_coins};
use crate::coin::CoinPatch;
use crate::coingecko::{MARKETS_PAGE, MarketEntry};
use crate::retry::retry_rate_limited;
use crate::store::{Filter, select_coins};

/// Backfill `market_cap_rank` from batched `/coins/markets` lookups.
///
/// Rows without a logo also get the market image. Each batch of ids is one
/// queue item; each row update is another.
#[tracing::instrument(skip_all, fields(job = "ranks"))]
pub async fn backfill_ranks(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let tally = Arc::new(Tally::default());
    let coins = select_coins(
        ctx.store.as_ref(),
        "id,coin_name,coingecko_id,logo_url",
        &[Filter::is_null("market_cap_rank"), Filter::not_null("coingecko_id")],
    )
    .await?;
    info!(count = coins.len(), "fetched coins without a market cap rank");

    let mut seen = HashSet::new();
    let ids: Vec<String> = coins
        .iter()
        .filter_map(|c| c.coingecko_id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect();
    if ids.is_empty() {
        return Ok(BatchReport::new("ranks", 0, &tally, started_at));
    }

    let mut entries: HashMap<String, MarketEntry> = HashMap::new();
    let mut failed_batches = 0;
    let batches = ids.chunks(MARKETS_PAGE).count();
    for chunk in ids.chunks(MARKETS_PAGE) {
        let chunk = chunk.to_vec();
        let label = format!("markets[{}]", chunk.len());
        let batch_ctx = ctx.clone();
        let found = fetch_in_queue(&ctx.queue, async move {
            retry_rate_limited(&label, &batch_ctx.retry, || batch_ctx.coingecko.markets(&chunk))
                .await
                .into_value()
        })
        .await;
        match found {
            Some(found) => entries.extend(found.into_iter().map(|e| (e.id.clone(), e))),
            None => failed_batches += 1,
        }
    }
    if failed_batches == batches {
        bail!("could not fetch CoinGecko market data");
    }

    let mut enqueued = 0;
    for coin in coins {
        let Some(coingecko_id) = coin.coingecko_id.clone() else {
            continue;
        };
        let Some(rank) = entries.get(&coingecko_id).and_then(|e| e.market_cap_rank) else {
            warn!(coin = %coingecko_id, "no market cap rank");
            continue;
        };
        let logo = match coin.logo_url {
            Some(_) => None,
            None => entries.get(&coingecko_id).and_then(|e| e.image.clone()),
        };
        let patch = CoinPatch::ranking(rank, logo);
        let ctx_item = ctx.clone();
        let tally = Arc::clone(&tally);
        ctx.queue.enqueue(async move {
            let ok = update_coins(
                ctx_item.store.as_ref(),
                &ctx_item.retry,
                &coingecko_id,
                &patch,
                &[Filter::eq("coingecko_id", &coingecko_id)],
            )
            .await;
            tally.record(ok);
        });
        enqueued += 1;
    }
    ctx.queue.wait_idle().await;

    Ok(BatchReport::new("ranks", enqueued, &tally, started_at))
}

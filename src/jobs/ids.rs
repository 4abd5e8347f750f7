use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use super::{BatchReport, JobContext, Tally, update_coins};
use crate::coin::{COINS_TABLE, Coin, CoinPatch};
use crate::retry::{RetryOutcome, retry_rate_limited};
use crate::store::{Filter, select_coins};

/// Coins sharing a CoinGecko id with at least one other row, keyed by that id.
pub fn duplicate_groups(coins: &[Coin]) -> BTreeMap<String, Vec<Coin>> {
    let mut groups: BTreeMap<String, Vec<Coin>> = BTreeMap::new();
    for coin in coins {
        if let Some(id) = &coin.coingecko_id {
            groups.entry(id.clone()).or_default().push(coin.clone());
        }
    }
    groups.retain(|_, members| members.len() > 1);
    groups
}

/// Re-resolve duplicated CoinGecko ids by searching each coin's name.
#[tracing::instrument(skip_all, fields(job = "ids"))]
pub async fn resolve_duplicate_ids(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let coins = select_coins(ctx.store.as_ref(), "id,coin_name,coingecko_id", &[Filter::not_null("coingecko_id")]).await?;
    let groups = duplicate_groups(&coins);
    info!(groups = groups.len(), "found duplicated CoinGecko ids");

    let tally = Arc::new(Tally::default());
    let mut enqueued = 0;
    for (shared_id, members) in groups {
        for coin in members {
            warn!(coingecko_id = %shared_id, coin = %coin.label(), "duplicate CoinGecko id, re-fetching");
            ctx.queue.enqueue(research_item(ctx.clone(), coin, Arc::clone(&tally)));
            enqueued += 1;
        }
    }
    ctx.queue.wait_idle().await;

    Ok(BatchReport::new("ids", enqueued, &tally, started_at))
}

async fn research_item(ctx: JobContext, coin: Coin, tally: Arc<Tally>) {
    let Some(name) = coin.coin_name.clone() else {
        warn!(coin = %coin.label(), "no name to search for");
        return;
    };

    let found = match retry_rate_limited(&name, &ctx.retry, || ctx.coingecko.search(&name)).await {
        RetryOutcome::Success { value: Some(id), .. } => id,
        RetryOutcome::Success { value: None, .. } => {
            warn!(coin = %name, "CoinGecko id not found");
            return;
        }
        _ => return,
    };

    let taken_filter = [Filter::eq("coingecko_id", &found)];
    let taken = retry_rate_limited(&found, &ctx.retry, || {
        ctx.store.select(COINS_TABLE, "id", &taken_filter)
    })
    .await;
    match taken {
        RetryOutcome::Success { value: rows, .. } if rows.is_empty() => {}
        RetryOutcome::Success { .. } => {
            warn!(coingecko_id = %found, coin = %name, "CoinGecko id already in use, skipping");
            return;
        }
        _ => return,
    }

    let ok = update_coins(
        ctx.store.as_ref(),
        &ctx.retry,
        &name,
        &CoinPatch::coingecko_id(&found),
        &[Filter::eq("id", coin.id)],
    )
    .await;
    tally.record(ok);
}

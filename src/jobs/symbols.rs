use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::{BatchReport, JobContext, Tally, fetch_in_queue, update_coins};
use crate::coin::{Coin, CoinPatch};
use crate::coingecko::ListedCoin;
use crate::retry::retry_rate_limited;
use crate::store::{Filter, select_coins};

/// Rows whose CoinGecko id is shared, grouped by their exchange symbol.
pub fn duplicates_by_base(coins: &[Coin]) -> BTreeMap<String, Vec<Coin>> {
    let mut id_counts: HashMap<&str, usize> = HashMap::new();
    for id in coins.iter().filter_map(|c| c.coingecko_id.as_deref()) {
        *id_counts.entry(id).or_insert(0) += 1;
    }

    let mut groups: BTreeMap<String, Vec<Coin>> = BTreeMap::new();
    for coin in coins {
        let shared = coin
            .coingecko_id
            .as_deref()
            .is_some_and(|id| id_counts.get(id).copied().unwrap_or(0) > 1);
        if let (true, Some(base)) = (shared, &coin.coin_base) {
            groups.entry(base.clone()).or_default().push(coin.clone());
        }
    }
    groups
}

/// Upper-cased symbol to listed coin. Later entries win.
pub fn symbol_index(list: Vec<ListedCoin>) -> HashMap<String, ListedCoin> {
    list.into_iter()
        .map(|coin| (coin.symbol.to_uppercase(), coin))
        .collect()
}

/// The listed coin for `base`, only if its name mentions the symbol.
pub fn match_symbol<'a>(index: &'a HashMap<String, ListedCoin>, base: &str) -> Option<&'a ListedCoin> {
    index
        .get(&base.to_uppercase())
        .filter(|listed| listed.name.to_lowercase().contains(&base.to_lowercase()))
}

/// Resolve duplicated CoinGecko ids through the full coin list, by symbol.
#[tracing::instrument(skip_all, fields(job = "symbols"))]
pub async fn match_by_symbol(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let tally = Arc::new(Tally::default());

    let coins = select_coins(ctx.store.as_ref(), "id,coin_name,coin_base,coingecko_id", &[]).await?;
    let groups = duplicates_by_base(&coins);
    if groups.is_empty() {
        info!("no duplicated CoinGecko ids");
        return Ok(BatchReport::new("symbols", 0, &tally, started_at));
    }

    let list_ctx = ctx.clone();
    let list = fetch_in_queue(&ctx.queue, async move {
        retry_rate_limited("coins/list", &list_ctx.retry, || list_ctx.coingecko.coins_list())
            .await
            .into_value()
    })
    .await;
    let Some(list) = list else {
        bail!("could not fetch the CoinGecko coin list");
    };
    let index = symbol_index(list);

    let mut enqueued = 0;
    for (base, members) in groups {
        let Some(listed) = match_symbol(&index, &base) else {
            warn!(symbol = %base, "no accurate CoinGecko id for symbol");
            continue;
        };
        for coin in members {
            let ctx_item = ctx.clone();
            let tally = Arc::clone(&tally);
            let coingecko_id = listed.id.clone();
            ctx.queue.enqueue(async move {
                let label = coin.label();
                let ok = update_coins(
                    ctx_item.store.as_ref(),
                    &ctx_item.retry,
                    &label,
                    &CoinPatch::coingecko_id(coingecko_id),
                    &[Filter::eq("id", coin.id)],
                )
                .await;
                tally.record(ok);
            });
            enqueued += 1;
        }
    }
    ctx.queue.wait_idle().await;

    Ok(BatchReport::new("symbols", enqueued, &tally, started_at))
}

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{BatchReport, JobContext, Tally, fetch_in_queue};
use crate::coin::{COINS_TABLE, NewCoin};
use crate::coinbase::{AssetPrice, dedup_by_base};
use crate::retry::retry_rate_limited;

/// USD-priced Coinbase assets, up to the import limit, deduplicated by base.
///
/// Each listing page is its own queue item with throttling retries. A page
/// that still fails ends the walk and keeps what was collected; failing on
/// the first page is an error.
pub async fn list_assets(ctx: &JobContext) -> Result<Vec<AssetPrice>> {
    let mut collected: Vec<AssetPrice> = Vec::new();
    let mut next = Some(ctx.coinbase.first_prices_url());

    while let Some(url) = next.take() {
        if collected.len() >= ctx.import_limit {
            break;
        }
        let page_ctx = ctx.clone();
        let page_url = url.clone();
        let page = fetch_in_queue(&ctx.queue, async move {
            retry_rate_limited(&page_url, &page_ctx.retry, || page_ctx.coinbase.prices_page(&page_url))
                .await
                .into_value()
        })
        .await;
        let Some(page) = page else {
            if collected.is_empty() {
                bail!("could not fetch the Coinbase asset listing");
            }
            warn!(%url, kept = collected.len(), "Coinbase page unavailable, stopping");
            break;
        };
        if page.data.is_empty() {
            warn!(%url, "no coins in Coinbase page");
            break;
        }
        debug!(count = page.data.len(), "fetched Coinbase page");
        next = page.next_uri().map(|uri| ctx.coinbase.resolve(uri));
        collected.extend(page.data);
        if next.is_some() {
            sleep(ctx.page_delay).await;
        }
    }

    let mut assets = dedup_by_base(collected);
    assets.truncate(ctx.import_limit);
    Ok(assets)
}

/// Upsert every asset Coinbase prices in USD into the coins table.
#[tracing::instrument(skip_all, fields(job = "import"))]
pub async fn import_coinbase(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let assets = list_assets(ctx).await?;
    info!(count = assets.len(), "fetched coins from Coinbase");

    let tally = Arc::new(Tally::default());
    let mut enqueued = 0;
    for asset in assets {
        let row = serde_json::to_value(NewCoin::from_base(&asset.base))?;
        let ctx_item = ctx.clone();
        let tally = Arc::clone(&tally);
        ctx.queue.enqueue(async move {
            let outcome = retry_rate_limited(&asset.base, &ctx_item.retry, || {
                ctx_item.store.upsert(COINS_TABLE, &row, "coin_name")
            })
            .await;
            if outcome.is_success() {
                info!(coin = %asset.base, "upserted coin");
            }
            tally.record(outcome.is_success());
        });
        enqueued += 1;
    }
    ctx.queue.wait_idle().await;

    Ok(BatchReport::new("import", enqueued, &tally, started_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing;
    use crate::store::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upserts_listed_assets() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"base": "BTC"}, {"base": "DOGE"}],
                "pagination": {"next_uri": null}
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::with_rows(
            "coins",
            vec![json!({"id": 10, "coin_name": "BTC", "coingecko_id": "bitcoin"})],
        ));
        let ctx = testing::context(&server.uri(), Arc::clone(&store));
        let report = import_coinbase(&ctx).await.unwrap();

        assert_eq!(report.enqueued, 2);
        assert_eq!(report.succeeded, 2);
        let rows = store.rows("coins");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["coinbase_product_id"], "BTC-USD");
        assert_eq!(rows[0]["coingecko_id"], "bitcoin");
        assert_eq!(rows[1]["coin_base"], "DOGE");
        assert_eq!(rows[1]["id"], 11);
    }

    #[tokio::test]
    async fn listing_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ctx = testing::context(&server.uri(), Arc::new(MemoryStore::new()));
        assert!(import_coinbase(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn throttled_listing_is_retried() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"base": "BTC"}],
                "pagination": {"next_uri": null}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let ctx = testing::context(&server.uri(), Arc::clone(&store));
        let report = import_coinbase(&ctx).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(store.rows("coins")[0]["coin_name"], "BTC");
    }

    #[tokio::test]
    async fn follows_pages_and_dedups_by_base() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/assets/prices"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"base": "SOL", "amount": "150"}, {"base": "BTC", "amount": "60001"}],
                "pagination": {"next_uri": null}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"base": "BTC", "amount": "60000"}, {"base": "ETH", "amount": "3000"}],
                "pagination": {"next_uri": "/v2/assets/prices?base=USD&page=2"}
            })))
            .mount(&server)
            .await;

        let ctx = testing::context(&server.uri(), Arc::new(MemoryStore::new()));
        let assets = list_assets(&ctx).await.unwrap();
        let bases: Vec<&str> = assets.iter().map(|a| a.base.as_str()).collect();
        assert_eq!(bases, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(assets[0].amount.as_deref(), Some("60001"));
    }

    #[tokio::test]
    async fn failed_later_page_keeps_earlier_pages() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/assets/prices"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"base": "BTC"}, {"base": "ETH"}],
                "pagination": {"next_uri": "/v2/assets/prices?base=USD&page=2"}
            })))
            .mount(&server)
            .await;

        let ctx = testing::context(&server.uri(), Arc::new(MemoryStore::new()));
        let assets = list_assets(&ctx).await.unwrap();
        let bases: Vec<&str> = assets.iter().map(|a| a.base.as_str()).collect();
        assert_eq!(bases, vec!["BTC", "ETH"]);
    }

    #[tokio::test]
    async fn stops_paging_at_limit() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/assets/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"base": "A"}, {"base": "B"}, {"base": "C"}],
                "pagination": {"next_uri": "/v2/assets/prices?base=USD&page=2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut ctx = testing::context(&server.uri(), Arc::new(MemoryStore::new()));
        ctx.import_limit = 2;
        assert_eq!(list_assets(&ctx).await.unwrap().len(), 2);
    }
}

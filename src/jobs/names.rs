use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use super::{BatchReport, JobContext, Tally, update_coins};
use crate::coin::CoinPatch;
use crate::retry::{RetryOutcome, retry_rate_limited};
use crate::store::{Filter, select_coins};

/// Replace `coin_name` with CoinGecko's display name.
#[tracing::instrument(skip_all, fields(job = "names"))]
pub async fn refresh_names(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let coins = select_coins(ctx.store.as_ref(), "id,coingecko_id", &[Filter::not_null("coingecko_id")]).await?;
    info!(count = coins.len(), "fetched coins with a CoinGecko id");

    let tally = Arc::new(Tally::default());
    let mut enqueued = 0;
    for coingecko_id in coins.into_iter().filter_map(|c| c.coingecko_id) {
        ctx.queue.enqueue(name_item(ctx.clone(), coingecko_id, Arc::clone(&tally)));
        enqueued += 1;
    }
    ctx.queue.wait_idle().await;

    Ok(BatchReport::new("names", enqueued, &tally, started_at))
}

async fn name_item(ctx: JobContext, coingecko_id: String, tally: Arc<Tally>) {
    let outcome = retry_rate_limited(&coingecko_id, &ctx.retry, || ctx.coingecko.coin_name(&coingecko_id)).await;
    let RetryOutcome::Success { value: name, .. } = outcome else {
        return;
    };

    let ok = update_coins(
        ctx.store.as_ref(),
        &ctx.retry,
        &coingecko_id,
        &CoinPatch::coin_name(name),
        &[Filter::eq("coingecko_id", &coingecko_id)],
    )
    .await;
    tally.record(ok);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing;
    use crate::store::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn renames_from_coin_detail() {
        let server = MockServer::start().await;
        Mock::given(path("/coins/bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "bitcoin", "name": "Bitcoin"})))
            .mount(&server)
            .await;
        // Always throttled: gives up after 1 + max_retries attempts.
        Mock::given(path("/coins/dogecoin"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::with_rows(
            "coins",
            vec![
                json!({"id": 1, "coin_name": "BTC", "coingecko_id": "bitcoin"}),
                json!({"id": 2, "coin_name": "DOGE", "coingecko_id": "dogecoin"}),
                json!({"id": 3, "coin_name": "NEW", "coingecko_id": null}),
            ],
        ));
        let ctx = testing::context(&server.uri(), Arc::clone(&store));
        let report = refresh_names(&ctx).await.unwrap();

        assert_eq!(report.enqueued, 2);
        assert_eq!(report.succeeded, 1);
        let rows = store.rows("coins");
        assert_eq!(rows[0]["coin_name"], "Bitcoin");
        assert_eq!(rows[1]["coin_name"], "DOGE");
        assert_eq!(rows[2]["coin_name"], "NEW");
    }
}

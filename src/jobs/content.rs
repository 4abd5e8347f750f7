use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use super::{BatchReport, JobContext, Tally, update_coins};
use crate::coin::{Coin, CoinPatch};
use crate::coinbase::Currency;
use crate::queue::{QueueConfig, RateLimitedFetchQueue};
use crate::retry::{RetryOutcome, retry_rate_limited};
use crate::store::{Filter, select_coins};

/// One-line description stored in `scraped_content`.
pub fn content_blurb(name: &str, symbol: &str, currency: &Currency) -> String {
    format!(
        "About {name} ({}): {} is a {}.",
        symbol.to_uppercase(),
        currency.name,
        currency.kind
    )
}

/// Fill `scraped_content` from Coinbase currency descriptions.
///
/// The currency endpoint is paced on its own queue with the slower content
/// delay.
#[tracing::instrument(skip_all, fields(job = "content"))]
pub async fn scrape_content(ctx: &JobContext) -> Result<BatchReport> {
    let started_at = Utc::now();
    let coins = select_coins(
        ctx.store.as_ref(),
        "id,coin_name,coin_base",
        &[Filter::not_null("coin_base"), Filter::is_null("scraped_content")],
    )
    .await?;
    info!(count = coins.len(), "fetched coins without content");

    let queue = RateLimitedFetchQueue::new(QueueConfig {
        inter_item_delay: ctx.content_delay,
    });
    let tally = Arc::new(Tally::default());
    let mut enqueued = 0;
    for coin in coins {
        queue.enqueue(content_item(ctx.clone(), coin, Arc::clone(&tally)));
        enqueued += 1;
    }
    queue.wait_idle().await;

    Ok(BatchReport::new("content", enqueued, &tally, started_at))
}

async fn content_item(ctx: JobContext, coin: Coin, tally: Arc<Tally>) {
    let Some(symbol) = coin.coin_base.clone() else {
        return;
    };
    let outcome = retry_rate_limited(&symbol, &ctx.retry, || ctx.coinbase.currency(&symbol)).await;
    let RetryOutcome::Success { value: currency, .. } = outcome else {
        return;
    };

    let name = coin.coin_name.clone().unwrap_or_else(|| symbol.clone());
    let text = content_blurb(&name, &symbol, &currency);
    info!(coin = %name, content = %text, "fetched content");
    let ok = update_coins(
        ctx.store.as_ref(),
        &ctx.retry,
        &name,
        &CoinPatch::scraped_content(text),
        &[Filter::eq("id", coin.id)],
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

    #[test]
    fn blurb_uppercases_symbol() {
        let currency = Currency {
            id: "ETH".into(),
            name: "Ethereum".into(),
            kind: "crypto".into(),
        };
        assert_eq!(
            content_blurb("Ether", "eth", &currency),
            "About Ether (ETH): Ethereum is a crypto."
        );
    }

    #[tokio::test]
    async fn writes_content_for_known_currencies() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/currencies/btc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "BTC", "name": "Bitcoin", "type": "crypto"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::with_rows(
            "coins",
            vec![
                json!({"id": 1, "coin_name": "Bitcoin", "coin_base": "BTC", "scraped_content": null}),
                json!({"id": 2, "coin_name": "Nope", "coin_base": "NOPE", "scraped_content": null}),
                json!({"id": 3, "coin_name": "Done", "coin_base": "DONE", "scraped_content": "kept"}),
                json!({"id": 4, "coin_name": "No base", "coin_base": null}),
            ],
        ));
        let ctx = testing::context(&server.uri(), Arc::clone(&store));
        let report = scrape_content(&ctx).await.unwrap();

        assert_eq!(report.enqueued, 2);
        assert_eq!(report.succeeded, 1);
        let rows = store.rows("coins");
        assert_eq!(rows[0]["scraped_content"], "About Bitcoin (BTC): Bitcoin is a crypto.");
        assert!(rows[1]["scraped_content"].is_null());
        assert_eq!(rows[2]["scraped_content"], "kept");
    }
}

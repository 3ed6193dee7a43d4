pub mod esplora;
pub mod retry;

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Proxy, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
pub use esplora::{BlockSummary, EsploraTx};
use retry::{RetryPolicy, with_retry};

/// Esplora serves block transactions in fixed pages of this size.
pub const TXS_PAGE_SIZE: usize = 25;

/// Source of recent blocks and their transactions.
pub trait ChainSource {
    /// Most recent blocks, newest first, at most `count`.
    async fn recent_blocks(&self, count: usize) -> Result<Vec<BlockSummary>>;

    /// Transactions of `block` in block order; `limit == 0` means all.
    async fn block_transactions(&self, block: &BlockSummary, limit: usize) -> Result<Vec<EsploraTx>>;

    /// A single transaction by id; `None` when upstream does not know it.
    async fn transaction(&self, txid: &str) -> Result<Option<EsploraTx>>;
}

/// How many transactions to fetch from a block: the smaller of `limit` and
/// `tx_count`, where 0 means no bound on either side.
fn wanted_txs(limit: usize, tx_count: usize) -> usize {
    match (limit, tx_count) {
        (0, total) => total,
        (limit, 0) => limit,
        (limit, total) => limit.min(total),
    }
}

/// Whether another page is needed after a page of `page_len` brought the
/// total to `fetched`. A short page is always the last one.
fn needs_next_page(fetched: usize, page_len: usize, wanted: usize) -> bool {
    page_len >= TXS_PAGE_SIZE && (wanted == 0 || fetched < wanted)
}

/// Pull pages starting at offset 0 until [`needs_next_page`] says stop,
/// then cut to `limit` (0 keeps everything).
async fn fetch_paged<T, F, Fut>(wanted: usize, limit: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items: Vec<T> = Vec::with_capacity(wanted);
    loop {
        let page = fetch_page(items.len()).await?;
        let page_len = page.len();
        items.extend(page);
        if !needs_next_page(items.len(), page_len, wanted) {
            break;
        }
    }
    if limit > 0 {
        items.truncate(limit);
    }
    Ok(items)
}

/// Esplora REST client (mempool.space or a self-hosted instance).
pub struct MempoolClient {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl MempoolClient {
    pub fn new(config: &UpstreamConfig, retry: RetryPolicy) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            client: builder.build()?,
            retry,
        })
    }

    /// GET `path` and decode JSON, retrying per policy. Non-2xx statuses
    /// and undecodable bodies both count as failed attempts.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let found = self.fetch::<T>(&url, false).await?;
        found.ok_or(Error::UpstreamStatus {
            status: StatusCode::NOT_FOUND.as_u16(),
            url,
        })
    }

    /// Like [`Self::get_json`], but a 404 is an answer (`None`) and is not retried.
    async fn get_json_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        self.fetch(&url, true).await
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str, allow_missing: bool) -> Result<Option<T>> {
        let client = &self.client;
        with_retry(&self.retry, url, move || async move {
            debug!("GET {url}");
            let resp = client.get(url).send().await?;
            let status = resp.status();
            if allow_missing && status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(Error::UpstreamStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            Ok(Some(resp.json::<T>().await?))
        })
        .await
    }
}

impl ChainSource for MempoolClient {
    async fn recent_blocks(&self, count: usize) -> Result<Vec<BlockSummary>> {
        let mut blocks: Vec<BlockSummary> = self.get_json("/blocks").await?;
        blocks.truncate(count);
        Ok(blocks)
    }

    async fn block_transactions(&self, block: &BlockSummary, limit: usize) -> Result<Vec<EsploraTx>> {
        let wanted = wanted_txs(limit, block.tx_count);
        let txs = fetch_paged(wanted, limit, move |start| {
            let path = format!("/block/{}/txs/{}", block.id, start);
            async move { self.get_json::<Vec<EsploraTx>>(&path).await }
        })
        .await?;

        debug!(
            "Block {} (height {}): fetched {} of {} txs",
            block.id_short(),
            block.height,
            txs.len(),
            block.tx_count
        );
        Ok(txs)
    }

    async fn transaction(&self, txid: &str) -> Result<Option<EsploraTx>> {
        let tx = self.get_json_optional(&format!("/tx/{txid}")).await?;
        if tx.is_none() {
            debug!("Transaction {txid} not found upstream");
        }
        Ok(tx)
    }
}

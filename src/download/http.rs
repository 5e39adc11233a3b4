//! HTTP transfer driver: block-free streaming GET with `Range`/`If-Match`
//! resume support, driven by its own `tokio` task rather than the event
//! loop's socket polling (the CoAP driver's model) — `reqwest` already
//! owns that socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ETAG, IF_MATCH, RANGE};
use tokio::sync::Mutex as AsyncMutex;

use super::{reconcile_resume_offset, ByteCounters, DownloadConfig, Transfer, TransferStatus, UrlScheme};
use crate::error::Result;

type BlockCallback = dyn Fn(&[u8]) -> Result<()> + Send + Sync;
type FinishCallback = dyn Fn(TransferStatus) + Send + Sync;

pub struct HttpTransfer {
    client: reqwest::Client,
    url: String,
    idle_timeout: Duration,
    counters: Arc<ByteCounters>,
    etag: Arc<AsyncMutex<Option<String>>>,
    suspended: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    on_block: Arc<BlockCallback>,
    on_finish: Arc<FinishCallback>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl HttpTransfer {
    pub fn spawn(
        client: reqwest::Client,
        config: DownloadConfig,
        on_block: Arc<BlockCallback>,
        on_finish: Arc<FinishCallback>,
    ) -> Self {
        let counters = Arc::new(ByteCounters::default());
        counters.add_written(config.start_offset);
        let etag = Arc::new(AsyncMutex::new(config.etag.clone()));
        let suspended = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));

        let mut transfer = HttpTransfer {
            client,
            url: config.url,
            idle_timeout: config.idle_timeout,
            counters,
            etag,
            suspended,
            cancel,
            on_block,
            on_finish,
            task: None,
        };
        transfer.spawn_task();
        transfer
    }

    fn spawn_task(&mut self) {
        let client = self.client.clone();
        let url = self.url.clone();
        let idle_timeout = self.idle_timeout;
        let counters = self.counters.clone();
        let etag = self.etag.clone();
        let cancel = self.cancel.clone();
        let on_block = self.on_block.clone();
        let on_finish = self.on_finish.clone();
        cancel.store(false, Ordering::Relaxed);

        self.task = Some(tokio::spawn(async move {
            let status = run(client, url, idle_timeout, counters, etag, cancel, on_block).await;
            on_finish(status);
        }));
    }
}

async fn run(
    client: reqwest::Client,
    url: String,
    idle_timeout: Duration,
    counters: Arc<ByteCounters>,
    etag: Arc<AsyncMutex<Option<String>>>,
    cancel: Arc<AtomicBool>,
    on_block: Arc<BlockCallback>,
) -> TransferStatus {
    let bytes_written = counters.bytes_written();
    let mut request = client.get(&url);
    if bytes_written > 0 {
        request = request.header(RANGE, format!("bytes={bytes_written}-"));
    }
    if let Some(held) = etag.lock().await.clone() {
        request = request.header(IF_MATCH, format!("\"{held}\""));
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => return TransferStatus::Failed(e.to_string()),
    };

    if response.status().as_u16() == 412 {
        return TransferStatus::Expired;
    }
    if !response.status().is_success() {
        return TransferStatus::InvalidResponse(response.status().as_u16());
    }

    if let Some(value) = response.headers().get(ETAG).and_then(|v| v.to_str().ok()) {
        let value = value.trim_matches('"').to_string();
        let mut held = etag.lock().await;
        match held.as_ref() {
            Some(prev) if *prev != value => return TransferStatus::Expired,
            _ => *held = Some(value),
        }
    }

    let server_offset = parse_content_range_start(response.headers()).unwrap_or(0);
    let mut discard = match reconcile_resume_offset(bytes_written, server_offset) {
        Ok(n) => n,
        Err(e) => return TransferStatus::Failed(e.to_string()),
    };

    let mut stream = response.bytes_stream();
    loop {
        if cancel.load(Ordering::Relaxed) {
            return TransferStatus::Aborted;
        }
        let next = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(item) => item,
            Err(_) => return TransferStatus::Failed("idle timeout waiting for data".into()),
        };
        let chunk = match next {
            Some(Ok(c)) => c,
            Some(Err(e)) => return TransferStatus::Failed(e.to_string()),
            None => break,
        };
        counters.add_downloaded(chunk.len() as u64);
        let mut chunk: &[u8] = &chunk;
        if discard > 0 {
            let skip = discard.min(chunk.len() as u64) as usize;
            chunk = &chunk[skip..];
            discard -= skip as u64;
        }
        if !chunk.is_empty() {
            if let Err(e) = on_block(chunk) {
                return TransferStatus::Failed(e.to_string());
            }
            counters.add_written(chunk.len() as u64);
        }
    }
    TransferStatus::Finished
}

/// Parses the start offset out of a `Content-Range: bytes <start>-<end>/<total|*>`
/// response header.
fn parse_content_range_start(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::CONTENT_RANGE)?.to_str().ok()?;
    let rest = value.strip_prefix("bytes ")?;
    let start = rest.split(['-', '/']).next()?;
    start.parse().ok()
}

impl Transfer for HttpTransfer {
    fn transport(&self) -> UrlScheme {
        UrlScheme::parse(&self.url).map(|(s, _)| s).unwrap_or(UrlScheme::Https)
    }

    fn suspend(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.suspended.store(true, Ordering::Relaxed);
    }

    fn reconnect(&mut self) -> Result<()> {
        self.suspended.store(false, Ordering::Relaxed);
        self.spawn_task();
        Ok(())
    }

    fn set_next_block_offset(&mut self, offset: u64) {
        let (_, written) = self.counters.snapshot();
        if offset > written {
            self.counters.add_written(offset - written);
        }
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn content_range_header_parses_start_offset() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_RANGE, HeaderValue::from_static("bytes 1024-2047/4096"));
        assert_eq!(parse_content_range_start(&headers), Some(1024));
    }

    #[test]
    fn missing_content_range_is_none() {
        assert_eq!(parse_content_range_start(&HeaderMap::new()), None);
    }
}

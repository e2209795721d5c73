//! Rate-limited fetch queue for the remote content API
//!
//! Requests are pushed onto a bounded queue and served by a fixed pool
//! of worker tasks. Before issuing a request a worker acquires a
//! concurrency permit (max in-flight) and waits on a time-window rate
//! limiter shared across all workers, so the API sees at most one
//! request per configured interval regardless of pool size.
//!
//! 429/503 responses surface as a retryable [`AppError::RateLimited`];
//! this client never retries on its own — the caller decides.

use crate::config::ApiConfig;
use crate::error::{AppError, Result};
use crate::models::api::{PostsResponse, SearchQuery};
use base64::Engine;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The remote API caps page sizes at 320.
const MAX_PAGE_LIMIT: u32 = 320;

/// Pending requests the queue will hold before `enqueue` backpressures.
const QUEUE_DEPTH: usize = 64;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// What a worker hands back: parsed JSON for API endpoints, raw bytes
/// for file downloads.
enum Payload {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

struct Job {
    url: String,
    query: Vec<(String, String)>,
    reply: oneshot::Sender<Result<Payload>>,
}

/// Asynchronous client for the booru-style content API.
pub struct ApiClient {
    config: ApiConfig,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ApiClient {
    /// Build the client and start its worker pool.
    ///
    /// Fails with a config error when credentials are missing; the
    /// remote API rejects anonymous requests.
    pub fn new(config: ApiConfig) -> Result<Self> {
        if config.username.is_empty() || config.api_key.is_empty() {
            return Err(AppError::config("username and API key must be provided"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| AppError::config("user agent contains invalid characters"))?,
        );
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", config.username, config.api_key));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {credentials}"))
                .map_err(|_| AppError::config("credentials contain invalid characters"))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::with_period(config.request_interval)
            .ok_or_else(|| AppError::config("request interval must be non-zero"))?
            .allow_burst(nonzero!(1u32));
        let limiter: Arc<DirectLimiter> = Arc::new(RateLimiter::direct(quota));
        let semaphore = Arc::new(Semaphore::new(config.max_inflight.max(1)));

        let (tx, rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.max_workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let semaphore = Arc::clone(&semaphore);
                let limiter = Arc::clone(&limiter);
                let http = http.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            debug!(worker_id, "queue closed, worker exiting");
                            break;
                        };
                        let _permit = match semaphore.acquire().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        limiter.until_ready().await;
                        let result = execute(&http, &job.url, &job.query).await;
                        if job.reply.send(result).is_err() {
                            warn!(worker_id, url = %job.url, "caller abandoned request");
                        }
                    }
                })
            })
            .collect();

        debug!(workers = config.max_workers.max(1), "API client initialized");
        Ok(Self {
            config,
            tx: Some(tx),
            workers,
        })
    }

    /// Search the posts endpoint.
    ///
    /// `limit` is clamped to the API's page cap; `page` is the opaque
    /// pagination cursor from a previous response.
    pub async fn search_posts(
        &self,
        query: &SearchQuery,
        limit: u32,
        page: Option<&str>,
    ) -> Result<PostsResponse> {
        let mut params = vec![
            ("limit".to_string(), limit.min(MAX_PAGE_LIMIT).to_string()),
            ("tags".to_string(), query.build_tags()),
        ];
        if let Some(page) = page {
            params.push(("page".to_string(), page.to_string()));
        }

        let url = format!("{}/posts.json", self.config.base_url.trim_end_matches('/'));
        match self.enqueue(url, params).await? {
            Payload::Json(value) => serde_json::from_value::<PostsResponse>(value)
                .map_err(|e| AppError::schema(format!("posts response: {e}"))),
            Payload::Bytes(_) => Err(AppError::schema(
                "posts endpoint returned a non-JSON body".to_string(),
            )),
        }
    }

    /// Download a file through the queue, subject to the same rate
    /// limiting as API calls.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        match self.enqueue(url.to_string(), Vec::new()).await? {
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::Json(_) => Err(AppError::schema(
                "expected binary content, got JSON".to_string(),
            )),
        }
    }

    async fn enqueue(&self, url: String, query: Vec<(String, String)>) -> Result<Payload> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| AppError::internal("API client is closed"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        debug!(url = %url, "enqueueing request");
        tx.send(Job {
            url,
            query,
            reply: reply_tx,
        })
        .await
        .map_err(|_| AppError::internal("request queue closed"))?;
        reply_rx
            .await
            .map_err(|_| AppError::internal("worker dropped the request"))?
    }

    /// Drain the queue and shut the worker pool down.
    ///
    /// Idempotent; safe to call when no request was ever issued. Closing
    /// the queue lets workers finish in-flight jobs, then they exit on
    /// their own.
    pub async fn close(&mut self) {
        if self.tx.take().is_none() && self.workers.is_empty() {
            return;
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker ended abnormally");
            }
        }
        info!("API client closed");
    }
}

async fn execute(
    http: &reqwest::Client,
    url: &str,
    query: &[(String, String)],
) -> Result<Payload> {
    debug!(url = %url, "processing request");
    let response = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| AppError::Network(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        return Err(AppError::RateLimited);
    }
    if !status.is_success() {
        // Surface the server-provided reason when the body carries one.
        let reason = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("reason")
                    .and_then(|r| r.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(AppError::Api {
            status: status.as_u16(),
            reason,
        });
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);
    if is_json {
        response
            .json::<serde_json::Value>()
            .await
            .map(Payload::Json)
            .map_err(|e| AppError::schema(format!("invalid JSON body: {e}")))
    } else {
        response
            .bytes()
            .await
            .map(|b| Payload::Bytes(b.to_vec()))
            .map_err(|e| AppError::Network(e.to_string()))
    }
}

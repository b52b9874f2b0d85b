//! Shared outbound HTTP client
//!
//! One client follows redirects and is used for topic fetches; the other
//! never redirects and is used for everything aimed at subscriber callbacks
//! and publisher validators, where a redirect must be treated as the
//! endpoint's answer rather than silently chased. Neither client turns HTTP
//! status codes into errors; classification happens at the call sites.

use std::time::Duration;

use rand::Rng;
use reqwest::redirect::Policy;
use reqwest::{Client, Request, Response};

use crate::error::Error;

/// Transparent connect-level retries before giving up on a request
const CONNECT_RETRIES: u32 = 3;
/// Base delay between connect retries, stretched by jitter
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// The hub's outbound HTTP clients
#[derive(Debug, Clone)]
pub struct HttpClient {
    topics: Client,
    callbacks: Client,
}

impl HttpClient {
    /// Builds both clients with the given identity and hard timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let topics = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::limited(10))
            .build()
            .map_err(Error::HttpSetup)?;

        let callbacks = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(Error::HttpSetup)?;

        Ok(Self { topics, callbacks })
    }

    /// Client for topic fetches (follows redirects)
    pub fn topics(&self) -> &Client {
        &self.topics
    }

    /// Client for callback and validator requests (never redirects)
    pub fn callbacks(&self) -> &Client {
        &self.callbacks
    }

    /// Executes a request, retrying transparently on transient connection
    /// errors with a jittered delay. Statuses are returned as-is.
    pub async fn execute_with_retry(
        &self,
        client: &Client,
        request: Request,
    ) -> Result<Response, reqwest::Error> {
        let mut attempt = 0u32;

        loop {
            let this_try = match request.try_clone() {
                Some(clone) => clone,
                // Streaming bodies cannot be replayed
                None => return client.execute(request).await,
            };

            match client.execute(this_try).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt + 1 < CONNECT_RETRIES && err.is_connect() => {
                    attempt += 1;
                    let factor = 1.0 + rand::rng().random_range(0.0..1.0);
                    let delay = RETRY_DELAY.mul_f64(attempt as f64 * factor);
                    tracing::info!(
                        "Retrying request to {} after connection error (attempt {}): {}",
                        request.url(),
                        attempt,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::{prelude::*, BaseUrl, Error};

/// Gateway status codes worth retrying (load balancer / restart churn).
const RETRYABLE_STATUS_CODES: &[u16] = &[502, 503, 504];

const MAX_RETRIES: u32 = 3;

/// Doubles with each retry: 100ms, 200ms, 400ms.
const INITIAL_BACKOFF_MS: u64 = 100;

#[derive(Deserialize, Debug)]
struct ErrorBody {
    code: u16,
    msg: String,
    #[serde(default)]
    data: Option<String>,
}

/// Thin JSON-over-HTTP transport to the ledger gateway.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub base_url: String,
}

async fn parse_response(response: Response) -> Result<String> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| Error::GenericRequest(e.to_string()))?;

    if status < 400 {
        return Ok(text);
    }
    if (400..500).contains(&status) {
        return Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Error::client_error(status, Some(body.code), body.msg, body.data),
            Err(err) => Error::client_error(status, None, text, Some(err.to_string())),
        });
    }
    Err(Error::server_error(status, text))
}

impl HttpClient {
    pub fn new(client: Client, base_url: &BaseUrl) -> Self {
        Self {
            client,
            base_url: base_url.get_url(),
        }
    }

    /// POST a JSON body, retrying transient gateway errors (502, 503, 504)
    /// with exponential backoff.
    pub async fn post(&self, url_path: &str, data: String) -> Result<String> {
        let full_url = format!("{}{url_path}", self.base_url);

        for attempt in 0..=MAX_RETRIES {
            let request = self
                .client
                .post(&full_url)
                .header("Content-Type", "application/json")
                .body(data.clone())
                .build()
                .map_err(|e| Error::GenericRequest(e.to_string()))?;

            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| Error::GenericRequest(e.to_string()))?;

            let status = response.status().as_u16();
            if RETRYABLE_STATUS_CODES.contains(&status) && attempt < MAX_RETRIES {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    status,
                    attempt = attempt + 1,
                    max_attempts = MAX_RETRIES + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    url = %url_path,
                    "Retryable ledger gateway error, backing off"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            return parse_response(response).await;
        }

        Err(Error::GenericRequest(format!(
            "Max retries ({MAX_RETRIES}) exceeded for {url_path}"
        )))
    }
}

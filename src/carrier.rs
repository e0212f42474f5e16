//! Outbound side effects: confirmation texts and callback calls.

use crate::config::CarrierConfig;
use crate::utils::mask_secret;
use crate::version::get_useragent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, to: &str, body: &str) -> Result<()>;
}

/// A call the carrier should place and then drive through our callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub to: String,
    /// Callback the carrier requests once the callee answers.
    pub url: String,
    pub status_callback: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallPlacer: Send + Sync {
    /// Returns the carrier's id for the new call.
    async fn place_call(&self, call: &OutboundCall) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ResourceCreated {
    sid: String,
}

/// REST client for the carrier's Messages and Calls resources.
pub struct CarrierClient {
    http: Client,
    config: Option<CarrierConfig>,
}

impl CarrierClient {
    pub fn new(config: Option<CarrierConfig>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(get_useragent())
            .timeout(Duration::from_secs(10))
            .build()?;
        match &config {
            Some(c) => info!(
                api_base = %c.api_base,
                account_sid = %c.account_sid,
                auth_token = %mask_secret(&c.auth_token),
                "carrier client configured"
            ),
            None => warn!("carrier credentials missing, outbound messages and calls will fail"),
        }
        Ok(Self { http, config })
    }

    async fn create(&self, resource: &str, form: &[(&str, &str)]) -> Result<String> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("carrier credentials are not configured"))?;
        let url = format!(
            "{}/Accounts/{}/{}.json",
            config.api_base.trim_end_matches('/'),
            config.account_sid,
            resource
        );
        let mut params = vec![("From", config.from_number.as_str())];
        params.extend_from_slice(form);

        let start_time = Instant::now();
        let response = self
            .http
            .post(&url)
            .basic_auth(&config.account_sid, Some(&config.auth_token))
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        info!(
            resource,
            elapsed = start_time.elapsed().as_millis(),
            status = ?status,
            "carrier request"
        );
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("carrier rejected {} request: {} {}", resource, status, body));
        }
        let created: ResourceCreated = response.json().await?;
        Ok(created.sid)
    }
}

#[async_trait]
impl Messenger for CarrierClient {
    async fn send_message(&self, to: &str, body: &str) -> Result<()> {
        let sid = self.create("Messages", &[("To", to), ("Body", body)]).await?;
        info!(to, message_sid = %sid, "confirmation message sent");
        Ok(())
    }
}

#[async_trait]
impl CallPlacer for CarrierClient {
    async fn place_call(&self, call: &OutboundCall) -> Result<String> {
        let sid = self
            .create(
                "Calls",
                &[
                    ("To", call.to.as_str()),
                    ("Url", call.url.as_str()),
                    ("Method", "POST"),
                    ("StatusCallback", call.status_callback.as_str()),
                    ("StatusCallbackMethod", "POST"),
                ],
            )
            .await?;
        info!(to = %call.to, call_sid = %sid, "outbound call placed");
        Ok(sid)
    }
}

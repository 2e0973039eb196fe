use super::AccountSource;
use crate::error::FetchError;
use crate::models::Position;
use reqwest::Client;
use rust_decimal::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const AUTH_HEADER: &str = "auth-token";
const BTC_KEYWORDS: [&str; 3] = ["BTC", "BITCOIN", "XBT"];
const BUY_TYPE: &str = "POSITION_TYPE_BUY";

/// REST client for the brokerage gateway that fronts the trading terminal
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    account_id: String,
    token: String,
}

/// Response from /account-information
#[derive(Debug, Deserialize)]
struct AccountInformation {
    equity: Option<f64>,
    balance: Option<f64>,
}

/// One entry of /positions
#[derive(Debug, Deserialize)]
struct OpenPosition {
    symbol: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GatewayClient {
    pub fn new(
        base_url: &str,
        account_id: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            token: token.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, resource: &str) -> Result<T, FetchError> {
        let url = format!(
            "{}/users/current/accounts/{}/{}",
            self.base_url, self.account_id, resource
        );

        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(format!("{resource}: {e}")))
    }
}

impl AccountSource for GatewayClient {
    async fn get_equity(&self) -> Result<Decimal, FetchError> {
        let info: AccountInformation = self.get_json("account-information").await?;

        let value = info
            .equity
            .or(info.balance)
            .ok_or_else(|| FetchError::Malformed("account has neither equity nor balance".into()))?;

        Decimal::from_f64(value)
            .map(|d| d.round_dp(2))
            .ok_or_else(|| FetchError::Malformed(format!("equity {value} is not a number")))
    }

    async fn get_position(&self) -> Result<Position, FetchError> {
        let positions: Vec<OpenPosition> = self.get_json("positions").await?;
        Ok(btc_position(&positions))
    }
}

/// Side of the first open position on a bitcoin symbol
fn btc_position(positions: &[OpenPosition]) -> Position {
    positions
        .iter()
        .find(|p| {
            let symbol = p.symbol.to_uppercase();
            BTC_KEYWORDS.iter().any(|k| symbol.contains(k))
        })
        .map(|p| {
            if p.kind == BUY_TYPE {
                Position::Buy
            } else {
                Position::Sell
            }
        })
        .unwrap_or(Position::NoPosition)
}

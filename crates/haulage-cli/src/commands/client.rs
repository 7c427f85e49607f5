//! HTTP client shared by the subcommands that talk to a running node.

use anyhow::Context;
use clap::Args;
use haulage_core::{AccountId, Currency, Money};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// API endpoint of the node.
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:8700")]
    pub endpoint: String,

    /// Account to act as, forwarded as `x-account-id`.
    #[arg(id = "acting_account", long = "as", global = true)]
    pub account: Option<AccountId>,

    /// Comma-separated roles of the acting account (shipper, courier, admin).
    #[arg(long, global = true, default_value = "")]
    pub roles: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

pub struct NodeClient {
    http: reqwest::Client,
    connect: ConnectArgs,
}

impl NodeClient {
    pub fn new(connect: &ConnectArgs) -> Self {
        Self {
            http: reqwest::Client::new(),
            connect: connect.clone(),
        }
    }

    /// The acting account, required by caller-scoped commands.
    pub fn account(&self) -> anyhow::Result<AccountId> {
        self.connect
            .account
            .context("this command needs --as <ACCOUNT_ID>")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.connect.endpoint.trim_end_matches('/'), path)
    }

    fn with_caller(&self, request: RequestBuilder) -> RequestBuilder {
        match self.connect.account {
            Some(account) => request
                .header("x-account-id", account.to_string())
                .header("x-roles", &self.connect.roles),
            None => request,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.http.get(self.url(path))).await
    }

    pub async fn get_query<Q: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
    ) -> anyhow::Result<T> {
        self.send(self.http.get(self.url(path)).query(query)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    /// `PUT` for routes that answer `204 No Content`.
    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<()> {
        self.dispatch(self.http.put(self.url(path)).json(body))
            .await
            .map(|_| ())
    }

    /// `PUT` for routes that answer with a JSON body.
    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        self.send(self.http.put(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let resp = self.dispatch(request).await?;
        Ok(resp.json().await?)
    }

    async fn dispatch(&self, request: RequestBuilder) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .with_caller(request)
            .send()
            .await
            .with_context(|| {
                format!(
                    "could not reach node at {} (is haulage-node running?)",
                    self.connect.endpoint
                )
            })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        tracing::debug!(%status, "node rejected request");
        if let Ok(err) = resp.json::<ErrorResponse>().await {
            anyhow::bail!("request failed (HTTP {}): {}", status, err.error);
        } else {
            anyhow::bail!("request failed (HTTP {})", status);
        }
    }
}

/// Parse a decimal amount such as `505.00` in the given currency.
pub fn parse_amount(amount: &str, currency: &str) -> anyhow::Result<Money> {
    let currency: Currency = currency.parse()?;
    Ok(Money::parse(amount, currency)?)
}

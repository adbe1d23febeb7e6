//! Synchronous upstream collaborators: the identity verifier and the stock
//! ledger. Both are reached over HTTP with a bounded per-request timeout;
//! transport failures, timeouts and server errors surface as
//! `UpstreamUnavailable`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use shared::{ApiResponse, ServiceError};

/// Product snapshot exposed by the stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
}

/// Confirms that a user id exists.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_user(&self, user_id: i64) -> Result<(), ServiceError>;
}

/// Authoritative per-product unit counts.
#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn product(&self, product_id: i64) -> Result<Product, ServiceError>;

    async fn check_stock(&self, product_id: i64, quantity: i32) -> Result<bool, ServiceError>;

    /// Reduces the unit count, returning the updated snapshot.
    async fn reserve(&self, product_id: i64, quantity: i32) -> Result<Product, ServiceError>;
}

fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

pub struct HttpIdentityVerifier {
    client: Client,
    base_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify_user(&self, user_id: i64) -> Result<(), ServiceError> {
        let url = format!("{}/auth/users/{}", self.base_url, user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(format!("identity verifier: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound {
                resource: "User",
                key: user_id.to_string(),
            }),
            s if s.is_success() => Ok(()),
            s => Err(ServiceError::UpstreamUnavailable(format!(
                "identity verifier returned {s}"
            ))),
        }
    }
}

pub struct HttpStockLedger {
    client: Client,
    base_url: String,
}

impl HttpStockLedger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    async fn unwrap_product(response: reqwest::Response) -> Result<Product, ServiceError> {
        let envelope: ApiResponse<Product> = response
            .json()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(format!("stock ledger: {e}")))?;
        envelope.data.ok_or_else(|| {
            ServiceError::UpstreamUnavailable("stock ledger returned an empty envelope".to_string())
        })
    }
}

#[derive(Debug, Serialize)]
struct StockUpdate {
    quantity: i32,
}

#[async_trait]
impl StockLedger for HttpStockLedger {
    async fn product(&self, product_id: i64) -> Result<Product, ServiceError> {
        let url = format!("{}/products/{}", self.base_url, product_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(format!("stock ledger: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound {
                resource: "Product",
                key: product_id.to_string(),
            }),
            s if s.is_success() => Self::unwrap_product(response).await,
            s => Err(ServiceError::UpstreamUnavailable(format!(
                "stock ledger returned {s}"
            ))),
        }
    }

    async fn check_stock(&self, product_id: i64, quantity: i32) -> Result<bool, ServiceError> {
        let url = format!(
            "{}/products/{}/check-stock?quantity={}",
            self.base_url, product_id, quantity
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(format!("stock ledger: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::UpstreamUnavailable(format!(
                "stock check returned {}",
                response.status()
            )));
        }
        let envelope: ApiResponse<bool> = response
            .json()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(format!("stock ledger: {e}")))?;
        Ok(envelope.data.unwrap_or(false))
    }

    async fn reserve(&self, product_id: i64, quantity: i32) -> Result<Product, ServiceError> {
        let url = format!("{}/products/{}/reduce-stock", self.base_url, product_id);
        let response = self
            .client
            .post(&url)
            .json(&StockUpdate { quantity })
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamUnavailable(format!("stock ledger: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::UpstreamUnavailable(format!(
                "reduce-stock returned {}",
                response.status()
            )));
        }
        Self::unwrap_product(response).await
    }
}

#[derive(Default)]
struct IdentityState {
    users: HashSet<i64>,
    unavailable: bool,
}

/// In-memory identity verifier for tests.
#[derive(Clone, Default)]
pub struct InMemoryIdentity {
    state: Arc<RwLock<IdentityState>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: i64) {
        self.state.write().await.users.insert(user_id);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }
}

#[async_trait]
impl IdentityVerifier for InMemoryIdentity {
    async fn verify_user(&self, user_id: i64) -> Result<(), ServiceError> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(ServiceError::UpstreamUnavailable(
                "identity verifier: connection refused".to_string(),
            ));
        }
        if state.users.contains(&user_id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound {
                resource: "User",
                key: user_id.to_string(),
            })
        }
    }
}

#[derive(Default)]
struct LedgerState {
    products: HashMap<i64, Product>,
    fail_reserve: bool,
    unavailable: bool,
}

/// In-memory stock ledger for tests.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_product(&self, id: i64, name: &str, price: BigDecimal, stock: i32) {
        self.state.write().await.products.insert(
            id,
            Product {
                id,
                name: name.to_string(),
                price,
                stock,
            },
        );
    }

    /// Makes the next reserve call fail while the rest keeps working.
    pub async fn set_fail_reserve(&self, fail: bool) {
        self.state.write().await.fail_reserve = fail;
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn stock_of(&self, product_id: i64) -> Option<i32> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn product(&self, product_id: i64) -> Result<Product, ServiceError> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(ServiceError::UpstreamUnavailable(
                "stock ledger: connection refused".to_string(),
            ));
        }
        state.products.get(&product_id).cloned().ok_or_else(|| {
            ServiceError::NotFound {
                resource: "Product",
                key: product_id.to_string(),
            }
        })
    }

    async fn check_stock(&self, product_id: i64, quantity: i32) -> Result<bool, ServiceError> {
        let product = self.product(product_id).await?;
        Ok(product.stock >= quantity)
    }

    async fn reserve(&self, product_id: i64, quantity: i32) -> Result<Product, ServiceError> {
        let mut state = self.state.write().await;
        if state.unavailable || state.fail_reserve {
            return Err(ServiceError::UpstreamUnavailable(
                "stock ledger: reduce-stock failed".to_string(),
            ));
        }
        let product = state.products.get_mut(&product_id).ok_or_else(|| {
            ServiceError::NotFound {
                resource: "Product",
                key: product_id.to_string(),
            }
        })?;
        if product.stock < quantity {
            return Err(ServiceError::UpstreamUnavailable(format!(
                "reduce-stock rejected: {} units left",
                product.stock
            )));
        }
        product.stock -= quantity;
        Ok(product.clone())
    }
}

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::domain::leaf::{format_account, parse_account};
use crate::domain::merkle::MerkleProof;
use crate::domain::tree::WhitelistTree;
use crate::ports::datastore::TreeDatastore;
use crate::resolver::{EntitlementResolver, Resolution, ResolverError};
use crate::store::{StoreError, TreeStore};

/// Shared application state for axum route handlers.
pub struct AppState<D: TreeDatastore> {
    pub store: Arc<TreeStore<D>>,
    pub resolver: Arc<EntitlementResolver<D>>,
    /// Amount given to every account of a tree created via `POST /accounts`.
    pub default_amount: U256,
}

impl<D: TreeDatastore> AppState<D> {
    pub fn new(resolver: Arc<EntitlementResolver<D>>, default_amount: U256) -> Self {
        Self {
            store: Arc::clone(resolver.store()),
            resolver,
            default_amount,
        }
    }
}

impl<D: TreeDatastore> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            default_amount: self.default_amount,
        }
    }
}

// ── Request / response types ──

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountsRequest {
    pub accounts: Vec<String>,
}

/// Response for POST /accounts.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub success: bool,
    pub root: B256,
}

/// Response for GET /amountAndProof/{address}. On success the amount is a
/// decimal string and the proof the concatenated sibling hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountAndProof {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<MerkleProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AmountAndProof {
    fn negative(message: impl Into<String>) -> Self {
        Self {
            success: false,
            root: None,
            amount: None,
            proof: None,
            message: Some(message.into()),
        }
    }
}

impl From<Resolution> for AmountAndProof {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Entitled(e) => Self {
                success: true,
                root: Some(e.root),
                amount: Some(e.amount.to_string()),
                proof: Some(e.proof),
                message: None,
            },
            Resolution::UnknownAccount => Self::negative("unknown account"),
        }
    }
}

// ── Route handlers ──

/// GET /roots: every published root, in publish order.
pub async fn roots_handler<D: TreeDatastore>(
    State(state): State<AppState<D>>,
) -> Result<Json<Vec<B256>>, AppError> {
    Ok(Json(state.store.list_roots().await?))
}

/// GET /roots/{root}: accounts of one tree in leaf order.
pub async fn tree_accounts_handler<D: TreeDatastore>(
    State(state): State<AppState<D>>,
    Path(root_hex): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let root = parse_b256(&root_hex)?;
    let accounts = state.store.accounts(root).await?;
    Ok(Json(accounts.into_iter().map(format_account).collect()))
}

/// GET /amountAndProof/{address}: the account's entitlement and proof, or
/// `success: false` if it was never published.
pub async fn amount_and_proof_handler<D: TreeDatastore>(
    State(state): State<AppState<D>>,
    Path(address): Path<String>,
) -> Result<Json<AmountAndProof>, AppError> {
    let resolution = state.resolver.resolve(&address).await?;
    Ok(Json(resolution.into()))
}

/// POST /amountsAndProofs: batch form of `/amountAndProof`. Bad or unknown
/// accounts are answered inline; corruption fails the whole request.
pub async fn amounts_and_proofs_handler<D: TreeDatastore + 'static>(
    State(state): State<AppState<D>>,
    Json(request): Json<AccountsRequest>,
) -> Result<Json<Vec<AmountAndProof>>, AppError> {
    let results = state.resolver.resolve_many(request.accounts).await;

    let mut answers = Vec::with_capacity(results.len());
    for result in results {
        answers.push(match result {
            Ok(resolution) => resolution.into(),
            Err(ResolverError::InvalidAccount(e)) => AmountAndProof::negative(e.to_string()),
            Err(e) => return Err(e.into()),
        });
    }
    Ok(Json(answers))
}

/// POST /accounts: build a tree giving every listed account the default
/// amount and publish it.
pub async fn publish_accounts_handler<D: TreeDatastore>(
    State(state): State<AppState<D>>,
    Json(request): Json<AccountsRequest>,
) -> Result<Json<PublishResponse>, AppError> {
    if request.accounts.is_empty() {
        return Err(AppError::BadRequest("no accounts given".into()));
    }

    let accounts = request
        .accounts
        .iter()
        .map(|a| parse_account(a))
        .collect::<Result<Vec<Address>, _>>()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let tree = WhitelistTree::uniform(&accounts, state.default_amount)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    state.store.publish(&tree).await?;
    info!(root = %tree.root(), accounts = accounts.len(), "published tree from request");

    Ok(Json(PublishResponse {
        success: true,
        root: tree.root(),
    }))
}

// ── Error handling ──

/// Application error type that maps to HTTP status codes. Every body is
/// `{ success: false, message }`.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::NotFound(_) => AppError::NotFound(e.to_string()),
            StoreError::DuplicateRoot(_) => AppError::Conflict(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ResolverError> for AppError {
    fn from(e: ResolverError) -> Self {
        match e {
            ResolverError::InvalidAccount(e) => AppError::BadRequest(e.to_string()),
            ResolverError::Store(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m),
            AppError::Internal(m) => {
                error!("request failed: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

// ── Helpers ──

/// Parse a hex string (with or without "0x" prefix) into a B256.
fn parse_b256(s: &str) -> Result<B256, AppError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| AppError::BadRequest(format!("invalid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(AppError::BadRequest(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

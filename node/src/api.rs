//! # REST API
//!
//! Builds the axum router for the node's HTTP interface. Handlers share the
//! ledger, the block store, and the metrics through axum's `State`
//! extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                          |
//! |--------|-----------------------------------|--------------------------------------|
//! | GET    | `/health`                         | Liveness probe                       |
//! | GET    | `/status`                         | Node status summary                  |
//! | GET    | `/v1/directory-height`            | Latest sealed directory height       |
//! | GET    | `/v1/directory-blocks/:hash`      | Directory block by identity hash     |
//! | GET    | `/v1/directory-blocks?from=&to=`  | Directory blocks in `[from, to)`     |
//! | GET    | `/v1/entry-blocks/:hash`          | Entry block by identity hash         |
//! | GET    | `/v1/entry-blocks?key_mr=`        | Entry block by key-Merkle-root       |
//! | GET    | `/v1/entries/:hash`               | Revealed entry by hash               |
//! | GET    | `/v1/entries?ext_id=`             | Revealed entries by external id      |
//! | GET    | `/v1/chains`                      | Every entry chain id                 |
//! | GET    | `/v1/chains/:chain_id`            | One entry chain's state              |
//! | GET    | `/v1/credit-balance/:public_key`  | Net credits of a public key          |
//! | POST   | `/v1/chains`                      | Create a chain with its first entry  |
//! | POST   | `/v1/entries`                     | Submit an entry to an existing chain |
//! | POST   | `/v1/credit-entries`              | Submit a hex-encoded credit entry    |
//!
//! Every response body is built from an explicit view struct; block and
//! entry types are never serialized wholesale.

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use meridian_protocol::block::{chain_id_from_name, ChainBlock, DirectoryBlock, Entry, EntryBlock};
use meridian_protocol::chain::Ledger;
use meridian_protocol::codec::BinaryCodec;
use meridian_protocol::crypto::hash::Digest;
use meridian_protocol::storage::{BlockStore, SledStore, StoreError};
use meridian_protocol::{CreditEntry, LedgerError, PublicKey};

use crate::metrics::SharedMetrics;

/// Most directory blocks a single range request returns.
pub const MAX_DIRECTORY_RANGE: u32 = 100;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    /// Network name (mainnet, testnet, localnet).
    pub network: String,
    pub ledger: Arc<Ledger>,
    pub store: Arc<BlockStore<SledStore>>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/v1/directory-height", get(directory_height_handler))
        .route("/v1/directory-blocks", get(directory_blocks_handler))
        .route("/v1/directory-blocks/:hash", get(directory_block_handler))
        .route("/v1/entry-blocks", get(entry_block_by_key_mr_handler))
        .route("/v1/entry-blocks/:hash", get(entry_block_handler))
        .route(
            "/v1/entries",
            get(entries_by_ext_id_handler).post(submit_entry_handler),
        )
        .route("/v1/entries/:hash", get(entry_handler))
        .route("/v1/chains", get(chains_handler).post(create_chain_handler))
        .route("/v1/chains/:chain_id", get(chain_handler))
        .route("/v1/credit-balance/:public_key", get(credit_balance_handler))
        .route(
            "/v1/credit-entries",
            axum::routing::post(submit_credit_entry_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Generic error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler failure, mapped onto an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let msg = err.to_string();
        match err {
            LedgerError::TruncatedInput { .. }
            | LedgerError::UnknownEntryType(_)
            | LedgerError::PayloadTooLarge { .. }
            | LedgerError::InvalidHex(_) => ApiError::BadRequest(msg),
            LedgerError::UnknownChain(_) => ApiError::NotFound(msg),
            LedgerError::ChainAlreadyExists(_)
            | LedgerError::InvalidChainTransition(_)
            | LedgerError::BlockSealed
            | LedgerError::BlockNotSealed
            | LedgerError::NoOpenBlock
            | LedgerError::ReservedSlotMissing(_) => ApiError::Conflict(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(format!("storage error: {err}"))
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_digest(s: &str) -> Result<Digest, ApiError> {
    Ok(Digest::from_hex(s)?)
}

fn decode_hex(field: &str, s: &str) -> Result<Vec<u8>, ApiError> {
    hex::decode(s).map_err(|e| ApiError::BadRequest(format!("{field} is not valid hex: {e}")))
}

fn decode_hex_list(field: &str, items: &[String]) -> Result<Vec<Vec<u8>>, ApiError> {
    items.iter().map(|s| decode_hex(field, s)).collect()
}

// ---------------------------------------------------------------------------
// Request Types
// ---------------------------------------------------------------------------

/// Body of `POST /v1/chains`. The chain id is derived from `ext_ids`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChainRequest {
    /// Hex-encoded external ids.
    pub ext_ids: Vec<String>,
    /// Hex-encoded payload.
    #[serde(default)]
    pub data: String,
}

/// Body of `POST /v1/entries`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitEntryRequest {
    pub chain_id: String,
    #[serde(default)]
    pub ext_ids: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// Body of `POST /v1/credit-entries`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCreditEntryRequest {
    /// Hex of the credit entry's binary encoding, tag byte first.
    pub entry: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryRangeQuery {
    pub from: u32,
    pub to: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct KeyMerkleRootQuery {
    pub key_mr: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtIdQuery {
    /// Hex of the external id.
    pub ext_id: String,
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    /// Network id as `0x`-prefixed hex.
    pub network_id: String,
    pub server_index: u8,
    /// Height currently being built.
    pub directory_height: u32,
    /// Newest height persisted to the store.
    pub latest_sealed_height: Option<u32>,
    pub entry_chains: usize,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeightResponse {
    pub height: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryEntryView {
    pub chain_id: String,
    pub merkle_root: String,
}

/// Response payload for directory block lookups.
#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryBlockResponse {
    pub hash: String,
    pub key_merkle_root: String,
    pub height: u32,
    pub network_id: u32,
    pub body_merkle_root: String,
    pub prev_key_merkle_root: String,
    pub prev_block_hash: String,
    pub start_time: u64,
    pub entries: Vec<DirectoryEntryView>,
}

impl From<&DirectoryBlock> for DirectoryBlockResponse {
    fn from(block: &DirectoryBlock) -> Self {
        let header = block.header();
        Self {
            hash: block.hash().to_hex(),
            key_merkle_root: block.key_merkle_root().to_hex(),
            height: header.height,
            network_id: header.network_id,
            body_merkle_root: header.body_merkle_root.to_hex(),
            prev_key_merkle_root: header.prev_key_merkle_root.to_hex(),
            prev_block_hash: header.prev_block_hash.to_hex(),
            start_time: header.start_time,
            entries: block
                .entries()
                .iter()
                .map(|e| DirectoryEntryView {
                    chain_id: e.chain_id.to_hex(),
                    merkle_root: e.merkle_root.to_hex(),
                })
                .collect(),
        }
    }
}

/// Response payload for entry block lookups.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntryBlockResponse {
    pub hash: String,
    pub key_merkle_root: String,
    pub chain_id: String,
    pub height: u32,
    pub directory_height: u32,
    pub body_merkle_root: String,
    pub prev_key_merkle_root: String,
    pub prev_hash: String,
    pub start_time: u64,
    /// Entry hashes and minute markers, in order.
    pub entries: Vec<String>,
}

impl From<&EntryBlock> for EntryBlockResponse {
    fn from(block: &EntryBlock) -> Self {
        let header = block.header();
        Self {
            hash: block.hash().to_hex(),
            key_merkle_root: block.key_merkle_root().to_hex(),
            chain_id: header.chain_id.to_hex(),
            height: header.height,
            directory_height: header.directory_height,
            body_merkle_root: header.body_merkle_root.to_hex(),
            prev_key_merkle_root: header.prev_key_merkle_root.to_hex(),
            prev_hash: header.prev_hash.to_hex(),
            start_time: header.start_time,
            entries: block.entries().iter().map(Digest::to_hex).collect(),
        }
    }
}

/// Response payload for `GET /v1/entries/:hash`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntryResponse {
    pub hash: String,
    pub chain_id: String,
    pub version: u8,
    pub ext_ids: Vec<String>,
    pub data: String,
}

impl From<&Entry> for EntryResponse {
    fn from(entry: &Entry) -> Self {
        Self {
            hash: entry.hash().to_hex(),
            chain_id: entry.chain_id().to_hex(),
            version: entry.version(),
            ext_ids: entry.ext_ids().iter().map(hex::encode).collect(),
            data: hex::encode(entry.data()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainsResponse {
    pub chains: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: String,
    pub key_merkle_root: String,
    pub height: u32,
}

/// Response payload for `GET /v1/chains/:chain_id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain_id: String,
    pub next_block_height: u32,
    pub tip: Option<BlockRef>,
    /// Digests in the block under construction, if one is open.
    pub open_block_entries: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreditBalanceResponse {
    pub public_key: String,
    pub balance: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryAccepted {
    pub chain_id: String,
    pub entry_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreditEntryAccepted {
    pub hash: String,
    pub tag: u8,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: node status summary.
async fn status_handler(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let latest_sealed_height = state.store.latest_directory_height()?;
    Ok(Json(StatusResponse {
        version: state.version.clone(),
        network: state.network.clone(),
        network_id: format!("{:#010x}", state.ledger.network_id()),
        server_index: state.ledger.server_index(),
        directory_height: state.ledger.height(),
        latest_sealed_height,
        entry_chains: state.ledger.entry_chain_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /v1/directory-height`: newest persisted directory height.
async fn directory_height_handler(State(state): State<AppState>) -> ApiResult<HeightResponse> {
    match state.store.latest_directory_height()? {
        Some(height) => Ok(Json(HeightResponse { height })),
        None => Err(ApiError::NotFound(
            "no directory block has been sealed yet".into(),
        )),
    }
}

async fn directory_block_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<DirectoryBlockResponse> {
    let digest = parse_digest(&hash)?;
    match state.store.fetch_directory_block_by_hash(&digest)? {
        Some(block) => Ok(Json(DirectoryBlockResponse::from(&block))),
        None => Err(ApiError::NotFound(format!(
            "directory block not found: {hash}"
        ))),
    }
}

/// `GET /v1/directory-blocks?from=&to=`: at most [`MAX_DIRECTORY_RANGE`]
/// blocks, ascending.
async fn directory_blocks_handler(
    Query(range): Query<DirectoryRangeQuery>,
    State(state): State<AppState>,
) -> ApiResult<Vec<DirectoryBlockResponse>> {
    let limit = range.from.saturating_add(MAX_DIRECTORY_RANGE);
    let to = range.to.unwrap_or(limit).min(limit);
    if to < range.from {
        return Err(ApiError::BadRequest(format!(
            "range end {to} is below start {}",
            range.from
        )));
    }
    let blocks = state.store.fetch_directory_blocks(range.from, to)?;
    Ok(Json(blocks.iter().map(DirectoryBlockResponse::from).collect()))
}

async fn entry_block_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<EntryBlockResponse> {
    let digest = parse_digest(&hash)?;
    match state.store.fetch_entry_block_by_hash(&digest)? {
        Some(block) => Ok(Json(EntryBlockResponse::from(&block))),
        None => Err(ApiError::NotFound(format!("entry block not found: {hash}"))),
    }
}

async fn entry_block_by_key_mr_handler(
    Query(query): Query<KeyMerkleRootQuery>,
    State(state): State<AppState>,
) -> ApiResult<EntryBlockResponse> {
    let key_mr = parse_digest(&query.key_mr)?;
    match state.store.fetch_entry_block_by_key_mr(&key_mr)? {
        Some(block) => Ok(Json(EntryBlockResponse::from(&block))),
        None => Err(ApiError::NotFound(format!(
            "entry block not found for key-Merkle-root {}",
            query.key_mr
        ))),
    }
}

/// `GET /v1/entries/:hash`: only entries of sealed heights are stored.
async fn entry_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<EntryResponse> {
    let digest = parse_digest(&hash)?;
    match state.store.fetch_entry_by_hash(&digest)? {
        Some(entry) => Ok(Json(EntryResponse::from(&entry))),
        None => Err(ApiError::NotFound(format!("entry not found: {hash}"))),
    }
}

/// `GET /v1/entries?ext_id=`: sealed entries carrying the external id,
/// ordered by entry hash. An unknown id gives an empty list.
async fn entries_by_ext_id_handler(
    Query(query): Query<ExtIdQuery>,
    State(state): State<AppState>,
) -> ApiResult<Vec<EntryResponse>> {
    let ext_id = decode_hex("ext_id", &query.ext_id)?;
    let entries = state.store.fetch_entries_by_ext_id(&ext_id)?;
    Ok(Json(entries.iter().map(EntryResponse::from).collect()))
}

async fn chains_handler(State(state): State<AppState>) -> Json<ChainsResponse> {
    Json(ChainsResponse {
        chains: state.ledger.chain_ids().iter().map(Digest::to_hex).collect(),
    })
}

async fn chain_handler(
    Path(chain_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<ChainResponse> {
    let id = parse_digest(&chain_id)?;
    let chain = state
        .ledger
        .entry_chain(&id)
        .ok_or(LedgerError::UnknownChain(id))?;

    let tip = chain.tip().map(|block| BlockRef {
        hash: block.hash().to_hex(),
        key_merkle_root: block.key_merkle_root().to_hex(),
        height: block.height(),
    });
    Ok(Json(ChainResponse {
        chain_id: id.to_hex(),
        next_block_height: chain.next_block_height(),
        tip,
        open_block_entries: chain.peek_open(|block| block.len()),
    }))
}

async fn credit_balance_handler(
    Path(public_key): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<CreditBalanceResponse> {
    let key = PublicKey::from_hex(&public_key)?;
    Ok(Json(CreditBalanceResponse {
        public_key: key.to_hex(),
        balance: state.ledger.credit_balance(&key),
    }))
}

/// `POST /v1/chains`: the chain id is `chain_id_from_name(ext_ids)`.
async fn create_chain_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateChainRequest>,
) -> ApiResult<EntryAccepted> {
    let ext_ids = decode_hex_list("ext_ids", &req.ext_ids)?;
    if ext_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "a chain is named by its ext ids; at least one is required".into(),
        ));
    }
    let data = decode_hex("data", &req.data)?;
    let chain_id = chain_id_from_name(&ext_ids);
    let entry = Entry::new(chain_id, ext_ids, data)?;
    let entry_hash = entry.hash();

    state.ledger.create_chain(entry)?;
    state.metrics.entries_submitted_total.inc();
    state
        .metrics
        .entry_chains
        .set(state.ledger.entry_chain_count() as i64);

    Ok(Json(EntryAccepted {
        chain_id: chain_id.to_hex(),
        entry_hash: entry_hash.to_hex(),
    }))
}

async fn submit_entry_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitEntryRequest>,
) -> ApiResult<EntryAccepted> {
    let chain_id = parse_digest(&req.chain_id)?;
    let ext_ids = decode_hex_list("ext_ids", &req.ext_ids)?;
    let data = decode_hex("data", &req.data)?;
    let entry = Entry::new(chain_id, ext_ids, data)?;

    let entry_hash = state.ledger.submit_entry(entry)?;
    state.metrics.entries_submitted_total.inc();

    Ok(Json(EntryAccepted {
        chain_id: chain_id.to_hex(),
        entry_hash: entry_hash.to_hex(),
    }))
}

/// `POST /v1/credit-entries`: decoded with the ledger's own codec; the
/// body must hold exactly one entry. Server-index and end-of-minute markers
/// are written by the ledger alone.
async fn submit_credit_entry_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitCreditEntryRequest>,
) -> ApiResult<CreditEntryAccepted> {
    let bytes = decode_hex("entry", &req.entry)?;
    let (entry, rest) = CreditEntry::decode(&bytes)?;
    if !rest.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "{} trailing bytes after credit entry",
            rest.len()
        )));
    }
    if matches!(
        entry,
        CreditEntry::ServerIndex { .. } | CreditEntry::EndOfMinute { .. }
    ) {
        return Err(ApiError::BadRequest(format!(
            "credit entry tag {} is reserved for the ledger",
            entry.tag()
        )));
    }
    let accepted = CreditEntryAccepted {
        hash: entry.hash().to_hex(),
        tag: entry.tag(),
    };

    state.ledger.submit_credit_entry(entry)?;
    state.metrics.credit_entries_total.inc();
    Ok(Json(accepted))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

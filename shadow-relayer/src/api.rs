//! HTTP surface: status, deposits, membership paths and withdrawals.

use std::{collections::BTreeMap, str::FromStr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use shadow_accumulator::{
    abbreviate_field, format_field, parse_field, parse_field_json, AccumulatorError, Fr,
};
use solana_sdk::pubkey::Pubkey;
use uuid::Uuid;

use crate::{
    delay::{draw_hop_count, format_delay, schedule_delay, DelayReason},
    gate::{GateRejection, ProofGate},
    pool::{lamports_to_sol, PoolError, PoolId, PoolRegistry, DEFAULT_POOL_ID},
    queue::{now_millis, Withdrawal, WithdrawalStatus, WithdrawalStore},
    relayers::RelayerPool,
    replay::ReplayGuard,
};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

const CODE_MISSING_FIELDS: &str = "MISSING_FIELDS";
const CODE_INVALID_BODY: &str = "BODY_INVALID";
const CODE_INVALID_COMMITMENT: &str = "COMMITMENT_INVALID";
const CODE_INVALID_SIGNALS: &str = "PUBLIC_INPUTS_INVALID";
const CODE_INVALID_RECIPIENT: &str = "RECIPIENT_INVALID";
const CODE_POOL_UNKNOWN: &str = "POOL_UNKNOWN";
const CODE_TREE_FULL: &str = "TREE_FULL";
const CODE_COMMITMENT_NOT_FOUND: &str = "COMMITMENT_NOT_FOUND";
const CODE_ROOT_UNKNOWN: &str = "ROOT_UNKNOWN";
const CODE_NULLIFIER_REPLAY: &str = "NULLIFIER_REPLAY";
const CODE_PROOF_INVALID: &str = "PROOF_INVALID";
const CODE_NO_RELAYERS: &str = "RELAYERS_UNAVAILABLE";
const CODE_NOT_FOUND: &str = "NOT_FOUND";
const CODE_INTERNAL: &str = "INTERNAL_SERVER_ERROR";

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pools: Arc<PoolRegistry>,
    relayers: RelayerPool,
    store: WithdrawalStore,
    replay: ReplayGuard,
    gate: ProofGate,
}

impl AppState {
    pub fn new(
        pools: Arc<PoolRegistry>,
        relayers: RelayerPool,
        store: WithdrawalStore,
        replay: ReplayGuard,
        gate: ProofGate,
    ) -> Self {
        Self {
            pools,
            relayers,
            store,
            replay,
            gate,
        }
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn store(&self) -> &WithdrawalStore {
        &self.store
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/deposit", post(deposit_handler))
        .route(
            "/merkle-proof/:pool_id/:commitment",
            get(merkle_proof_handler),
        )
        .route("/withdraw", post(withdraw_handler))
        .route("/withdraw/:id", get(withdrawal_status_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    fn internal(err: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, err)
    }

    fn missing_fields() -> Self {
        Self::bad_request(CODE_MISSING_FIELDS, "Missing fields")
    }

    fn unknown_pool() -> Self {
        Self::bad_request(CODE_POOL_UNKNOWN, "Unknown pool")
    }

    fn no_relayers() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            CODE_NO_RELAYERS,
            "No relayers available",
        )
    }
}

impl From<GateRejection> for ApiError {
    fn from(rejection: GateRejection) -> Self {
        let code = match rejection {
            GateRejection::UnknownRoot => CODE_ROOT_UNKNOWN,
            GateRejection::NullifierUsed => CODE_NULLIFIER_REPLAY,
            GateRejection::InvalidProof => CODE_PROOF_INVALID,
        };
        Self::bad_request(code, rejection.to_string())
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::UnknownPool(_) => Self::unknown_pool(),
            PoolError::Accumulator(AccumulatorError::TreeFull { capacity }) => Self::bad_request(
                CODE_TREE_FULL,
                format!("Pool is full ({} deposits)", capacity),
            ),
            other => {
                tracing::error!("accumulator failure: {}", other);
                Self::internal(other.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Unwraps a JSON body. A request without a JSON content type reads as an
/// empty object, so it fails field validation like an empty form would.
fn json_body(body: Result<Json<JsonValue>, JsonRejection>) -> Result<JsonValue, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(JsonValue::Object(Default::default())),
        Err(rejection) => Err(ApiError::new(
            rejection.status(),
            CODE_INVALID_BODY,
            rejection.body_text(),
        )),
    }
}

/// Pool id from a request body: a number or numeric string, absent means the default pool.
fn pool_id_from_body(body: &JsonValue) -> Result<PoolId, ApiError> {
    match body.get("poolId") {
        None | Some(JsonValue::Null) => Ok(DEFAULT_POOL_ID),
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .and_then(|v| PoolId::try_from(v).ok())
            .ok_or_else(ApiError::unknown_pool),
        Some(JsonValue::String(s)) => s.trim().parse().map_err(|_| ApiError::unknown_pool()),
        Some(_) => Err(ApiError::unknown_pool()),
    }
}

/// Falsy values count as absent: `null`, `false`, `0` and blank strings.
fn is_missing(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) | Some(JsonValue::Bool(false)) => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        Some(JsonValue::Number(n)) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

#[derive(Serialize)]
struct PoolStatus {
    deposits: usize,
    denomination: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: &'static str,
    status: &'static str,
    relayer_count: usize,
    zk_enabled: bool,
    merkle_enabled: bool,
    multi_hop: bool,
    pools: BTreeMap<String, PoolStatus>,
    pending_withdrawals: usize,
    total_completed: u64,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let pools = state
        .pools
        .pools()
        .map(|pool| {
            (
                pool.id.to_string(),
                PoolStatus {
                    deposits: state.pools.deposit_count(pool.id),
                    denomination: pool.denomination_label(),
                },
            )
        })
        .collect();

    Json(StatusResponse {
        version: SERVICE_VERSION,
        status: "online",
        relayer_count: state.relayers.len(),
        zk_enabled: true,
        merkle_enabled: true,
        multi_hop: true,
        pools,
        pending_withdrawals: state.store.pending_count(),
        total_completed: state.store.total_completed(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DepositResponse {
    success: bool,
    index: usize,
    root: String,
    total_deposits: usize,
}

async fn deposit_handler(
    State(state): State<AppState>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<DepositResponse>, ApiError> {
    let body = json_body(body)?;
    let raw_commitment = body.get("commitment");
    if is_missing(raw_commitment) {
        return Err(ApiError::bad_request(
            CODE_MISSING_FIELDS,
            "Missing commitment",
        ));
    }
    let pool_id = pool_id_from_body(&body)?;
    let commitment = raw_commitment
        .map(parse_field_json)
        .transpose()
        .map_err(|err| {
            ApiError::bad_request(CODE_INVALID_COMMITMENT, format!("Invalid commitment: {}", err))
        })?
        .ok_or_else(ApiError::missing_fields)?;

    let receipt = state.pools.deposit(pool_id, commitment)?;
    let root = format_field(&receipt.root);
    tracing::info!(
        pool = pool_id,
        index = receipt.index,
        "deposit registered, new root {}",
        abbreviate_field(&receipt.root)
    );

    Ok(Json(DepositResponse {
        success: true,
        index: receipt.index,
        root,
        total_deposits: receipt.total_deposits,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MerkleProofResponse {
    root: String,
    path_elements: Vec<String>,
    path_indices: Vec<u8>,
}

async fn merkle_proof_handler(
    State(state): State<AppState>,
    Path((pool_id, commitment)): Path<(String, String)>,
) -> Result<Json<MerkleProofResponse>, ApiError> {
    let pool_id: PoolId = pool_id
        .trim()
        .parse()
        .map_err(|_| ApiError::not_found(CODE_POOL_UNKNOWN, "Unknown pool"))?;
    if state.pools.get(pool_id).is_none() {
        return Err(ApiError::not_found(CODE_POOL_UNKNOWN, "Unknown pool"));
    }
    let commitment = parse_field(&commitment).map_err(|err| {
        ApiError::bad_request(CODE_INVALID_COMMITMENT, format!("Invalid commitment: {}", err))
    })?;

    let path = state
        .pools
        .merkle_path(pool_id, &commitment)?
        .ok_or_else(|| ApiError::not_found(CODE_COMMITMENT_NOT_FOUND, "Commitment not found"))?;

    Ok(Json(MerkleProofResponse {
        root: format_field(&path.root),
        path_elements: path.proof.siblings.iter().map(format_field).collect(),
        path_indices: path.proof.path_indices(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawResponse {
    success: bool,
    id: Uuid,
    status: WithdrawalStatus,
    amount: f64,
    num_hops: usize,
    delay: u64,
    delay_formatted: String,
    delay_reason: DelayReason,
    relayer_id: usize,
    zk_verified: bool,
    execute_at: u64,
}

struct WithdrawRequest {
    pool_id: PoolId,
    proof: JsonValue,
    public_signals: Vec<Fr>,
    recipient: Pubkey,
}

fn parse_withdraw_request(body: JsonValue) -> Result<WithdrawRequest, ApiError> {
    let pool_id = pool_id_from_body(&body)?;

    let proof = body.get("proof").filter(|p| !p.is_null());
    let signals = body
        .get("publicSignals")
        .and_then(JsonValue::as_array)
        .filter(|signals| signals.len() >= 2);
    let recipient = body
        .get("recipientAddress")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|addr| !addr.is_empty());
    let (Some(proof), Some(signals), Some(recipient)) = (proof, signals, recipient) else {
        return Err(ApiError::missing_fields());
    };

    let public_signals = signals
        .iter()
        .map(parse_field_json)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            ApiError::bad_request(CODE_INVALID_SIGNALS, format!("Invalid public signals: {}", err))
        })?;
    let recipient = Pubkey::from_str(recipient)
        .map_err(|_| ApiError::bad_request(CODE_INVALID_RECIPIENT, "Invalid recipient address"))?;

    Ok(WithdrawRequest {
        pool_id,
        proof: proof.clone(),
        public_signals,
        recipient,
    })
}

async fn withdraw_handler(
    State(state): State<AppState>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let request = parse_withdraw_request(json_body(body)?)?;
    let pool = state
        .pools
        .get(request.pool_id)
        .cloned()
        .ok_or_else(ApiError::unknown_pool)?;
    if state.relayers.is_empty() {
        return Err(ApiError::no_relayers());
    }
    tracing::info!(
        pool = pool.id,
        "withdraw request for {} ({} lamports)",
        request.recipient,
        pool.denomination
    );

    let verified = state
        .gate
        .check(pool.id, request.proof, request.public_signals)
        .await?;

    let (decision, primary, num_hops) = {
        let mut rng = rand::thread_rng();
        let decision = schedule_delay(state.pools.deposit_count(pool.id), &mut rng);
        let primary = state.relayers.choose_primary(&mut rng);
        let num_hops = draw_hop_count(state.relayers.len(), &mut rng);
        (decision, primary, num_hops)
    };
    let Some(primary) = primary else {
        state.replay.release(&verified.nullifier_hash);
        return Err(ApiError::no_relayers());
    };

    let now = now_millis();
    let delay_ms = decision.delay.as_millis() as u64;
    let withdrawal = Withdrawal {
        id: Uuid::new_v4(),
        pool_id: pool.id,
        nullifier_hash: verified.nullifier_hash,
        root: verified.root,
        final_address: request.recipient,
        amount: pool.denomination,
        num_hops,
        relayer_id: primary.id,
        hop_relayer_ids: Vec::new(),
        delay: decision.delay,
        delay_reason: decision.reason,
        created_at_ms: now,
        execute_at_ms: now + delay_ms,
        status: WithdrawalStatus::Pending,
        completed_at_ms: None,
        final_signature: None,
        error: None,
    };

    let delay_formatted = format_delay(decision.delay);
    tracing::info!(
        pool = pool.id,
        "withdrawal {} scheduled: relayer #{}, {} hops, delay {} ({})",
        withdrawal.short_id(),
        primary.id,
        num_hops,
        delay_formatted,
        decision.reason
    );

    let response = WithdrawResponse {
        success: true,
        id: withdrawal.id,
        status: WithdrawalStatus::Pending,
        amount: pool.denomination_sol(),
        num_hops,
        delay: delay_ms,
        delay_formatted,
        delay_reason: decision.reason,
        relayer_id: primary.id,
        zk_verified: true,
        execute_at: withdrawal.execute_at_ms,
    };
    state.store.insert(withdrawal);
    Ok(Json(response))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalStatusResponse {
    id: Uuid,
    status: WithdrawalStatus,
    amount: f64,
    num_hops: usize,
    zk_verified: bool,
    delay_reason: DelayReason,
    time_remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn withdrawal_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawalStatusResponse>, ApiError> {
    let not_found = || ApiError::not_found(CODE_NOT_FOUND, "Not found");
    let id = Uuid::parse_str(id.trim()).map_err(|_| not_found())?;
    let withdrawal = state.store.find(&id).ok_or_else(not_found)?;

    Ok(Json(WithdrawalStatusResponse {
        id: withdrawal.id,
        status: withdrawal.status,
        amount: lamports_to_sol(withdrawal.amount),
        num_hops: withdrawal.num_hops,
        zk_verified: true,
        delay_reason: withdrawal.delay_reason,
        time_remaining: withdrawal.time_remaining_ms(now_millis()),
        completed_at: withdrawal.completed_at_ms,
        final_signature: withdrawal.final_signature,
        error: withdrawal.error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pool_id_accepts_numbers_and_strings() {
        assert_eq!(pool_id_from_body(&json!({})).unwrap(), DEFAULT_POOL_ID);
        assert_eq!(pool_id_from_body(&json!({"poolId": null})).unwrap(), 1);
        assert_eq!(pool_id_from_body(&json!({"poolId": 2})).unwrap(), 2);
        assert_eq!(pool_id_from_body(&json!({"poolId": "0"})).unwrap(), 0);
        assert!(pool_id_from_body(&json!({"poolId": 300})).is_err());
        assert!(pool_id_from_body(&json!({"poolId": "big"})).is_err());
        assert!(pool_id_from_body(&json!({"poolId": [1]})).is_err());
    }

    #[test]
    fn withdraw_request_requires_all_fields() {
        let recipient = Pubkey::new_unique().to_string();
        let missing = [
            json!({"publicSignals": ["1", "2"], "recipientAddress": recipient}),
            json!({"proof": {}, "publicSignals": ["1"], "recipientAddress": recipient}),
            json!({"proof": {}, "publicSignals": ["1", "2"]}),
            json!({"proof": {}, "publicSignals": ["1", "2"], "recipientAddress": ""}),
        ];
        for body in missing {
            let err = parse_withdraw_request(body).err().unwrap();
            assert_eq!(err.code, CODE_MISSING_FIELDS);
        }

        let err = parse_withdraw_request(
            json!({"proof": {}, "publicSignals": ["1", "x"], "recipientAddress": recipient}),
        )
        .err()
        .unwrap();
        assert_eq!(err.code, CODE_INVALID_SIGNALS);

        let err = parse_withdraw_request(
            json!({"proof": {}, "publicSignals": ["1", "2"], "recipientAddress": "nope"}),
        )
        .err()
        .unwrap();
        assert_eq!(err.code, CODE_INVALID_RECIPIENT);

        let ok = parse_withdraw_request(
            json!({"proof": {}, "publicSignals": ["1", 2, "0x3"], "recipientAddress": recipient}),
        )
        .unwrap();
        assert_eq!(ok.pool_id, DEFAULT_POOL_ID);
        assert_eq!(ok.public_signals, vec![Fr::from(1u64), Fr::from(2u64), Fr::from(3u64)]);
    }

    #[test]
    fn falsy_values_are_missing() {
        for value in [json!(null), json!(false), json!(0), json!(0.0), json!(" ")] {
            assert!(is_missing(Some(&value)), "{}", value);
        }
        assert!(is_missing(None));
        for value in [json!("0"), json!(1), json!(true), json!({})] {
            assert!(!is_missing(Some(&value)), "{}", value);
        }
    }

    #[test]
    fn gate_rejections_map_to_client_errors() {
        let err = ApiError::from(GateRejection::NullifierUsed);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Nullifier already used");
        assert_eq!(ApiError::from(GateRejection::UnknownRoot).message, "Unknown Merkle root");
        assert_eq!(ApiError::from(GateRejection::InvalidProof).message, "Invalid ZK proof");
    }
}

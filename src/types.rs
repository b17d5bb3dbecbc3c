//! Transaction data model shared by the sequencer, nonce reconciler and stores

use crate::error::{SubmitterError, SubmitterResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fee parameters of a transaction. The variant is the fee *shape* and is
/// preserved by every adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeeParams {
    #[serde(rename = "legacy", rename_all = "camelCase")]
    Legacy { gas_price: U256 },
    #[serde(rename = "eip1559", rename_all = "camelCase")]
    Dynamic {
        max_priority_fee_per_gas: U256,
        max_fee_per_gas: U256,
    },
}

impl FeeParams {
    pub fn shape(&self) -> &'static str {
        match self {
            FeeParams::Legacy { .. } => "legacy",
            FeeParams::Dynamic { .. } => "eip1559",
        }
    }
}

/// Fee fields as they arrive on an untyped request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeFields {
    pub gas_price: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
}

impl FeeFields {
    pub fn is_empty(&self) -> bool {
        self.gas_price.is_none()
            && self.max_priority_fee_per_gas.is_none()
            && self.max_fee_per_gas.is_none()
    }
}

impl TryFrom<FeeFields> for FeeParams {
    type Error = SubmitterError;

    fn try_from(fields: FeeFields) -> SubmitterResult<Self> {
        match (
            fields.gas_price,
            fields.max_priority_fee_per_gas,
            fields.max_fee_per_gas,
        ) {
            (Some(gas_price), None, None) => Ok(FeeParams::Legacy { gas_price }),
            (None, Some(max_priority_fee_per_gas), Some(max_fee_per_gas)) => {
                Ok(FeeParams::Dynamic {
                    max_priority_fee_per_gas,
                    max_fee_per_gas,
                })
            }
            (gas_price, priority, max_fee) => Err(SubmitterError::UnsupportedFeeShape(format!(
                "gasPrice={}, maxPriorityFeePerGas={}, maxFeePerGas={}",
                gas_price.is_some(),
                priority.is_some(),
                max_fee.is_some()
            ))),
        }
    }
}

impl From<FeeParams> for FeeFields {
    fn from(fee: FeeParams) -> Self {
        match fee {
            FeeParams::Legacy { gas_price } => FeeFields {
                gas_price: Some(gas_price),
                ..Default::default()
            },
            FeeParams::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } => FeeFields {
                gas_price: None,
                max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
                max_fee_per_gas: Some(max_fee_per_gas),
            },
        }
    }
}

/// A transaction to be submitted. Builder methods return a new value; a
/// request handed to a sink is never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub chain_id: Option<u64>,
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: Option<u64>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    pub fee: Option<FeeParams>,
    pub gas_limit: Option<U256>,
}

impl TxRequest {
    pub fn new(chain_id: u64, from: Address, to: Address) -> Self {
        Self {
            chain_id: Some(chain_id),
            from,
            to: Some(to),
            nonce: None,
            value: U256::zero(),
            data: Bytes::default(),
            fee: None,
            gas_limit: None,
        }
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        Self {
            nonce: Some(nonce),
            ..self
        }
    }

    pub fn with_fee(self, fee: FeeParams) -> Self {
        Self {
            fee: Some(fee),
            ..self
        }
    }

    pub fn with_gas_limit(self, gas_limit: U256) -> Self {
        Self {
            gas_limit: Some(gas_limit),
            ..self
        }
    }

    pub fn with_value(self, value: U256) -> Self {
        Self { value, ..self }
    }

    pub fn with_data(self, data: Bytes) -> Self {
        Self { data, ..self }
    }
}

/// Inbound request body with untyped fee fields
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequestBody {
    pub chain_id: Option<u64>,
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: Option<u64>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    #[serde(flatten)]
    pub fee: FeeFields,
    pub gas_limit: Option<U256>,
}

impl TryFrom<TxRequestBody> for TxRequest {
    type Error = SubmitterError;

    fn try_from(body: TxRequestBody) -> SubmitterResult<Self> {
        // No fee fields at all means "let the sink price it"
        let fee = if body.fee.is_empty() {
            None
        } else {
            Some(FeeParams::try_from(body.fee)?)
        };

        Ok(TxRequest {
            chain_id: body.chain_id,
            from: body.from,
            to: body.to,
            nonce: body.nonce,
            value: body.value,
            data: body.data,
            fee,
            gas_limit: body.gas_limit,
        })
    }
}

/// Lifecycle of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Unknown,
}

impl TransactionStatus {
    /// Status only moves forward: nothing returns to Pending and the
    /// finalized states are terminal.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Failed | Unknown) | (Unknown, Confirmed | Failed)
        )
    }

    pub fn is_finalized(self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = SubmitterError;

    fn from_str(s: &str) -> SubmitterResult<Self> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "confirmed" => Ok(TransactionStatus::Confirmed),
            "failed" => Ok(TransactionStatus::Failed),
            "unknown" => Ok(TransactionStatus::Unknown),
            other => Err(SubmitterError::Internal(format!(
                "unknown transaction status {other}"
            ))),
        }
    }
}

/// Relay pool a transaction is broadcast through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionChannel {
    #[default]
    Public,
    Private,
}

impl SubmissionChannel {
    pub fn from_private_flag(private: bool) -> Self {
        if private {
            SubmissionChannel::Private
        } else {
            SubmissionChannel::Public
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionChannel::Public => "public",
            SubmissionChannel::Private => "private",
        }
    }
}

impl fmt::Display for SubmissionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionChannel {
    type Err = SubmitterError;

    fn from_str(s: &str) -> SubmitterResult<Self> {
        match s {
            "public" => Ok(SubmissionChannel::Public),
            "private" => Ok(SubmissionChannel::Private),
            other => Err(SubmitterError::Internal(format!("unknown channel {other}"))),
        }
    }
}

/// How a transaction was handed to the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestFormat {
    /// Ordinary signed EVM transaction
    #[default]
    Classic,
    /// Off-chain order filled by the private relay
    RelayOrder,
}

impl RequestFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestFormat::Classic => "classic",
            RequestFormat::RelayOrder => "relayOrder",
        }
    }
}

impl FromStr for RequestFormat {
    type Err = SubmitterError;

    fn from_str(s: &str) -> SubmitterResult<Self> {
        match s {
            "classic" => Ok(RequestFormat::Classic),
            "relayOrder" => Ok(RequestFormat::RelayOrder),
            other => Err(SubmitterError::Internal(format!("unknown format {other}"))),
        }
    }
}

/// Coarse transaction category, used in errors and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Approve,
    Swap,
    Cancel,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Approve => "approve",
            TransactionKind::Swap => "swap",
            TransactionKind::Cancel => "cancel",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type metadata attached to every submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransactionTypeInfo {
    #[serde(rename_all = "camelCase")]
    Approve {
        token_address: Address,
        spender: Address,
    },
    #[serde(rename_all = "camelCase")]
    Swap {
        input_currency_id: String,
        output_currency_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Cancel { replaced_id: Uuid },
}

impl TransactionTypeInfo {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionTypeInfo::Approve { .. } => TransactionKind::Approve,
            TransactionTypeInfo::Swap { .. } => TransactionKind::Swap,
            TransactionTypeInfo::Cancel { .. } => TransactionKind::Cancel,
        }
    }
}

/// Signing account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

/// Analytics properties carried along a submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalyticsContext(BTreeMap<String, serde_json::Value>);

impl AnalyticsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

impl fmt::Display for AnalyticsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// A submitted transaction tracked until it is finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransactionRecord {
    pub id: Uuid,
    pub chain_id: u64,
    pub from: Address,
    pub nonce: Option<u64>,
    pub status: TransactionStatus,
    pub channel: SubmissionChannel,
    pub format: RequestFormat,
    pub type_info: TransactionTypeInfo,
    pub request: TxRequest,
    pub tx_hash: Option<H256>,
    pub added_at: DateTime<Utc>,
}

impl PendingTransactionRecord {
    /// Whether this record occupies a nonce the public node cannot see
    pub fn is_private_in_flight(&self, chain_id: u64) -> bool {
        self.chain_id == chain_id
            && self.status == TransactionStatus::Pending
            && self.format == RequestFormat::Classic
            && self.channel == SubmissionChannel::Private
    }
}

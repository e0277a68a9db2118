//! # EVM JSON-RPC Registry Adapter
//!
//! Drives a certificate registry contract on an EVM-compatible chain.
//!
//! ## How It Works
//!
//! 1. Writes call the contract via `eth_sendTransaction`. The JSON-RPC
//!    endpoint signs on behalf of the `from` address, which is the signer
//!    principal of the write; this adapter holds no keys.
//! 2. Status checks use `eth_getTransactionReceipt` and compare the current
//!    block height against the receipt's block. A `0x0` receipt status is a
//!    revert; the reason is recovered by replaying the call with `eth_call`
//!    at the receipt's block.
//! 3. Reads use `eth_call` against the latest block.
//!
//! ## Contract Interface
//!
//! ```solidity
//! function issueCertificate(string certificateId, string farmerId, string farmerName,
//!                           bytes32 identityHash, bytes32 eligibilityHash) external;
//! function revokeCertificate(string certificateId, string reason) external;
//! function transferAdmin(address newAdmin) external;
//! function getCertificate(string certificateId) external view returns (
//!     string farmerId, string farmerName, bytes32 identityHash, bytes32 eligibilityHash,
//!     uint256 issuedAt, uint256 expiresAt, bool revoked, string revocationReason, address issuer);
//! function latestCertificateOf(string farmerId) external view returns (string certificateId);
//! function admin() external view returns (address);
//! ```
//!
//! `getCertificate` returns `issuedAt == 0` for unknown ids and
//! `latestCertificateOf` returns the empty string for farmers without one.

use async_trait::async_trait;
use farmcert_core::{CertificateId, ContentDigest, FarmerId, PrincipalId, Timestamp};
use farmcert_registry::{Certificate, CertificateStatus};
use sha3::{Digest, Keccak256};

use super::{Ledger, LedgerError, LedgerOp, LedgerQuery, LedgerReadResult, PollStatus, Revert, TxRef};

const ISSUE_SIG: &str = "issueCertificate(string,string,string,bytes32,bytes32)";
const REVOKE_SIG: &str = "revokeCertificate(string,string)";
const TRANSFER_ADMIN_SIG: &str = "transferAdmin(address)";
const GET_CERTIFICATE_SIG: &str = "getCertificate(string)";
const LATEST_OF_SIG: &str = "latestCertificateOf(string)";
const ADMIN_SIG: &str = "admin()";

/// Selector of Solidity's `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Configuration for the EVM registry adapter.
#[derive(Debug, Clone)]
pub struct EvmLedgerConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Registry contract address (0x-prefixed, 40 hex chars).
    pub contract_address: String,
    /// Human-readable chain name for logs.
    pub chain_name: String,
    /// EVM chain id.
    pub chain_id: u64,
    /// Block confirmations before a write counts as confirmed.
    pub confirmations: u64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl EvmLedgerConfig {
    /// Configuration with 1 confirmation and a 30s request timeout.
    pub fn new(
        rpc_url: impl Into<String>,
        contract_address: impl Into<String>,
        chain_name: impl Into<String>,
        chain_id: u64,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract_address: contract_address.into(),
            chain_name: chain_name.into(),
            chain_id,
            confirmations: 1,
            timeout_secs: 30,
        }
    }

    /// Set the confirmation depth.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }
}

/// Certificate registry contract on an EVM chain.
#[derive(Debug)]
pub struct EvmLedger {
    client: reqwest::Client,
    config: EvmLedgerConfig,
}

impl EvmLedger {
    /// Create the adapter, validating the contract address.
    pub fn new(config: EvmLedgerConfig) -> Result<Self, LedgerError> {
        if !is_valid_eth_address(&config.contract_address) {
            return Err(LedgerError::Rejected(format!(
                "invalid contract address: {}",
                config.contract_address
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::ChainUnavailable {
                ledger: config.chain_name.clone(),
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn unavailable(&self, detail: impl Into<String>) -> LedgerError {
        LedgerError::ChainUnavailable {
            ledger: self.config.chain_name.clone(),
            detail: detail.into(),
        }
    }

    /// Send a JSON-RPC request and return the `result` field.
    ///
    /// JSON-RPC level errors come back as `Err(Ok(message))` so callers that
    /// expect them (revert replay) can tell them apart from transport failure.
    async fn rpc_call_raw(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, Result<String, LedgerError>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Err(if e.is_timeout() {
                    self.unavailable(format!("{method} timed out"))
                } else {
                    self.unavailable(format!("{method}: {e}"))
                })
            })?;

        if !resp.status().is_success() {
            return Err(Err(self.unavailable(format!("{method}: HTTP {}", resp.status()))));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Err(self.unavailable(format!("{method}: invalid JSON response: {e}"))))?;

        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            let data = error.get("data").and_then(|d| d.as_str()).and_then(decode_revert_data);
            return Err(Ok(data.unwrap_or_else(|| message.to_string())));
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| Err(self.unavailable(format!("{method}: response missing 'result'"))))
    }

    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, LedgerError> {
        self.rpc_call_raw(method, params).await.map_err(|e| match e {
            Ok(message) => LedgerError::Rejected(message),
            Err(err) => err,
        })
    }

    async fn eth_call(&self, data: String) -> Result<Vec<u8>, LedgerError> {
        let call = serde_json::json!({ "to": self.config.contract_address, "data": data });
        let result = self.rpc_call("eth_call", serde_json::json!([call, "latest"])).await?;
        result
            .as_str()
            .and_then(hex_decode)
            .ok_or_else(|| self.unavailable("eth_call returned non-hex result"))
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let value = self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
        value
            .as_str()
            .and_then(parse_quantity)
            .ok_or_else(|| self.unavailable("eth_blockNumber returned non-quantity"))
    }

    /// Replay a reverted transaction to learn why it reverted.
    async fn revert_reason(&self, tx: &TxRef, block: u64) -> Revert {
        let replay = async {
            let original = self
                .rpc_call("eth_getTransactionByHash", serde_json::json!([tx.as_str()]))
                .await
                .ok()?;
            let call = serde_json::json!({
                "from": original.get("from")?,
                "to": original.get("to")?,
                "data": original.get("input")?,
            });
            match self
                .rpc_call_raw("eth_call", serde_json::json!([call, format!("0x{block:x}")]))
                .await
            {
                Err(Ok(message)) => Some(message),
                _ => None,
            }
        };
        let message = replay
            .await
            .unwrap_or_else(|| format!("transaction reverted in block {block}"));
        Revert {
            code: classify_revert(&message).to_string(),
            message,
        }
    }

    fn decode_certificate(&self, id: &CertificateId, data: &[u8]) -> Result<Option<Certificate>, LedgerError> {
        let bad = |what: &str| self.unavailable(format!("malformed getCertificate result: {what}"));
        let issued_at = abi::read_u64(data, 4).ok_or_else(|| bad("issuedAt"))?;
        if issued_at == 0 {
            return Ok(None);
        }
        let farmer_id = abi::read_string(data, 0)
            .and_then(|s| FarmerId::new(s).ok())
            .ok_or_else(|| bad("farmerId"))?;
        let farmer_name = abi::read_string(data, 1).ok_or_else(|| bad("farmerName"))?;
        let identity_hash = abi::read_word(data, 2).map(ContentDigest::from_bytes).ok_or_else(|| bad("identityHash"))?;
        let eligibility_hash = abi::read_word(data, 3).map(ContentDigest::from_bytes).ok_or_else(|| bad("eligibilityHash"))?;
        let expires_at = abi::read_u64(data, 5).ok_or_else(|| bad("expiresAt"))?;
        let revoked = abi::read_u64(data, 6).ok_or_else(|| bad("revoked"))? != 0;
        let reason = abi::read_string(data, 7).ok_or_else(|| bad("revocationReason"))?;
        let issuer = abi::read_address(data, 8)
            .and_then(|a| PrincipalId::new(a).ok())
            .ok_or_else(|| bad("issuer"))?;
        let to_ts = |secs: u64, what: &str| {
            i64::try_from(secs)
                .ok()
                .and_then(Timestamp::from_unix_secs)
                .ok_or_else(|| bad(what))
        };

        Ok(Some(Certificate {
            certificate_id: id.clone(),
            farmer_id,
            farmer_name,
            identity_hash,
            eligibility_hash,
            issued_at: to_ts(issued_at, "issuedAt")?,
            expires_at: to_ts(expires_at, "expiresAt")?,
            status: if revoked { CertificateStatus::Revoked } else { CertificateStatus::Active },
            revocation_reason: revoked.then_some(reason),
            issuer,
        }))
    }

    async fn read_certificate(&self, id: &CertificateId) -> Result<Option<Certificate>, LedgerError> {
        let data = self
            .eth_call(abi::encode_call(GET_CERTIFICATE_SIG, &[abi::Token::Str(id.to_string())]))
            .await?;
        self.decode_certificate(id, &data)
    }
}

#[async_trait]
impl Ledger for EvmLedger {
    async fn submit_write(&self, op: &LedgerOp, signer: &PrincipalId) -> Result<TxRef, LedgerError> {
        if !is_valid_eth_address(signer.as_str()) {
            return Err(LedgerError::Rejected(format!("signer {signer} is not an EVM address")));
        }
        let data = encode_op(op)?;
        let tx = serde_json::json!({
            "from": signer.as_str(),
            "to": self.config.contract_address,
            "data": data,
            "chainId": format!("0x{:x}", self.config.chain_id),
        });
        let result = self.rpc_call("eth_sendTransaction", serde_json::json!([tx])).await?;
        result
            .as_str()
            .map(TxRef::new)
            .ok_or_else(|| self.unavailable("eth_sendTransaction returned non-string result"))
    }

    async fn poll_status(&self, tx: &TxRef) -> Result<PollStatus, LedgerError> {
        let receipt = self
            .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx.as_str()]))
            .await?;
        if receipt.is_null() {
            return Ok(PollStatus::Pending);
        }

        let tx_block = receipt
            .get("blockNumber")
            .and_then(|b| b.as_str())
            .and_then(parse_quantity)
            .unwrap_or(0);

        let status = receipt.get("status").and_then(|s| s.as_str()).unwrap_or("0x0");
        if status == "0x0" {
            return Ok(PollStatus::Reverted(self.revert_reason(tx, tx_block).await));
        }

        let current = self.block_number().await?;
        // A receipt in block N has one confirmation once N is the head.
        let confirmations = current.saturating_sub(tx_block) + 1;
        if confirmations >= self.config.confirmations {
            Ok(PollStatus::Confirmed { block: Some(tx_block) })
        } else {
            Ok(PollStatus::Pending)
        }
    }

    async fn read(&self, query: &LedgerQuery) -> Result<LedgerReadResult, LedgerError> {
        match query {
            LedgerQuery::CertificateById(id) => {
                Ok(LedgerReadResult::Certificate(self.read_certificate(id).await?))
            }
            LedgerQuery::LatestForSubject(farmer) => {
                let data = self
                    .eth_call(abi::encode_call(LATEST_OF_SIG, &[abi::Token::Str(farmer.to_string())]))
                    .await?;
                let latest = abi::read_string(&data, 0)
                    .ok_or_else(|| self.unavailable("malformed latestCertificateOf result"))?;
                if latest.is_empty() {
                    return Ok(LedgerReadResult::Certificate(None));
                }
                let id = CertificateId::new(latest)
                    .map_err(|e| self.unavailable(format!("contract returned {e}")))?;
                Ok(LedgerReadResult::Certificate(self.read_certificate(&id).await?))
            }
            LedgerQuery::Admin => {
                let data = self.eth_call(abi::encode_call(ADMIN_SIG, &[])).await?;
                let admin = abi::read_address(&data, 0)
                    .and_then(|a| PrincipalId::new(a).ok())
                    .ok_or_else(|| self.unavailable("malformed admin() result"))?;
                Ok(LedgerReadResult::Admin(admin))
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.chain_name
    }
}

/// Calldata for a registry write.
fn encode_op(op: &LedgerOp) -> Result<String, LedgerError> {
    use abi::Token;
    Ok(match op {
        LedgerOp::Issue(req) => abi::encode_call(
            ISSUE_SIG,
            &[
                Token::Str(req.certificate_id.to_string()),
                Token::Str(req.farmer_id.to_string()),
                Token::Str(req.farmer_name.clone()),
                Token::Bytes32(*req.identity_hash.as_bytes()),
                Token::Bytes32(*req.eligibility_hash.as_bytes()),
            ],
        ),
        LedgerOp::Revoke {
            certificate_id,
            reason,
        } => abi::encode_call(
            REVOKE_SIG,
            &[Token::Str(certificate_id.to_string()), Token::Str(reason.clone())],
        ),
        LedgerOp::TransferAdmin { new_admin } => {
            let address = parse_address(new_admin.as_str()).ok_or_else(|| {
                LedgerError::Rejected(format!("new admin {new_admin} is not an EVM address"))
            })?;
            abi::encode_call(TRANSFER_ADMIN_SIG, &[Token::Address(address)])
        }
    })
}

/// Map a contract revert message onto a registry error code.
fn classify_revert(message: &str) -> &'static str {
    let m = message.to_ascii_lowercase();
    if m.contains("only admin") || m.contains("unauthorized") || m.contains("not admin") {
        "UNAUTHORIZED"
    } else if m.contains("already revoked") {
        "ALREADY_REVOKED"
    } else if m.contains("already exists") || m.contains("already issued") {
        "ALREADY_EXISTS"
    } else if m.contains("not found") || m.contains("does not exist") {
        "NOT_FOUND"
    } else {
        "REVERTED"
    }
}

/// Extract the message from an `Error(string)` revert payload.
fn decode_revert_data(data: &str) -> Option<String> {
    let bytes = hex_decode(data)?;
    if bytes.len() < 4 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    abi::read_string(&bytes[4..], 0)
}

/// Validate that a string is a well-formed Ethereum address (0x + 40 hex chars).
fn is_valid_eth_address(addr: &str) -> bool {
    addr.len() == 42 && addr.starts_with("0x") && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_address(addr: &str) -> Option<[u8; 20]> {
    if !is_valid_eth_address(addr) {
        return None;
    }
    hex_decode(addr)?.try_into().ok()
}

fn parse_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Minimal Solidity ABI encoding for the registry's call shapes: static
/// `bytes32`/`address` words and dynamic `string`s.
mod abi {
    use super::{hex_encode, Digest, Keccak256};

    pub(super) enum Token {
        Str(String),
        Bytes32([u8; 32]),
        Address([u8; 20]),
    }

    pub(super) fn selector(signature: &str) -> [u8; 4] {
        let hash = Keccak256::digest(signature.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    fn u256_word(value: usize) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&(value as u64).to_be_bytes());
        word
    }

    /// Head/tail encoding of `tokens` without a selector.
    pub(super) fn encode_args(tokens: &[Token]) -> Vec<u8> {
        let head_len = tokens.len() * 32;
        let mut head = Vec::with_capacity(head_len);
        let mut tail = Vec::new();
        for token in tokens {
            match token {
                Token::Bytes32(bytes) => head.extend_from_slice(bytes),
                Token::Address(address) => {
                    head.extend_from_slice(&[0u8; 12]);
                    head.extend_from_slice(address);
                }
                Token::Str(s) => {
                    head.extend_from_slice(&u256_word(head_len + tail.len()));
                    tail.extend_from_slice(&u256_word(s.len()));
                    tail.extend_from_slice(s.as_bytes());
                    let padding = (32 - s.len() % 32) % 32;
                    tail.extend(std::iter::repeat(0u8).take(padding));
                }
            }
        }
        head.extend_from_slice(&tail);
        head
    }

    /// `0x`-prefixed calldata: selector followed by encoded arguments.
    pub(super) fn encode_call(signature: &str, tokens: &[Token]) -> String {
        let mut data = selector(signature).to_vec();
        data.extend_from_slice(&encode_args(tokens));
        format!("0x{}", hex_encode(&data))
    }

    pub(super) fn read_word(data: &[u8], index: usize) -> Option<[u8; 32]> {
        let start = index.checked_mul(32)?;
        data.get(start..start + 32)?.try_into().ok()
    }

    /// A word as an integer. Fails if it does not fit in `u64`.
    pub(super) fn read_u64(data: &[u8], index: usize) -> Option<u64> {
        let word = read_word(data, index)?;
        if word[..24].iter().any(|&b| b != 0) {
            return None;
        }
        Some(u64::from_be_bytes(word[24..].try_into().ok()?))
    }

    pub(super) fn read_address(data: &[u8], index: usize) -> Option<String> {
        let word = read_word(data, index)?;
        Some(format!("0x{}", hex_encode(&word[12..])))
    }

    /// The dynamic string whose offset sits in head slot `index`.
    pub(super) fn read_string(data: &[u8], index: usize) -> Option<String> {
        let offset = usize::try_from(read_u64(data, index)?).ok()?;
        let len_word: [u8; 32] = data.get(offset..offset + 32)?.try_into().ok()?;
        if len_word[..24].iter().any(|&b| b != 0) {
            return None;
        }
        let len = usize::try_from(u64::from_be_bytes(len_word[24..].try_into().ok()?)).ok()?;
        let bytes = data.get(offset + 32..offset + 32 + len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

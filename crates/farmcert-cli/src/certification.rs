//! # Certification Subcommands
//!
//! `verify`, `decide`, `revoke` and `stats` against a running API.
//!
//! Exit codes:
//!
//! | Code | `verify`                         | `decide` / `revoke`          |
//! |------|----------------------------------|------------------------------|
//! | 0    | valid                            | certified, rejected, confirmed |
//! | 1    | expired, revoked or not found    | failed (ledger reverted)     |
//! | 2    | ledger unavailable               | pending confirmation         |
//!
//! Transport errors and API errors other than these exit 1 through the
//! error path in `main`.

use anyhow::bail;
use clap::{ArgGroup, Args, ValueEnum};
use farmcert_core::{CertificateId, FarmerId};
use serde_json::{json, Value};

use crate::client::{ApiClient, ApiResponse};

/// Arguments for the `verify` subcommand.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["certificate", "farmer"])))]
pub struct VerifyArgs {
    /// Certificate identifier to verify.
    #[arg(long)]
    pub certificate: Option<String>,

    /// Verify the latest certificate of this farmer instead.
    #[arg(long)]
    pub farmer: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// Arguments for the `decide` subcommand.
#[derive(Args, Debug)]
pub struct DecideArgs {
    /// Farmer whose application is decided.
    pub farmer: String,

    #[arg(value_enum)]
    pub decision: Decision,

    #[arg(long)]
    pub remarks: Option<String>,

    /// Name to record on the certificate (approve only).
    #[arg(long)]
    pub farmer_name: Option<String>,

    /// Certificate id to issue under (approve only). Generated when absent.
    #[arg(long)]
    pub certificate_id: Option<String>,
}

/// Arguments for the `revoke` subcommand.
#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Certificate to revoke.
    pub certificate: String,

    /// Reason recorded on the certificate.
    #[arg(long)]
    pub reason: String,
}

/// Request path for a verification.
pub fn verify_path(args: &VerifyArgs) -> anyhow::Result<String> {
    match (&args.certificate, &args.farmer) {
        (Some(id), None) => Ok(format!("certifications/by-id/{}", CertificateId::new(id.as_str())?)),
        (None, Some(id)) => Ok(format!("certifications/by-subject/{}", FarmerId::new(id.as_str())?)),
        _ => bail!("exactly one of --certificate or --farmer is required"),
    }
}

/// Exit code for a verification report.
pub fn verification_exit_code(report: &Value) -> anyhow::Result<u8> {
    match report.get("status").and_then(Value::as_str) {
        Some("valid") => Ok(0),
        Some("expired" | "revoked" | "not_found") => Ok(1),
        Some("ledger_unavailable") => Ok(2),
        other => bail!("unexpected verification status {other:?}"),
    }
}

/// JSON body of a decide request.
pub fn decide_body(args: &DecideArgs) -> anyhow::Result<Value> {
    if args.decision == Decision::Reject && (args.farmer_name.is_some() || args.certificate_id.is_some()) {
        bail!("--farmer-name and --certificate-id apply to approvals only");
    }
    let mut body = json!({ "decision": args.decision.as_str() });
    if let Some(remarks) = &args.remarks {
        body["remarks"] = json!(remarks);
    }
    if let Some(name) = &args.farmer_name {
        body["farmerName"] = json!(name);
    }
    if let Some(id) = &args.certificate_id {
        body["certificateId"] = json!(CertificateId::new(id.as_str())?.as_str());
    }
    Ok(body)
}

/// Exit code for a decide response (`outcome` tag).
pub fn decision_exit_code(outcome: &Value) -> anyhow::Result<u8> {
    match outcome.get("outcome").and_then(Value::as_str) {
        Some("certified" | "rejected") => Ok(0),
        Some("failed") => Ok(1),
        Some("pending_confirmation") => Ok(2),
        other => bail!("unexpected decision outcome {other:?}"),
    }
}

/// Exit code for a write response (`state` field).
pub fn write_exit_code(outcome: &Value) -> anyhow::Result<u8> {
    match outcome.get("state").and_then(Value::as_str) {
        Some("confirmed") => Ok(0),
        Some("failed") => Ok(1),
        Some("pending_confirmation") => Ok(2),
        other => bail!("unexpected write state {other:?}"),
    }
}

fn print(resp: &ApiResponse) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&resp.body)?);
    Ok(())
}

fn require_success(resp: ApiResponse) -> anyhow::Result<ApiResponse> {
    if resp.is_success() {
        Ok(resp)
    } else {
        bail!(resp.error_message())
    }
}

/// Execute `verify`.
pub async fn run_verify(args: &VerifyArgs, client: &ApiClient) -> anyhow::Result<u8> {
    let resp = client.get(&verify_path(args)?).await?;
    // 404 and 503 still carry a report.
    if !matches!(resp.status, 200 | 404 | 503) {
        bail!(resp.error_message());
    }
    print(&resp)?;
    verification_exit_code(&resp.body)
}

/// Execute `decide`.
pub async fn run_decide(args: &DecideArgs, client: &ApiClient) -> anyhow::Result<u8> {
    let farmer = FarmerId::new(args.farmer.as_str())?;
    let body = decide_body(args)?;
    let resp = require_success(
        client
            .post(&format!("certifications/{farmer}/decide"), &body)
            .await?,
    )?;
    print(&resp)?;
    let code = decision_exit_code(&resp.body)?;
    if code == 2 {
        tracing::warn!(%farmer, "issuance not confirmed yet; check again with `verify --farmer {farmer}`");
    }
    Ok(code)
}

/// Execute `revoke`.
pub async fn run_revoke(args: &RevokeArgs, client: &ApiClient) -> anyhow::Result<u8> {
    let certificate = CertificateId::new(args.certificate.as_str())?;
    if args.reason.trim().is_empty() {
        bail!("--reason must not be empty");
    }
    let resp = require_success(
        client
            .post(
                &format!("certifications/by-id/{certificate}/revoke"),
                &json!({ "reason": args.reason }),
            )
            .await?,
    )?;
    print(&resp)?;
    write_exit_code(&resp.body)
}

/// Execute `stats`.
pub async fn run_stats(client: &ApiClient) -> anyhow::Result<u8> {
    let resp = require_success(client.get("certifications/stats").await?)?;
    print(&resp)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(decision: Decision) -> DecideArgs {
        DecideArgs {
            farmer: "F-42".into(),
            decision,
            remarks: None,
            farmer_name: None,
            certificate_id: None,
        }
    }

    #[test]
    fn verify_path_by_certificate_and_farmer() {
        let by_id = VerifyArgs {
            certificate: Some("CERT-1001".into()),
            farmer: None,
        };
        assert_eq!(verify_path(&by_id).unwrap(), "certifications/by-id/CERT-1001");

        let by_subject = VerifyArgs {
            certificate: None,
            farmer: Some("F-42".into()),
        };
        assert_eq!(verify_path(&by_subject).unwrap(), "certifications/by-subject/F-42");
    }

    #[test]
    fn verify_path_rejects_invalid_ids() {
        let args = VerifyArgs {
            certificate: Some(String::new()),
            farmer: None,
        };
        assert!(verify_path(&args).is_err());
    }

    #[test]
    fn verification_codes() {
        assert_eq!(verification_exit_code(&json!({"status": "valid"})).unwrap(), 0);
        assert_eq!(verification_exit_code(&json!({"status": "revoked"})).unwrap(), 1);
        assert_eq!(verification_exit_code(&json!({"status": "not_found"})).unwrap(), 1);
        assert_eq!(
            verification_exit_code(&json!({"status": "ledger_unavailable"})).unwrap(),
            2
        );
        assert!(verification_exit_code(&json!({})).is_err());
    }

    #[test]
    fn approve_body_carries_optional_fields() {
        let mut args = decide(Decision::Approve);
        args.farmer_name = Some("A. Farmer".into());
        args.certificate_id = Some("CERT-1001".into());
        let body = decide_body(&args).unwrap();
        assert_eq!(
            body,
            json!({"decision": "approve", "farmerName": "A. Farmer", "certificateId": "CERT-1001"})
        );
    }

    #[test]
    fn reject_body_refuses_approval_fields() {
        let mut args = decide(Decision::Reject);
        args.remarks = Some("blurry scan".into());
        assert_eq!(
            decide_body(&args).unwrap(),
            json!({"decision": "reject", "remarks": "blurry scan"})
        );

        args.certificate_id = Some("CERT-1".into());
        assert!(decide_body(&args).is_err());
    }

    #[test]
    fn decision_and_write_codes() {
        assert_eq!(decision_exit_code(&json!({"outcome": "certified"})).unwrap(), 0);
        assert_eq!(decision_exit_code(&json!({"outcome": "failed"})).unwrap(), 1);
        assert_eq!(
            decision_exit_code(&json!({"outcome": "pending_confirmation"})).unwrap(),
            2
        );
        assert_eq!(write_exit_code(&json!({"state": "confirmed"})).unwrap(), 0);
        assert_eq!(write_exit_code(&json!({"state": "pending_confirmation"})).unwrap(), 2);
    }
}

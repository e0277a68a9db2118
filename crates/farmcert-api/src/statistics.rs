//! # Statistics Aggregator
//!
//! Read-only rollup of farmer certification buckets for the admin summary.
//! Works on a snapshot of the farmer records; a few seconds of staleness
//! is acceptable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::{FarmerRecord, FarmerStatus};

/// Bucket label for farmers known to the service without any document.
pub const NOT_UPLOADED: &str = "not_uploaded";

/// Count per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusCounts {
    pub total_farmers: usize,
    pub certified: usize,
    /// Documents verified, awaiting certification.
    pub verified: usize,
    pub pending: usize,
    pub partial: usize,
    pub rejected: usize,
    pub not_uploaded: usize,
}

impl StatusCounts {
    fn bump(&mut self, bucket: &str) {
        match bucket {
            "certified" => self.certified += 1,
            "verified" => self.verified += 1,
            "pending" => self.pending += 1,
            "partial" => self.partial += 1,
            "rejected" => self.rejected += 1,
            _ => self.not_uploaded += 1,
        }
        self.total_farmers += 1;
    }

    /// `(bucket, count)` pairs, for the metrics gauge.
    pub fn buckets(&self) -> [(&'static str, usize); 6] {
        [
            ("certified", self.certified),
            ("verified", self.verified),
            ("pending", self.pending),
            ("partial", self.partial),
            ("rejected", self.rejected),
            (NOT_UPLOADED, self.not_uploaded),
        ]
    }
}

/// One farmer in a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FarmerSummary {
    pub farmer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farmer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Statistics response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CertificationStatistics {
    pub stats: StatusCounts,
    /// Farmers per bucket, ordered by farmer id.
    pub farmers: BTreeMap<String, Vec<FarmerSummary>>,
}

/// Bucket label for one record.
pub fn bucket_of(record: &FarmerRecord) -> &'static str {
    if record.documents.is_empty() {
        return NOT_UPLOADED;
    }
    record.status().as_str()
}

/// Roll up a snapshot of farmer records.
pub fn aggregate(records: &[FarmerRecord]) -> CertificationStatistics {
    let mut out = CertificationStatistics::default();
    for label in FarmerStatus::ALL.iter().map(FarmerStatus::as_str).chain([NOT_UPLOADED]) {
        out.farmers.insert(label.to_string(), Vec::new());
    }

    for record in records {
        let bucket = bucket_of(record);
        out.stats.bump(bucket);
        out.farmers.entry(bucket.to_string()).or_default().push(FarmerSummary {
            farmer_id: record.farmer_id.to_string(),
            farmer_name: record.farmer_name.clone(),
            certificate_id: record.certificate_id.as_ref().map(|c| c.to_string()),
            updated_at: record.updated_at,
        });
    }
    for list in out.farmers.values_mut() {
        list.sort_by(|a, b| a.farmer_id.cmp(&b.farmer_id));
    }
    out
}

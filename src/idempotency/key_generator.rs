use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Attributes hashed into a derived idempotency reference when the caller
/// supplies none.
#[derive(Debug, Clone)]
pub struct OperationFingerprint {
    pub tenant_id: String,
    pub op_type: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: i64,
    pub currency: String,
    pub method: Option<String>,
}

/// Derives external references from operation attributes, bucketed into a
/// single configured time window: two identical requests inside one window
/// collapse to the same reference, requests in different windows do not.
/// Callers needing stricter replay boundaries must supply an explicit
/// reference instead.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    window_ms: u64,
}

impl KeyGenerator {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Derives the reference for the current time window.
    pub fn derive(&self, fingerprint: &OperationFingerprint) -> String {
        self.derive_at(fingerprint, Utc::now())
    }

    /// Derives the reference for the window containing `at`.
    pub fn derive_at(&self, fingerprint: &OperationFingerprint, at: DateTime<Utc>) -> String {
        let bucket = at.timestamp_millis() / self.window_ms as i64;

        let mut hasher = Sha256::new();
        hasher.update(fingerprint.tenant_id.as_bytes());
        hasher.update(b"|");
        hasher.update(fingerprint.op_type.as_bytes());
        hasher.update(b"|from:");
        hasher.update(fingerprint.from_user_id.as_bytes());
        hasher.update(b"|to:");
        hasher.update(fingerprint.to_user_id.as_bytes());
        hasher.update(b"|amt:");
        hasher.update(fingerprint.amount.to_string().as_bytes());
        hasher.update(b"|cur:");
        hasher.update(fingerprint.currency.as_bytes());
        if let Some(ref method) = fingerprint.method {
            hasher.update(b"|mth:");
            hasher.update(method.as_bytes());
        }
        hasher.update(b"|tw:");
        hasher.update(bucket.to_string().as_bytes());

        let hash = hex::encode(hasher.finalize());
        // 32 hex chars keep the reference well under the 128-char limit.
        format!("auto_{}", &hash[..32])
    }
}

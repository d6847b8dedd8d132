//! Refresh token records.
//!
//! # Purpose
//! Persisted view of an opaque refresh token. Only the SHA-256 hex digest of
//! the raw value is stored; the raw value is handed to the client once.
//!
//! # Key invariants
//! - A record is live while `revoked_at` is `None` and `expires_at > now`.
//! - Each rotation inserts a new record whose `previous_token_hash` is the
//!   hash of the token it consumed, forming a hash chain per login session.
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub previous_token_hash: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    /// True when the record was retired by a successful rotation.
    pub fn was_rotated(&self) -> bool {
        self.revoked_at.is_some()
            && self.revoked_reason.as_deref() == Some(RevokeReason::Rotated.as_str())
    }
}

/// Why a refresh token was revoked. Persisted as a stable string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeReason {
    Rotated,
    Logout,
    LogoutAll,
    ReuseDetected,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Rotated => "rotated",
            RevokeReason::Logout => "logout",
            RevokeReason::LogoutAll => "logout_all",
            RevokeReason::ReuseDetected => "reuse_detected",
        }
    }
}

impl std::fmt::Display for RevokeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            id: "r1".to_string(),
            user_id: "u1".to_string(),
            token_hash: "h1".to_string(),
            previous_token_hash: None,
            revoked_at: None,
            revoked_reason: None,
            expires_at: now + Duration::days(7),
            device_info: None,
            ip_address: None,
            created_at: now,
            last_used_at: None,
        }
    }

    #[test]
    fn liveness_requires_unrevoked_and_unexpired() {
        let now = Utc::now();
        let live = record();
        assert!(live.is_live(now));

        let mut revoked = record();
        revoked.revoked_at = Some(now);
        assert!(!revoked.is_live(now));

        let mut expired = record();
        expired.expires_at = now - Duration::seconds(1);
        assert!(!expired.is_live(now));
    }

    #[test]
    fn was_rotated_checks_reason() {
        let mut rec = record();
        rec.revoked_at = Some(Utc::now());
        rec.revoked_reason = Some(RevokeReason::Logout.to_string());
        assert!(!rec.was_rotated());
        rec.revoked_reason = Some(RevokeReason::Rotated.to_string());
        assert!(rec.was_rotated());
    }
}

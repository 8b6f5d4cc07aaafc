//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Account data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent account identifier. Owner key for every account-scoped row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Create a new random account id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ban and lock state of an account, read from the account store during login.
///
/// Maps to: `account_access` table (one row per account)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAccess {
    /// Set for temporary bans; ignored when `permanent` is set
    #[serde(default)]
    pub banned_until: Option<DateTime<Utc>>,
    /// Permanent ban
    #[serde(default)]
    pub permanent: bool,
    /// Account locked by support (e.g. pending recovery)
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AccountAccess {
    /// Check whether a ban is in effect at `now`
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.permanent || self.banned_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ban_expiry() {
        let now = Utc::now();
        let mut access = AccountAccess {
            banned_until: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert!(access.is_banned(now));

        access.banned_until = Some(now - Duration::hours(1));
        assert!(!access.is_banned(now));

        access.permanent = true;
        assert!(access.is_banned(now));
    }

    #[test]
    fn test_account_id_serializes_transparently() {
        let id = AccountId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.uuid()));
    }
}

//! In-memory token cache contents and their serialized form

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::auth::{AccessToken, Account};

/// Everything remembered for one signed-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    pub refresh_token: Option<String>,
    /// Access tokens keyed by resource.
    #[serde(default)]
    pub access_tokens: BTreeMap<String, AccessToken>,
}

/// Decrypted cache payload.
///
/// Mutating methods mark the state as changed; [`TokenCache::persist`]
/// only touches the disk for changed state.
///
/// [`TokenCache::persist`]: super::TokenCache::persist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheState {
    #[serde(default)]
    accounts: Vec<AccountRecord>,
    #[serde(skip)]
    changed: bool,
}

impl CacheState {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn mark_clean(&mut self) {
        self.changed = false;
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter().map(|r| &r.account)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn record(&self, home_account_id: &str) -> Option<&AccountRecord> {
        self.accounts
            .iter()
            .find(|r| r.account.home_account_id == home_account_id)
    }

    /// Cached access token for `resource` that is still outside the refresh margin.
    pub fn valid_access_token(&self, home_account_id: &str, resource: &str) -> Option<AccessToken> {
        self.record(home_account_id)?
            .access_tokens
            .get(resource)
            .filter(|t| !t.is_expired())
            .cloned()
    }

    /// Record the result of a successful token request.
    ///
    /// The account moves to the front, so [`accounts`](Self::accounts) always
    /// yields the most recently used account first. A refresh token of `None`
    /// keeps the previously stored one, since the identity provider does not
    /// always rotate it.
    pub fn upsert(
        &mut self,
        account: Account,
        refresh_token: Option<String>,
        resource: &str,
        token: AccessToken,
    ) {
        let position = self
            .accounts
            .iter()
            .position(|r| r.account.home_account_id == account.home_account_id);

        let mut record = match position {
            Some(i) => self.accounts.remove(i),
            None => AccountRecord {
                account: account.clone(),
                refresh_token: None,
                access_tokens: BTreeMap::new(),
            },
        };
        record.account = account;
        if refresh_token.is_some() {
            record.refresh_token = refresh_token;
        }
        record.access_tokens.insert(resource.to_string(), token);

        self.accounts.insert(0, record);
        self.changed = true;
    }

    /// Forget an account whose session was revoked, tokens and all.
    pub fn remove_account(&mut self, home_account_id: &str) {
        let before = self.accounts.len();
        self.accounts.retain(|r| r.account.home_account_id != home_account_id);
        if self.accounts.len() != before {
            self.changed = true;
        }
    }
}

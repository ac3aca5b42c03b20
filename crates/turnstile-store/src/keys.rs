//! Storage keys and tiers

use std::fmt;

/// Prefix applied to every key by concrete storages
pub const STORAGE_PREFIX: &str = "subscribe.google.com";

/// Lifetime of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTier {
    /// Lives for the current browsing session / process
    Session,
    /// Survives across sessions
    Local,
}

/// Every key the library reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Opaque user token echoed back as `sut`
    UserToken,
    /// Millisecond timestamp of the last article read
    ReadTime,
    /// Cached signed entitlements
    Entitlements,
    IsReadyToPay,
    /// Set once the entitlement toast was shown
    Toast,
    Impressions,
    Dismissals,
    /// Comma-joined intervention types the reader dismissed
    DismissedPrompts,
    SurveyCompleted,
    SurveyDataTransferFailed,
    SecondPromptDelayCounter,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::UserToken => "USER_TOKEN",
            StorageKey::ReadTime => "READ_TIME",
            StorageKey::Entitlements => "ents",
            StorageKey::IsReadyToPay => "isreadytopay",
            StorageKey::Toast => "toast",
            StorageKey::Impressions => "autopromptimp",
            StorageKey::Dismissals => "autopromptdismiss",
            StorageKey::DismissedPrompts => "dismissedprompts",
            StorageKey::SurveyCompleted => "surveycompleted",
            StorageKey::SurveyDataTransferFailed => "surveydatatransferfailed",
            StorageKey::SecondPromptDelayCounter => "secondpromptdelaycounter",
        }
    }

    /// Key as written to the backing store
    pub fn qualified(&self) -> String {
        format!("{}:{}", STORAGE_PREFIX, self.as_str())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

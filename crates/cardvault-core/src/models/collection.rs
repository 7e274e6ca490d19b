//! Collection model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::now_millis;

/// A unique identifier for a collection, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(Uuid);

impl CollectionId {
    /// Create a new unique collection ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// What a collection is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    /// General-purpose collection of owned cards
    #[default]
    Collection,
    /// A playable deck list
    Deck,
    /// A physical binder
    Binder,
    /// Cards set aside for trading
    TradeBinder,
}

impl CollectionType {
    /// Stable storage/wire label
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Deck => "deck",
            Self::Binder => "binder",
            Self::TradeBinder => "trade_binder",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collection" => Ok(Self::Collection),
            "deck" => Ok(Self::Deck),
            "binder" => Ok(Self::Binder),
            "trade_binder" | "trade-binder" => Ok(Self::TradeBinder),
            other => Err(format!("unknown collection type '{other}'")),
        }
    }
}

/// A named, owned set of card entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Unique identifier
    pub id: CollectionId,
    /// Display title
    pub title: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Owning user
    pub owner_id: String,
    /// Whether this collection tracks wanted cards rather than owned ones
    #[serde(default)]
    pub wantlist: bool,
    /// Visible read-only to other users
    #[serde(default)]
    pub public: bool,
    /// Collection kind
    #[serde(default)]
    pub collection_type: CollectionType,
    /// Last modification, assigned by the collection service (ms precision)
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Create a new collection owned by `owner_id`
    #[must_use]
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: CollectionId::new(),
            title: title.into(),
            description: String::new(),
            owner_id: owner_id.into(),
            wantlist: false,
            public: false,
            collection_type: CollectionType::default(),
            updated_at: now_millis(),
        }
    }

    /// Whether `user_id` may read this collection
    #[must_use]
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.public || self.owner_id == user_id
    }

    /// Whether `user_id` may modify this collection
    #[must_use]
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// Editable collection metadata sent to create or update a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub wantlist: bool,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub collection_type: CollectionType,
}

impl CollectionDraft {
    /// Draft with a title and default flags
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            wantlist: false,
            public: false,
            collection_type: CollectionType::default(),
        }
    }

    /// Reject drafts the service would refuse anyway
    pub fn validate(&self) -> crate::Result<()> {
        if self.title.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "collection title cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Draft describing an existing collection's metadata
    #[must_use]
    pub fn from_collection(collection: &Collection) -> Self {
        Self {
            title: collection.title.clone(),
            description: collection.description.clone(),
            wantlist: collection.wantlist,
            public: collection.public,
            collection_type: collection.collection_type,
        }
    }
}

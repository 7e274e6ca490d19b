//! Collection card model

use serde::{Deserialize, Serialize};

use super::CollectionId;

/// Logical identity of a card entry inside a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardKey {
    pub collection_id: CollectionId,
    pub card_id: String,
    pub variant_id: String,
    pub foil: bool,
    pub condition: Option<String>,
    pub language: Option<String>,
}

/// One card-variant entry within a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCard {
    /// Owning collection
    pub collection_id: CollectionId,
    /// Catalog card identifier
    pub card_id: String,
    /// Catalog printing/variant identifier
    pub variant_id: String,
    /// Foil finish
    #[serde(default)]
    pub foil: bool,
    /// Grading condition (e.g. "NM")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Card language (e.g. "en")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Quantity; wantlists may carry negative deltas
    pub amount: i64,
    /// Optional unit price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Free-text note
    #[serde(default)]
    pub note: String,
}

impl CollectionCard {
    /// Create a plain (non-foil, no condition/language) entry
    #[must_use]
    pub fn new(
        collection_id: CollectionId,
        card_id: impl Into<String>,
        variant_id: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            collection_id,
            card_id: card_id.into(),
            variant_id: variant_id.into(),
            foil: false,
            condition: None,
            language: None,
            amount,
            price: None,
            note: String::new(),
        }
    }

    /// Identity of this entry
    #[must_use]
    pub fn key(&self) -> CardKey {
        CardKey {
            collection_id: self.collection_id,
            card_id: self.card_id.clone(),
            variant_id: self.variant_id.clone(),
            foil: self.foil,
            condition: self.condition.clone(),
            language: self.language.clone(),
        }
    }

    /// Whether `other` describes the same logical entry
    #[must_use]
    pub fn same_entry(&self, other: &Self) -> bool {
        self.collection_id == other.collection_id
            && self.card_id == other.card_id
            && self.variant_id == other.variant_id
            && self.foil == other.foil
            && self.condition == other.condition
            && self.language == other.language
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_entry_ignores_quantity_and_note() {
        let collection_id = CollectionId::new();
        let mut a = CollectionCard::new(collection_id, "card-x", "v1", 2);
        let mut b = a.clone();
        b.amount = 7;
        b.note = "signed".to_string();
        assert!(a.same_entry(&b));
        assert_eq!(a.key(), b.key());

        a.foil = true;
        assert!(!a.same_entry(&b));
    }

    #[test]
    fn test_optional_fields_omitted_on_wire() {
        let card = CollectionCard::new(CollectionId::new(), "card-x", "v1", 1);
        let json = serde_json::to_value(&card).unwrap();
        assert!(json.get("price").is_none());
        assert!(json.get("condition").is_none());
        assert_eq!(json["cardId"], "card-x");
    }
}

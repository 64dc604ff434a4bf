//! Record kinds and logical keys
//!
//! Every kind of mentorship record maps onto one `type` attribute value, a
//! tuple of attributes identifying "the same conceptual record" across many
//! immutable entities, and a documented default lifetime.

use serde::{Deserialize, Serialize};

use crate::entity::{self, Entity};
use crate::error::{Result, SdkError};
use crate::store::AttributeFilter;

/// 30 days, the default lifetime of marketplace posts
pub const EPHEMERAL_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// 1 year, the default lifetime of profile and audit records
pub const DURABLE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Kinds of logical record written by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// One wallet's profile
    Profile,
    /// A skill on a wallet's skill list
    Skill,
    /// A request for mentorship
    Ask,
    /// An offer of mentorship
    Offer,
    /// Short-lived community post
    LitePost,
    /// Progress on one quest step
    QuestProgress,
    /// Feedback left after a session
    Feedback,
    /// A note in a wallet's learning garden
    GardenNote,
    /// Side entity linking a write attempt to its transaction
    TxReference,
}

impl RecordKind {
    pub const ALL: [RecordKind; 9] = [
        RecordKind::Profile,
        RecordKind::Skill,
        RecordKind::Ask,
        RecordKind::Offer,
        RecordKind::LitePost,
        RecordKind::QuestProgress,
        RecordKind::Feedback,
        RecordKind::GardenNote,
        RecordKind::TxReference,
    ];

    /// Parse from the `type` attribute value
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(Self::Profile),
            "skill" => Some(Self::Skill),
            "ask" => Some(Self::Ask),
            "offer" => Some(Self::Offer),
            "lite_post" => Some(Self::LitePost),
            "quest_progress" => Some(Self::QuestProgress),
            "feedback" => Some(Self::Feedback),
            "garden_note" => Some(Self::GardenNote),
            "tx_reference" => Some(Self::TxReference),
            _ => None,
        }
    }

    /// The `type` attribute value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Skill => "skill",
            Self::Ask => "ask",
            Self::Offer => "offer",
            Self::LitePost => "lite_post",
            Self::QuestProgress => "quest_progress",
            Self::Feedback => "feedback",
            Self::GardenNote => "garden_note",
            Self::TxReference => "tx_reference",
        }
    }

    /// Attributes (besides `type`) that identify one logical record
    pub fn key_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Profile => &[entity::WALLET],
            Self::Skill => &[entity::WALLET, "skillName"],
            Self::Ask => &[entity::WALLET, "askId"],
            Self::Offer => &[entity::WALLET, "offerId"],
            Self::LitePost => &[entity::WALLET, "postId"],
            Self::QuestProgress => &[entity::WALLET, "questId", "stepId"],
            Self::Feedback => &[entity::WALLET, "sessionId"],
            Self::GardenNote => &[entity::WALLET, "noteId"],
            Self::TxReference => &[entity::IDEMPOTENCY_KEY],
        }
    }

    /// Documented default TTL, used when an entity carries none
    pub fn default_ttl_seconds(&self) -> Option<u64> {
        match self {
            Self::Ask | Self::Offer | Self::LitePost => Some(EPHEMERAL_TTL_SECS),
            Self::Profile | Self::QuestProgress | Self::Feedback | Self::TxReference => {
                Some(DURABLE_TTL_SECS)
            }
            Self::Skill | Self::GardenNote => None,
        }
    }

    /// Monotonic counter that outranks `createdAt` when picking the current version
    pub fn counter_attribute(&self) -> Option<&'static str> {
        match self {
            Self::Skill => Some("usageCount"),
            _ => None,
        }
    }

    /// Whether listings hide expired entities by default
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ask | Self::Offer | Self::LitePost)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies one logical record that many physical entities share over time.
///
/// Parts are held in the kind's declared attribute order so that two keys
/// built from differently-ordered input compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalKey {
    kind: RecordKind,
    parts: Vec<(String, String)>,
}

impl LogicalKey {
    /// Build a key from explicit attribute values.
    ///
    /// Every key attribute of `kind` must be supplied with a non-empty value.
    pub fn new(kind: RecordKind, values: &[(&str, &str)]) -> Result<Self> {
        let mut parts = Vec::with_capacity(kind.key_attributes().len());
        for attr in kind.key_attributes() {
            let value = values
                .iter()
                .find(|(name, _)| name == attr)
                .map(|(_, value)| value.trim())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    SdkError::Validation(format!("{} key requires attribute '{}'", kind, attr))
                })?;
            parts.push((attr.to_string(), value.to_string()));
        }
        Ok(Self { kind, parts })
    }

    /// Shorthand for the single-attribute profile key
    pub fn profile(wallet: &str) -> Result<Self> {
        Self::new(RecordKind::Profile, &[(entity::WALLET, wallet)])
    }

    /// Derive the key of a stored entity.
    ///
    /// `None` when a key attribute is missing or the entity belongs to a
    /// different kind.
    pub fn of(kind: RecordKind, entity: &Entity) -> Option<Self> {
        if let Some(type_value) = entity.attribute(entity::TYPE) {
            if type_value != kind.as_str() {
                return None;
            }
        }
        let mut parts = Vec::with_capacity(kind.key_attributes().len());
        for attr in kind.key_attributes() {
            let value = entity.attribute(attr).filter(|v| !v.is_empty())?;
            parts.push((attr.to_string(), value.to_string()));
        }
        Some(Self { kind, parts })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Key attribute values in declared order
    pub fn parts(&self) -> &[(String, String)] {
        &self.parts
    }

    /// Get one part's value
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, value)| value.as_str())
    }

    /// Equality filters selecting every entity of this logical record
    pub fn filters(&self) -> Vec<AttributeFilter> {
        let mut filters = Vec::with_capacity(self.parts.len() + 1);
        filters.push(AttributeFilter::eq(entity::TYPE, self.kind.as_str()));
        for (name, value) in &self.parts {
            filters.push(AttributeFilter::eq(name.clone(), value.clone()));
        }
        filters
    }
}

impl std::fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, (name, value)) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_and_defaults() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::Ask.default_ttl_seconds(), Some(2_592_000));
        assert_eq!(RecordKind::Profile.default_ttl_seconds(), Some(31_536_000));
        assert_eq!(RecordKind::Skill.default_ttl_seconds(), None);
        assert!(RecordKind::LitePost.is_ephemeral());
        assert!(!RecordKind::QuestProgress.is_ephemeral());
    }

    #[test]
    fn test_key_order_independent() {
        let a = LogicalKey::new(
            RecordKind::QuestProgress,
            &[("stepId", "s1"), ("wallet", "0xabc"), ("questId", "q1")],
        )
        .unwrap();
        let b = LogicalKey::new(
            RecordKind::QuestProgress,
            &[("wallet", "0xabc"), ("questId", "q1"), ("stepId", "s1")],
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "quest_progress(wallet=0xabc, questId=q1, stepId=s1)");
    }

    #[test]
    fn test_key_requires_all_parts() {
        let err = LogicalKey::new(RecordKind::Skill, &[("wallet", "0xabc")]).unwrap_err();
        assert!(matches!(err, SdkError::Validation(_)));
        assert!(LogicalKey::new(RecordKind::Profile, &[("wallet", "  ")]).is_err());
    }

    #[test]
    fn test_key_of_entity() {
        let entity = Entity::new("0x1")
            .with_attribute("type", "profile")
            .with_attribute("wallet", "0xabc");
        let key = LogicalKey::of(RecordKind::Profile, &entity).unwrap();
        assert_eq!(key, LogicalKey::profile("0xabc").unwrap());

        // Wrong type
        assert!(LogicalKey::of(RecordKind::Skill, &entity).is_none());

        let filters = key.filters();
        assert_eq!(filters[0], AttributeFilter::eq("type", "profile"));
        assert_eq!(filters[1], AttributeFilter::eq("wallet", "0xabc"));
    }
}

//! # Entity Kinds
//!
//! Defines every record kind managed by the casebook engine. Kinds are the
//! `kind` half of a [`TargetRef`](crate::target::TargetRef) and select the
//! repository that owns a record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RbacError;

/// Entity kinds that can be stored, permissioned, audited and promoted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Single alert row within an alert group.
    Alert,
    /// Group of alerts produced by one detection.
    #[serde(rename = "alertgroup")]
    AlertGroup,
    /// Checklist of procedural steps.
    Checklist,
    /// Dispatch received from an external feed.
    Dispatch,
    /// Extracted entity (ip address, domain, hash, ...).
    Entity,
    /// Free-text entry attached to another record.
    Entry,
    /// Event under investigation.
    Event,
    /// File backed by blob storage.
    File,
    /// Response guide.
    Guide,
    /// Incident.
    Incident,
    /// Intel report.
    Intel,
    /// Finished product.
    Product,
    /// Detection signature.
    Signature,
    /// Sighting of an entity.
    Sighting,
    /// Source reference.
    Source,
    /// Tag label.
    Tag,
    /// Threat record.
    Threat,
    /// Vulnerability feed item.
    VulnFeed,
    /// Tracked vulnerability.
    VulnTrack,
}

impl EntityKind {
    /// Get the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Alert => "alert",
            EntityKind::AlertGroup => "alertgroup",
            EntityKind::Checklist => "checklist",
            EntityKind::Dispatch => "dispatch",
            EntityKind::Entity => "entity",
            EntityKind::Entry => "entry",
            EntityKind::Event => "event",
            EntityKind::File => "file",
            EntityKind::Guide => "guide",
            EntityKind::Incident => "incident",
            EntityKind::Intel => "intel",
            EntityKind::Product => "product",
            EntityKind::Signature => "signature",
            EntityKind::Sighting => "sighting",
            EntityKind::Source => "source",
            EntityKind::Tag => "tag",
            EntityKind::Threat => "threat",
            EntityKind::VulnFeed => "vuln_feed",
            EntityKind::VulnTrack => "vuln_track",
        }
    }

    /// Kinds that records of this kind may be promoted into.
    ///
    /// # Example
    ///
    /// ```
    /// use casebook_rbac::kinds::EntityKind;
    ///
    /// assert!(EntityKind::Alert.can_promote_to(EntityKind::Event));
    /// assert!(!EntityKind::Incident.can_promote_to(EntityKind::Alert));
    /// ```
    pub fn promotion_targets(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Alert => &[EntityKind::Event],
            EntityKind::Event => &[EntityKind::Incident],
            EntityKind::Dispatch => &[EntityKind::Intel],
            EntityKind::VulnFeed => &[EntityKind::VulnTrack],
            EntityKind::Intel => &[EntityKind::Product],
            _ => &[],
        }
    }

    /// Check whether promotion from this kind into `destination` is allowed.
    pub fn can_promote_to(&self, destination: EntityKind) -> bool {
        self.promotion_targets().contains(&destination)
    }

    /// Parse a kind from its string form.
    ///
    /// Case-insensitive; accepts plural forms and the hyphen/underscore
    /// spellings used by older clients.
    ///
    /// # Example
    ///
    /// ```
    /// use casebook_rbac::kinds::EntityKind;
    ///
    /// assert_eq!(EntityKind::parse("event"), Some(EntityKind::Event));
    /// assert_eq!(EntityKind::parse("Incidents"), Some(EntityKind::Incident));
    /// assert_eq!(EntityKind::parse("vuln-feed"), Some(EntityKind::VulnFeed));
    /// assert_eq!(EntityKind::parse("invalid"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "alert" | "alerts" => Some(EntityKind::Alert),
            "alertgroup" | "alertgroups" | "alert_group" | "alert_groups" => {
                Some(EntityKind::AlertGroup)
            }
            "checklist" | "checklists" => Some(EntityKind::Checklist),
            "dispatch" | "dispatches" => Some(EntityKind::Dispatch),
            "entity" | "entities" => Some(EntityKind::Entity),
            "entry" | "entries" => Some(EntityKind::Entry),
            "event" | "events" => Some(EntityKind::Event),
            "file" | "files" => Some(EntityKind::File),
            "guide" | "guides" => Some(EntityKind::Guide),
            "incident" | "incidents" => Some(EntityKind::Incident),
            "intel" | "intels" => Some(EntityKind::Intel),
            "product" | "products" => Some(EntityKind::Product),
            "signature" | "signatures" => Some(EntityKind::Signature),
            "sighting" | "sightings" => Some(EntityKind::Sighting),
            "source" | "sources" => Some(EntityKind::Source),
            "tag" | "tags" => Some(EntityKind::Tag),
            "threat" | "threats" => Some(EntityKind::Threat),
            "vuln_feed" | "vuln_feeds" | "vulnfeed" | "vulnfeeds" => Some(EntityKind::VulnFeed),
            "vuln_track" | "vuln_tracks" | "vulntrack" | "vulntracks" => {
                Some(EntityKind::VulnTrack)
            }
            _ => None,
        }
    }

    /// Get all entity kinds.
    pub fn all() -> Vec<Self> {
        vec![
            EntityKind::Alert,
            EntityKind::AlertGroup,
            EntityKind::Checklist,
            EntityKind::Dispatch,
            EntityKind::Entity,
            EntityKind::Entry,
            EntityKind::Event,
            EntityKind::File,
            EntityKind::Guide,
            EntityKind::Incident,
            EntityKind::Intel,
            EntityKind::Product,
            EntityKind::Signature,
            EntityKind::Sighting,
            EntityKind::Source,
            EntityKind::Tag,
            EntityKind::Threat,
            EntityKind::VulnFeed,
            EntityKind::VulnTrack,
        ]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| RbacError::UnknownKind(s.to_string()))
    }
}

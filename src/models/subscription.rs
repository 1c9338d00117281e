//! Channel subscriptions and their filters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::instance::InstanceId;

/// Wildcard event key matching every `event_updated_*` event.
pub const EVENT_UPDATED_ANY: &str = "event_updated_any";

/// Older spelling of [`EVENT_UPDATED_ANY`], still honoured on stored records.
pub const LEGACY_EVENT_UPDATED_ALL: &str = "event_updated_all";

/// A channel's standing request to be notified about matching tracker events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChannelSubscription {
    #[serde(default)]
    pub id: String,
    pub channel_id: String,
    pub instance_id: InstanceId,
    /// Chat user who created the subscription; empty on records created before
    /// creators were tracked.
    #[serde(default)]
    pub mattermost_user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filters: SubscriptionFilters,
}

impl ChannelSubscription {
    pub fn is_legacy(&self) -> bool {
        self.mattermost_user_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionFilters {
    #[serde(default)]
    pub events: BTreeSet<String>,
    #[serde(default)]
    pub projects: BTreeSet<String>,
    #[serde(default)]
    pub issue_types: BTreeSet<String>,
    #[serde(default)]
    pub fields: Vec<FieldFilter>,
    /// Roles the subscription creator must hold on the issue. Empty means any
    /// issue, which is how records saved without this filter behave.
    #[serde(rename = "self", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub self_roles: BTreeSet<SelfRole>,
}

impl SubscriptionFilters {
    /// A filter without events or projects can never match anything.
    pub fn is_well_formed(&self) -> bool {
        !self.events.is_empty()
            && !self.projects.is_empty()
            && self.fields.iter().all(FieldFilter::is_well_formed)
    }

    pub fn wants_any_update(&self) -> bool {
        self.events.contains(EVENT_UPDATED_ANY) || self.events.contains(LEGACY_EVENT_UPDATED_ALL)
    }
}

/// A relation between the subscription creator and the issue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SelfRole {
    Assignee,
    Reporter,
    Watcher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldFilter {
    pub key: String,
    pub inclusion: FieldInclusion,
    #[serde(default)]
    pub values: BTreeSet<String>,
}

impl FieldFilter {
    pub fn is_well_formed(&self) -> bool {
        !self.key.is_empty() && (self.inclusion == FieldInclusion::Empty || !self.values.is_empty())
    }

    /// Applies the inclusion rule to the issue's values for this field.
    pub fn matches(&self, issue_values: &BTreeSet<String>) -> bool {
        match self.inclusion {
            FieldInclusion::IncludeAny => !self.values.is_disjoint(issue_values),
            FieldInclusion::IncludeAll => self.values.is_subset(issue_values),
            FieldInclusion::ExcludeAny => self.values.is_disjoint(issue_values),
            FieldInclusion::Empty => issue_values.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldInclusion {
    IncludeAny,
    IncludeAll,
    ExcludeAny,
    Empty,
}

//! Tracker-side representations (Jira REST v2 shapes).
//!
//! Only the fields the bridge reads are modelled; everything else in an issue's
//! `fields` object is kept in [`IssueFields::unknowns`] so custom-field filters can
//! still inspect it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tracker account. `self_url` is the stable identity Jira puts in every payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerUser {
    #[serde(rename = "self", default)]
    pub self_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

impl TrackerUser {
    /// Account id on cloud, username on server.
    pub fn account_ref(&self) -> Option<&str> {
        self.account_id
            .as_deref()
            .or(self.name.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// True when both records point at the same tracker account.
    pub fn same_account(&self, other: &TrackerUser) -> bool {
        if !self.self_url.is_empty() && self.self_url == other.self_url {
            return true;
        }
        match (self.account_id.as_deref(), other.account_id.as_deref()) {
            (Some(a), Some(b)) if !a.is_empty() => return a == b,
            _ => {}
        }
        matches!(
            (self.name.as_deref(), other.name.as_deref()),
            (Some(a), Some(b)) if !a.is_empty() && a == b
        )
    }

    pub fn label(&self) -> &str {
        if !self.display_name.is_empty() {
            &self.display_name
        } else {
            self.account_ref().unwrap_or("Someone")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<IssueFields>,
}

impl Issue {
    pub fn summary(&self) -> &str {
        self.fields.as_ref().map_or("", |f| f.summary.as_str())
    }

    pub fn project_key(&self) -> Option<&str> {
        self.fields
            .as_ref()
            .and_then(|f| f.project.as_ref())
            .map(|p| p.key.as_str())
    }

    pub fn issue_type(&self) -> Option<&IssueType> {
        self.fields.as_ref().and_then(|f| f.issue_type.as_ref())
    }

    pub fn assignee(&self) -> Option<&TrackerUser> {
        self.fields.as_ref().and_then(|f| f.assignee.as_ref())
    }

    pub fn reporter(&self) -> Option<&TrackerUser> {
        self.fields.as_ref().and_then(|f| f.reporter.as_ref())
    }

    pub fn is_resolved(&self) -> bool {
        self.fields.as_ref().is_some_and(|f| f.resolution.is_some())
    }

    /// Values used by subscription field filters, keyed like the Jira field id.
    pub fn field_values(&self, key: &str) -> BTreeSet<String> {
        let Some(fields) = self.fields.as_ref() else {
            return BTreeSet::new();
        };
        let key = key.to_ascii_lowercase();
        match key.as_str() {
            "status" => fields.status.iter().map(|s| s.id.clone()).collect(),
            "labels" => fields.labels.iter().cloned().collect(),
            "priority" => fields.priority.iter().map(|p| p.id.clone()).collect(),
            "fixversions" => fields.fix_versions.iter().map(|v| v.id.clone()).collect(),
            "versions" => fields.versions.iter().map(|v| v.id.clone()).collect(),
            "components" => fields.components.iter().map(|c| c.id.clone()).collect(),
            _ => custom_field_values(fields.unknowns.get(&key)),
        }
    }
}

// Custom fields come as a plain string, a list of strings or option objects,
// or a single option object; options are identified by their `id`.
fn custom_field_values(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::String(s)) => BTreeSet::from([s.clone()]),
        Some(Value::Array(items)) => {
            let mut out = BTreeSet::new();
            for item in items {
                match item {
                    Value::String(s) => {
                        out.insert(s.clone());
                    }
                    Value::Object(obj) => match obj.get("id").and_then(Value::as_str) {
                        Some(id) => {
                            out.insert(id.to_string());
                        }
                        None => return BTreeSet::new(),
                    },
                    _ => return BTreeSet::new(),
                }
            }
            out
        }
        Some(Value::Object(obj)) => obj
            .get("id")
            .and_then(Value::as_str)
            .map(|id| BTreeSet::from([id.to_string()]))
            .unwrap_or_default(),
        _ => BTreeSet::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueFields {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "issuetype", default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<TrackerUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<TrackerUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub fix_versions: Vec<Version>,
    #[serde(default)]
    pub versions: Vec<Version>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(flatten)]
    pub unknowns: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    /// Present when the project list was requested with `expand=issueTypes`.
    #[serde(rename = "issueTypes", default, skip_serializing_if = "Vec::is_empty")]
    pub issue_types: Vec<IssueType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueType {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subtask: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub to: Status,
}

/// Restricts a comment to a group or project role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentVisibility {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<TrackerUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_author: Option<TrackerUser>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<CommentVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
    #[serde(default)]
    pub items: Vec<ChangelogItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogItem {
    pub field: String,
    #[serde(rename = "fieldtype", default)]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "toString", default, skip_serializing_if = "Option::is_none")]
    pub to_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
}

/// What Jira answers to an issue creation: identifiers only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worklog {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub issue_id: String,
    #[serde(default)]
    pub time_spent_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<TrackerUser>,
}

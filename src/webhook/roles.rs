//! "Me role" restriction: a subscription may only fire when its creator is the
//! issue's assignee, reporter or a watcher.

use std::collections::BTreeSet;

use crate::models::{Issue, SelfRole, TrackerUser};
use crate::tracker::{TrackerClient, TrackerError};

/// Whether `creator` holds one of `roles` on `issue`. An empty role set places
/// no restriction.
///
/// Assignee and reporter come from the issue itself. Watchers are fetched with
/// `client`, and only when no other requested role already matched.
///
/// # Errors
///
/// Propagates the tracker failure of the watcher lookup.
pub async fn creator_holds_role(
    client: &dyn TrackerClient,
    creator: &TrackerUser,
    issue: &Issue,
    roles: &BTreeSet<SelfRole>,
) -> Result<bool, TrackerError> {
    if roles.is_empty() {
        return Ok(true);
    }

    let is_creator = |user: Option<&TrackerUser>| user.is_some_and(|u| u.same_account(creator));
    if roles.contains(&SelfRole::Assignee) && is_creator(issue.assignee()) {
        return Ok(true);
    }
    if roles.contains(&SelfRole::Reporter) && is_creator(issue.reporter()) {
        return Ok(true);
    }
    if roles.contains(&SelfRole::Watcher) {
        let watchers = client.get_watchers(&issue.key).await?;
        return Ok(watchers.iter().any(|w| w.same_account(creator)));
    }
    Ok(false)
}

//! Issue creation, updates, pickers, searches and the bot API against
//! in-process fakes.

use serde_json::{Value, json};

use jira_bridge::models::issue::{IssueType, Project};
use jira_bridge::models::{FileInfo, Post};
use jira_bridge::repositories::ConnectionStore;
use jira_bridge::services::{
    BackdoorService, CreateIssueRequest, IssueActionError, IssueService, SearchQuery,
    SearchService, UpdateIssueRequest, WorklogRequest,
};
use jira_bridge::tracker::TrackerError;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{FakeTracker, Harness, JIRA_URL, issue, tracker_user, transition};

const SITE_URL: &str = "https://chat.example.com";

fn project(key: &str, id: &str) -> Project {
    Project {
        id: id.to_string(),
        key: key.to_string(),
        name: format!("{key} project"),
        issue_types: vec![
            IssueType {
                id: "10001".to_string(),
                name: "Task".to_string(),
                subtask: false,
            },
            IssueType {
                id: "10003".to_string(),
                name: "Sub-task".to_string(),
                subtask: true,
            },
        ],
    }
}

async fn connected_harness() -> Harness {
    let tracker = FakeTracker::new().with_issue(issue("PROJ-42", "PROJ"));
    {
        let mut state = tracker.state();
        state.projects = vec![project("PROJ", "10000"), project("OPS", "10100")];
        state.transitions = vec![transition("11", "To Do"), transition("21", "Done")];
    }
    let h = Harness::with_tracker(tracker).await;
    h.connect("mm-alice", &tracker_user("alice", "Alice"), "alice-token")
        .await;
    h
}

fn issues(h: &Harness) -> IssueService {
    IssueService::new(h.ctx.clone(), SITE_URL, 1024)
}

fn create_request(fields: Value) -> CreateIssueRequest {
    let Value::Object(fields) = fields else {
        panic!("fields must be an object");
    };
    CreateIssueRequest {
        instance_id: None,
        fields,
        post_id: None,
        channel_id: "town-square".to_string(),
        current_team: "eng".to_string(),
        required_fields_not_covered: Vec::new(),
    }
}

fn new_bug() -> Value {
    json!({
        "project": { "key": "PROJ" },
        "issuetype": { "id": "10001" },
        "summary": "Checkout times out",
    })
}

#[tokio::test]
async fn create_issue_announces_and_remembers_the_project() {
    let h = connected_harness().await;
    let created = issues(&h)
        .create_issue("mm-alice", &create_request(new_bug()))
        .await
        .unwrap();

    assert_eq!(created.issue.key, "PROJ-101");
    assert_eq!(created.issue.summary(), "Checkout times out");
    assert!(created.uploads.is_none());

    let record = h.chat.record();
    let (user, confirmation) = &record.ephemeral[0];
    assert_eq!(user, "mm-alice");
    assert_eq!(
        confirmation.message,
        format!("Created Jira issue [PROJ-101]({JIRA_URL}/browse/PROJ-101)")
    );
    assert_eq!(confirmation.attachments().len(), 1);

    let announcement = &record.posts[0];
    assert_eq!(announcement.user_id, "mm-alice");
    assert_eq!(announcement.channel_id, "town-square");
    assert_eq!(
        announcement.message,
        format!("Created a Jira issue: [PROJ-101: Checkout times out]({JIRA_URL}/browse/PROJ-101)")
    );
    drop(record);

    let connection = h
        .connections
        .load_connection(&h.instance.id, "mm-alice")
        .await
        .unwrap();
    assert_eq!(connection.default_project_key.as_deref(), Some("PROJ"));
}

#[tokio::test]
async fn create_issue_from_a_reply_links_the_post_and_uploads_its_files() {
    let h = connected_harness().await;
    {
        let mut record = h.chat.record();
        record.known_posts.insert(
            "reply-1".to_string(),
            Post {
                id: "reply-1".to_string(),
                user_id: "mm-bob".to_string(),
                channel_id: "support".to_string(),
                root_id: "thread-1".to_string(),
                message: "Logs attached".to_string(),
                file_ids: vec!["f-log".to_string()],
                ..Default::default()
            },
        );
        record.files.insert(
            "f-log".to_string(),
            (
                FileInfo {
                    id: "f-log".to_string(),
                    name: "server.log".to_string(),
                    mime_type: "text/plain".to_string(),
                    size: 4,
                },
                vec![1, 2, 3, 4],
            ),
        );
    }
    let mut fields = new_bug();
    fields["description"] = json!("Seen twice today.");
    let mut request = create_request(fields);
    request.post_id = Some("reply-1".to_string());

    let created = issues(&h).create_issue("mm-alice", &request).await.unwrap();
    created.uploads.expect("files to upload").await.unwrap();

    let state = h.tracker.state();
    let description = state.created[0]["description"].as_str().unwrap();
    assert_eq!(
        description,
        format!(
            "Seen twice today.\n\n_Issue created from a [message in Mattermost|{SITE_URL}/eng/pl/reply-1]_."
        )
    );
    assert_eq!(state.attachments, vec![("PROJ-101".to_string(), "server.log".to_string(), 4)]);
    assert!(state.updated_comments.is_empty());
    drop(state);

    let announcement = &h.chat.record().posts[0];
    assert_eq!(announcement.channel_id, "support");
    assert_eq!(announcement.root_id, "thread-1");
}

#[tokio::test]
async fn uncovered_required_fields_send_a_manual_create_link() {
    let h = connected_harness().await;
    let mut request = create_request(new_bug());
    request.required_fields_not_covered = vec![
        vec!["reporter".to_string(), "Reporter".to_string()],
        vec!["customfield_10200".to_string(), "Team".to_string()],
    ];

    let err = issues(&h).create_issue("mm-alice", &request).await.unwrap_err();

    assert!(matches!(err, IssueActionError::Validation(_)));
    assert!(h.tracker.state().created.is_empty());
    let record = h.chat.record();
    let notice = &record.ephemeral[0].1.message;
    assert!(notice.starts_with(&format!(
        "[Please create your Jira issue manually]({JIRA_URL}/secure/CreateIssueDetails!init.jspa?pid=10000"
    )));
    assert!(notice.ends_with("- Team\n"));
    assert!(!notice.contains("Reporter"));
    assert!(record.posts.is_empty());
}

#[tokio::test]
async fn reporter_alone_does_not_block_creation() {
    let h = connected_harness().await;
    let mut request = create_request(new_bug());
    request.required_fields_not_covered = vec![vec!["Reporter".to_string(), "Reporter".to_string()]];

    let created = issues(&h).create_issue("mm-alice", &request).await.unwrap();

    assert_eq!(created.issue.key, "PROJ-101");
    // Cloud instances fill the reporter themselves.
    assert!(h.tracker.state().created[0].get("reporter").is_none());
}

#[tokio::test]
async fn tracker_required_field_error_is_explained_to_the_user() {
    let h = connected_harness().await;
    h.tracker.state().create_failure = Some(TrackerError::Http {
        status: 400,
        body: r#"{"errors":{"components":"Component/s is required."}}"#.to_string(),
    });

    let err = issues(&h)
        .create_issue("mm-alice", &create_request(new_bug()))
        .await
        .unwrap_err();

    assert!(matches!(err, IssueActionError::Validation(_)));
    let notice = h.chat.record().ephemeral[0].1.message.clone();
    assert!(notice.starts_with("Failed to create issue. Your Jira project requires fields"));
    assert!(notice.contains("Component/s is required."));
}

#[tokio::test]
async fn create_issue_needs_a_known_project() {
    let h = connected_harness().await;
    let err = issues(&h)
        .create_issue("mm-alice", &create_request(json!({ "summary": "No project" })))
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::Validation(_)));

    let err = issues(&h)
        .create_issue(
            "mm-alice",
            &create_request(json!({ "project": { "key": "NOPE" }, "summary": "x" })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::NotFound(_)));
    assert!(h.tracker.state().created.is_empty());
}

#[tokio::test]
async fn update_issue_applies_transition_and_assignee() {
    let h = connected_harness().await;
    let mut bob = tracker_user("bob", "Bob");
    bob.name = Some("bob".to_string());
    h.tracker
        .state()
        .accounts
        .insert("bob-token".to_string(), bob.clone());

    let updated = issues(&h)
        .update_issue(
            "mm-alice",
            &UpdateIssueRequest {
                instance_id: None,
                issue_key: "proj-42".to_string(),
                transition: Some("21".to_string()),
                assignee: Some("bob".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.key, "PROJ-42");
    let state = h.tracker.state();
    assert_eq!(
        state.transitioned,
        vec![("PROJ-42".to_string(), "21".to_string(), None)]
    );
    assert_eq!(state.assigned, vec![("PROJ-42".to_string(), Some(bob))]);
}

#[tokio::test]
async fn update_issue_rejects_empty_requests() {
    let h = connected_harness().await;
    let service = issues(&h);

    let no_key = UpdateIssueRequest {
        instance_id: None,
        issue_key: " ".to_string(),
        transition: Some("21".to_string()),
        assignee: None,
    };
    let err = service.update_issue("mm-alice", &no_key).await.unwrap_err();
    assert_eq!(err.to_string(), "issue_key must not be empty");

    let nothing = UpdateIssueRequest {
        instance_id: None,
        issue_key: "PROJ-42".to_string(),
        transition: None,
        assignee: Some(String::new()),
    };
    let err = service.update_issue("mm-alice", &nothing).await.unwrap_err();
    assert_eq!(err.to_string(), "Issue fields must not be empty");

    let unknown_assignee = UpdateIssueRequest {
        assignee: Some("ghost".to_string()),
        ..nothing
    };
    let err = service
        .update_issue("mm-alice", &unknown_assignee)
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::Validation(_)));
    assert!(h.tracker.state().assigned.is_empty());
}

#[tokio::test]
async fn transitions_are_listed_for_known_issues() {
    let h = connected_harness().await;
    let service = issues(&h);

    let transitions = service
        .get_issue_transitions(None, "mm-alice", "proj-42")
        .await
        .unwrap();
    assert_eq!(transitions.len(), 2);

    let err = service
        .get_issue_transitions(None, "mm-alice", "PROJ-9")
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::NotFound(_)));

    h.tracker.state().transitions.clear();
    let err = service
        .get_issue_transitions(None, "mm-alice", "PROJ-42")
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::Forbidden(_)));
}

#[tokio::test]
async fn assignees_need_an_editable_assignee_field() {
    let h = connected_harness().await;
    h.tracker.state().assignable = vec![tracker_user("bob", "Bob"), tracker_user("carol", "Carol")];
    let service = issues(&h);

    let err = service
        .get_available_assignees(None, "mm-alice", "PROJ-42", "")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "user does not have permission to change the assignee"
    );

    h.tracker.state().editable_fields = vec!["summary".to_string(), "assignee".to_string()];
    let users = service
        .get_available_assignees(None, "mm-alice", "PROJ-42", "car")
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].display_name, "Carol");
}

#[tokio::test]
async fn search_by_text_builds_jql_with_defaults() {
    let h = connected_harness().await;
    let search = SearchService::new(h.ctx.clone());

    let found = search
        .search_issues(
            "mm-alice",
            &SearchQuery {
                q: r#"login "bug""#.to_string(),
                limit: "not a number".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    let state = h.tracker.state();
    let (jql, fields, limit) = &state.searches[0];
    assert_eq!(jql, r#"text ~ "login \"bug\"" OR text ~ "login \"bug\"*""#);
    assert_eq!(fields, &vec!["key".to_string(), "summary".to_string()]);
    assert_eq!(*limit, 50);
}

#[tokio::test]
async fn search_by_key_reads_the_issue_directly() {
    let h = connected_harness().await;
    let search = SearchService::new(h.ctx.clone());

    let found = search
        .search_issues(
            "mm-alice",
            &SearchQuery {
                q: "PROJ-42".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(found[0].key, "PROJ-42");

    let missing = search
        .search_issues(
            "mm-alice",
            &SearchQuery {
                q: "PROJ-7".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(missing.is_empty());
    assert!(h.tracker.state().searches.is_empty());
}

#[tokio::test]
async fn explicit_jql_and_fields_are_passed_through() {
    let h = connected_harness().await;
    SearchService::new(h.ctx.clone())
        .search_issues(
            "mm-alice",
            &SearchQuery {
                jql: "project = OPS".to_string(),
                fields: "key, status".to_string(),
                limit: "5".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let state = h.tracker.state();
    assert_eq!(
        state.searches[0],
        (
            "project = OPS".to_string(),
            vec!["key".to_string(), "status".to_string()],
            5
        )
    );
}

#[tokio::test]
async fn create_metadata_reports_projects_without_permission() {
    let h = connected_harness().await;
    let search = SearchService::new(h.ctx.clone());

    let err = search
        .create_issue_metadata(None, "mm-alice", " ")
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::Validation(_)));

    h.tracker.state().create_meta = json!({ "projects": [] });
    let meta = search
        .create_issue_metadata(None, "mm-alice", "PROJ")
        .await
        .unwrap();
    assert_eq!(
        meta["error"],
        "You do not have permission to create issues in that project. Please contact your Jira admin."
    );

    let expected = json!({ "projects": [{ "key": "PROJ", "issuetypes": [] }] });
    h.tracker.state().create_meta = expected.clone();
    let meta = search
        .create_issue_metadata(None, "mm-alice", "PROJ")
        .await
        .unwrap();
    assert_eq!(meta, expected);
}

#[tokio::test]
async fn project_metadata_lists_non_subtask_types() {
    let h = connected_harness().await;
    let mut connection = h
        .connections
        .load_connection(&h.instance.id, "mm-alice")
        .await
        .unwrap();
    connection.default_project_key = Some("OPS".to_string());
    h.set_connection("mm-alice", connection).await;

    let metadata = SearchService::new(h.ctx.clone())
        .project_metadata(None, "mm-alice")
        .await
        .unwrap();

    assert_eq!(metadata.projects.len(), 2);
    assert_eq!(metadata.projects[0].value, "PROJ");
    assert_eq!(metadata.projects[0].label, "PROJ project");
    let types = &metadata.issues_per_project["OPS"];
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].label, "Task");
    assert_eq!(metadata.default_project_key.as_deref(), Some("OPS"));
    assert!(metadata.error.is_none());

    h.tracker.state().projects.clear();
    let empty = SearchService::new(h.ctx.clone())
        .project_metadata(None, "mm-alice")
        .await
        .unwrap();
    assert!(empty.projects.is_empty());
    assert!(empty.error.is_some());
}

#[tokio::test]
async fn bot_calls_act_with_the_named_users_connection() {
    let h = connected_harness().await;
    let bots = BackdoorService::new(h.ctx.clone());

    bots.check_auth(None, "mm-alice").await.unwrap();
    let err = bots.check_auth(None, "mm-stranger").await.unwrap_err();
    assert!(matches!(err, IssueActionError::NotConnected(_)));

    let issue = bots.get_issue(None, "mm-alice", "PROJ-42").await.unwrap();
    assert_eq!(issue.key, "PROJ-42");
    assert_eq!(h.tracker.state().issue_reads, vec!["alice-token".to_string()]);

    let project = bots.get_project(None, "mm-alice", "OPS").await.unwrap();
    assert_eq!(project.id, "10100");
    let err = bots.get_project(None, "mm-alice", "NOPE").await.unwrap_err();
    assert!(matches!(err, IssueActionError::NotFound(_)));
}

#[tokio::test]
async fn worklogs_require_permission_and_convert_minutes() {
    let h = connected_harness().await;
    let bots = BackdoorService::new(h.ctx.clone());
    let request = WorklogRequest {
        instance_id: None,
        user_id: "mm-alice".to_string(),
        issue_key: "PROJ-42".to_string(),
        minutes: 90,
        comment: "Pairing".to_string(),
    };

    let err = bots
        .check_worklog_permission(None, "mm-alice", "PROJ-42")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "user does not have permission to create worklog");
    let err = bots.add_worklog(&request).await.unwrap_err();
    assert!(matches!(err, IssueActionError::Forbidden(_)));

    h.tracker.state().worklog_allowed.insert("PROJ-42".to_string());
    bots.check_worklog_permission(None, "mm-alice", "PROJ-42")
        .await
        .unwrap();
    let worklog = bots.add_worklog(&request).await.unwrap();

    assert_eq!(worklog.time_spent_seconds, 5400);
    assert_eq!(
        h.tracker.state().worklogs,
        vec![("PROJ-42".to_string(), 5400, "Pairing".to_string())]
    );

    let err = bots
        .add_worklog(&WorklogRequest { minutes: 0, ..request })
        .await
        .unwrap_err();
    assert!(matches!(err, IssueActionError::Validation(_)));
}

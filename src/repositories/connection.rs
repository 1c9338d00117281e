//! In-memory connection store
//!
//! Connections are keyed by (instance, chat user). Reverse lookups by tracker
//! account scan the instance's connections.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConnectionStore, RepositoryError};
use crate::models::{Connection, InstanceId, TrackerUser};

#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<InstanceId, HashMap<String, Connection>>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn connection_key(instance_id: &InstanceId, mattermost_user_id: &str) -> String {
    format!("{instance_id}/{mattermost_user_id}")
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn load_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
    ) -> Result<Connection, RepositoryError> {
        self.connections
            .read()
            .await
            .get(instance_id)
            .and_then(|users| users.get(mattermost_user_id))
            .cloned()
            .ok_or_else(|| {
                RepositoryError::not_found(
                    "connection",
                    connection_key(instance_id, mattermost_user_id),
                )
            })
    }

    async fn store_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
        connection: Connection,
    ) -> Result<(), RepositoryError> {
        self.connections
            .write()
            .await
            .entry(instance_id.clone())
            .or_default()
            .insert(mattermost_user_id.to_string(), connection);
        Ok(())
    }

    async fn delete_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.connections.write().await;
        let removed = guard
            .get_mut(instance_id)
            .and_then(|users| users.remove(mattermost_user_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(RepositoryError::not_found(
                "connection",
                connection_key(instance_id, mattermost_user_id),
            )),
        }
    }

    async fn load_chat_user_id(
        &self,
        instance_id: &InstanceId,
        tracker_user: &TrackerUser,
    ) -> Result<String, RepositoryError> {
        let guard = self.connections.read().await;
        guard
            .get(instance_id)
            .and_then(|users| {
                users
                    .iter()
                    .find(|(_, connection)| connection.tracker_user().same_account(tracker_user))
                    .map(|(user_id, _)| user_id.clone())
            })
            .ok_or_else(|| {
                RepositoryError::not_found(
                    "connection",
                    tracker_user.account_ref().unwrap_or(&tracker_user.self_url),
                )
            })
    }
}

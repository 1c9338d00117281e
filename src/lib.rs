//! # Jira Bridge Library
//!
//! Bridges a Jira issue tracker and a Mattermost chat server: inbound Jira
//! webhooks are fanned out to subscribed channels and to the users they
//! concern, and chat users act on issues through the HTTP API.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod services;
pub mod telemetry;
pub mod tracker;
pub mod webhook;
pub mod webhook_verification;

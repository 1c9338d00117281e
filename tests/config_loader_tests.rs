use jira_bridge::config::{ConfigError, ConfigLoader};
use jira_bridge::models::InstanceType;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const VARS: &[&str] = &[
    "JIRA_BRIDGE_PROFILE",
    "JIRA_BRIDGE_API_BIND_ADDR",
    "JIRA_BRIDGE_LOG_LEVEL",
    "JIRA_BRIDGE_WEBHOOK_SECRET",
    "JIRA_BRIDGE_WEBHOOK_WORKER_COUNT",
    "JIRA_BRIDGE_WEBHOOK_QUEUE_SIZE",
    "JIRA_BRIDGE_CHAT_SERVER_URL",
    "JIRA_BRIDGE_CHAT_BOT_TOKEN",
    "JIRA_BRIDGE_CHAT_BOT_USER_ID",
    "JIRA_BRIDGE_INSTANCE_URL",
    "JIRA_BRIDGE_INSTANCE_TYPE",
    "JIRA_BRIDGE_BACKDOOR_BOTS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn empty_dir_loader() -> (TempDir, ConfigLoader) {
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    (temp_dir, loader)
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let (_dir, loader) = empty_dir_loader();
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert!(cfg.webhook_secret.is_none());
    assert!(cfg.instance.is_none());
    assert!(cfg.backdoor_bots.is_empty());
    assert!(cfg.webhook_workers.worker_count >= 1);
    assert!(cfg.webhook_workers.queue_size >= 1);
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "JIRA_BRIDGE_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "JIRA_BRIDGE_API_BIND_ADDR=192.168.0.10:5000\nJIRA_BRIDGE_WEBHOOK_WORKER_COUNT=3\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "JIRA_BRIDGE_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "JIRA_BRIDGE_PROFILE=test\nJIRA_BRIDGE_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.webhook_workers.worker_count, 3);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "JIRA_BRIDGE_API_BIND_ADDR=127.0.0.1:3000\nJIRA_BRIDGE_WEBHOOK_QUEUE_SIZE=10\n",
    );

    unsafe {
        env::set_var("JIRA_BRIDGE_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("JIRA_BRIDGE_WEBHOOK_QUEUE_SIZE", "250");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.webhook_workers.queue_size, 250);

    clear_env();
}

#[test]
fn instance_seed_is_read_from_env() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "JIRA_BRIDGE_INSTANCE_URL=https://jira.example.com\nJIRA_BRIDGE_INSTANCE_TYPE=server\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with instance seed");
    let instance = cfg.instance.expect("instance seed present");
    assert_eq!(instance.url, "https://jira.example.com");
    assert_eq!(instance.instance_type, InstanceType::Server);

    clear_env();
}

#[test]
fn bot_allowlist_is_comma_separated() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "JIRA_BRIDGE_BACKDOOR_BOTS=worklog-bot, report-bot\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with bot list");
    assert_eq!(cfg.backdoor_bots, vec!["worklog-bot", "report-bot"]);

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("JIRA_BRIDGE_API_BIND_ADDR", "not-an-addr");
    }
    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn non_numeric_worker_count_is_rejected() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("JIRA_BRIDGE_WEBHOOK_WORKER_COUNT", "many");
    }
    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("worker count must be numeric");
    assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "WEBHOOK_WORKER_COUNT"));

    clear_env();
}

#[test]
fn production_profile_requires_webhook_secret() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("JIRA_BRIDGE_PROFILE", "prod");
        env::set_var("JIRA_BRIDGE_CHAT_BOT_TOKEN", "bot-token");
        env::set_var("JIRA_BRIDGE_CHAT_BOT_USER_ID", "bot");
    }
    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("prod without secret should fail");
    assert!(matches!(err, ConfigError::MissingWebhookSecret));

    unsafe {
        env::set_var("JIRA_BRIDGE_WEBHOOK_SECRET", "s3cret");
    }
    let cfg = loader.load().expect("prod with secrets loads");
    assert_eq!(cfg.webhook_secret.as_deref(), Some("s3cret"));

    clear_env();
}

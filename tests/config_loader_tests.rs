use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tempfile::TempDir;
use travis_connector::config::{ConfigError, ConfigLoader};

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
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("TRAVIS_WDC_"))
        .collect();
    for key in keys {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9001");
    assert_eq!(cfg.log_format, "json");
    assert_eq!(cfg.travis.public_api_base, "https://api.travis-ci.org");
    assert_eq!(cfg.travis.private_api_base, "https://api.travis-ci.com");
    assert_eq!(cfg.travis.items_per_page, 25);
    assert_eq!(cfg.travis.max_retries, 5);
    assert_eq!(cfg.travis.default_row_limit, 2500);
    assert!(!cfg.oauth_enabled());
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRAVIS_WDC_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.local",
        "TRAVIS_WDC_PROFILE=test\nTRAVIS_WDC_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test",
        "TRAVIS_WDC_API_BIND_ADDR=192.168.0.10:5000\nTRAVIS_WDC_TRAVIS_ITEMS_PER_PAGE=10\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "TRAVIS_WDC_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("layered config loads");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.travis.items_per_page, 10);
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRAVIS_WDC_TRAVIS_MAX_RETRIES=2\n");
    unsafe {
        env::set_var("TRAVIS_WDC_TRAVIS_MAX_RETRIES", "7");
        env::set_var("TRAVIS_WDC_TRAVIS_PUBLIC_API_BASE", "http://localhost:8081/");
    }

    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("config loads");

    assert_eq!(cfg.travis.max_retries, 7);
    assert_eq!(cfg.travis.public_api_base, "http://localhost:8081");
    clear_env();
}

#[test]
fn production_profile_requires_github_credentials() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRAVIS_WDC_PROFILE=prod\n");

    let err = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect_err("missing client id must fail");
    assert!(matches!(err, ConfigError::MissingGitHubClientId));

    write_env_file(
        &temp_dir,
        ".env.prod",
        "TRAVIS_WDC_GITHUB_CLIENT_ID=id\nTRAVIS_WDC_GITHUB_CLIENT_SECRET=secret\n",
    );
    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("credentials satisfy prod profile");
    assert!(cfg.oauth_enabled());
}

#[test]
fn invalid_items_per_page_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRAVIS_WDC_TRAVIS_ITEMS_PER_PAGE=0\n");

    let err = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect_err("zero page size must fail");
    assert!(matches!(err, ConfigError::InvalidItemsPerPage { .. }));
}

#[test]
fn invalid_bind_addr_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRAVIS_WDC_API_BIND_ADDR=not-an-addr\n");

    let err = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect_err("bad bind addr must fail");
    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
}

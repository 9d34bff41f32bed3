use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use clap::CommandFactory;
use content_search::Cli;
use content_search::model::types::ContentType;

mod util;
use util::{ContentFixture, catalog_entry, post_front_matter};

const ENV_KEYS: &[&str] = &[
    "CSEARCH_TTL_SECS",
    "CSEARCH_SOURCE_TIMEOUT_SECS",
    "CSEARCH_DEFAULT_LIMIT",
    "CSEARCH_MAX_LIMIT",
    "CSEARCH_RECENCY_DAYS",
    "CSEARCH_MAX_CONNECTIONS",
    "CSEARCH_CATALOG",
    "CSEARCH_SOCKET",
    "CSEARCH_CONTENT_ROOTS",
    "RUST_LOG",
];

fn base_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("csearch"));
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd
}

fn site() -> ContentFixture {
    ContentFixture::new()
        .root("blog", ContentType::Blog)
        .root("docs", ContentType::Documentation)
        .page(
            "blog/launch.md",
            &post_front_matter("Hushh Vault", "2024-05-01"),
            "We shipped the vault today.",
        )
        .page("docs/setup.md", "title: Setup", "Install the toolkit first.")
        .catalog(vec![catalog_entry(
            "vault-pro",
            "The Vault Pro Bundle",
            "Everything in the vault",
        )])
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("valid json on stdout")
}

#[test]
fn clap_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn help_lists_subcommands() {
    base_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("search"))
        .stdout(contains("suggest"))
        .stdout(contains("rebuild"))
        .stdout(contains("serve"));
}

#[test]
fn search_json_ranks_exact_title_first() {
    let fixture = site();
    let config = fixture.write_config_file();
    let json = json_stdout(
        base_cmd()
            .arg("--config")
            .arg(&config)
            .args(["search", "hushh vault", "--json"]),
    );
    assert_eq!(json["success"], true);
    assert_eq!(json["query"], "hushh vault");
    assert_eq!(json["results"][0]["id"], "blog-launch");
    assert_eq!(json["results"][0]["type"], "blog");
    assert!(json["results"][0]["relevanceScore"].as_f64().unwrap() > 0.0);
    assert_eq!(json["indexSize"], 3);
}

#[test]
fn search_type_flag_filters_results() {
    let fixture = site();
    let config = fixture.write_config_file();
    let json = json_stdout(
        base_cmd()
            .arg("--config")
            .arg(&config)
            .args(["search", "vault", "--type", "product", "--json"]),
    );
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "vault-pro");
}

#[test]
fn search_human_output_shows_title_and_url() {
    let fixture = site();
    let config = fixture.write_config_file();
    base_cmd()
        .arg("--config")
        .arg(&config)
        .args(["search", "setup"])
        .assert()
        .success()
        .stdout(contains("Setup"))
        .stdout(contains("/docs/setup"));
}

#[test]
fn failed_search_exits_with_one() {
    let fixture = ContentFixture::new().root("blog", ContentType::Blog);
    let config = fixture.write_config_file();
    let output = base_cmd()
        .arg("--config")
        .arg(&config)
        .args(["search", "anything", "--json"])
        .assert()
        .code(1)
        .get_output()
        .clone();
    let json: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());
}

#[test]
fn overlong_query_is_reported() {
    let fixture = site();
    let config = fixture.write_config_file();
    let long = "x".repeat(501);
    let json = json_stdout(
        base_cmd()
            .arg("--config")
            .arg(&config)
            .args(["search", &long, "--json"]),
    );
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("500"));
}

#[test]
fn missing_config_file_is_an_error() {
    let fixture = ContentFixture::new();
    base_cmd()
        .arg("--config")
        .arg(fixture.path().join("nope.toml"))
        .args(["search", "x"])
        .assert()
        .code(2)
        .stderr(contains("error:"));
}

#[test]
fn unknown_type_is_a_usage_error() {
    base_cmd()
        .args(["search", "x", "--type", "podcast"])
        .assert()
        .code(2);
}

#[test]
fn suggest_prints_one_per_line() {
    let fixture = site();
    let config = fixture.write_config_file();
    let output = base_cmd()
        .arg("--config")
        .arg(&config)
        .args(["suggest", "vau"])
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines[0], "Hushh Vault");
    assert!(lines.contains(&"The Vault Pro Bundle"));
}

#[test]
fn rebuild_json_reports_counts() {
    let fixture = site().page("blog/broken.md", "title: [unclosed", "Body");
    let config = fixture.write_config_file();
    let json = json_stdout(
        base_cmd()
            .arg("--config")
            .arg(&config)
            .args(["rebuild", "--json"]),
    );
    assert_eq!(json["success"], true);
    assert_eq!(json["count"], 3);
    assert_eq!(json["skipped"], 1);
    assert_eq!(json["failedSources"].as_array().unwrap().len(), 0);
}

#[test]
fn status_json_describes_fresh_index() {
    let fixture = site();
    let config = fixture.write_config_file();
    let json = json_stdout(
        base_cmd()
            .arg("--config")
            .arg(&config)
            .args(["status", "--json"]),
    );
    assert_eq!(json["indexSize"], 3);
    assert_eq!(json["stale"], false);
    assert_eq!(json["builds"], 1);
    assert!(json["builtAt"].is_string());
}

#[test]
fn completions_generate_for_bash() {
    base_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(contains("csearch"));
}

//! Integration tests for `GitRunner` against real local repositories.

#[allow(dead_code)]
mod common;

use buildtool::git::{GitOptions, GitRunner, VERSION_TAG_PATTERN};
use buildtool::repository::RepositorySpec;
use buildtool::subprocess::RetryPolicy;
use common::{git, MirrorFixture};

fn runner() -> GitRunner {
    GitRunner::new(GitOptions {
        retry: RetryPolicy::none(),
        ..GitOptions::default()
    })
}

fn spec_for(fixture: &MirrorFixture, name: &str) -> RepositorySpec {
    RepositorySpec::new(name, fixture.work_dir().join(name))
        .with_origin(fixture.mirrors_dir().join(name).display().to_string())
}

#[test]
fn test_clone_branch_and_query() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_released_repository("gate", "1.0.0");
    let head = gate.commit("fix(api): handle empty body");

    let spec = spec_for(&fixture, "gate");
    let runner = runner();
    runner
        .clone_repository_to_path(&spec, None, Some("master"), None)
        .unwrap();

    assert_eq!(runner.query_local_repository_commit_id(&spec.git_dir).unwrap(), head);
    assert_eq!(runner.query_local_repository_branch(&spec.git_dir).unwrap(), "master");
}

#[test]
fn test_clone_falls_back_to_second_branch() {
    let fixture = MirrorFixture::new();
    fixture.create_released_repository("gate", "1.0.0");

    let spec = spec_for(&fixture, "gate");
    let runner = runner();
    runner
        .clone_repository_to_path(&spec, None, Some("release-9.9.x"), Some("master"))
        .unwrap();

    assert_eq!(runner.query_local_repository_branch(&spec.git_dir).unwrap(), "master");
}

#[test]
fn test_clone_missing_branches_is_config_error() {
    let fixture = MirrorFixture::new();
    fixture.create_released_repository("gate", "1.0.0");

    let spec = spec_for(&fixture, "gate");
    let err = runner()
        .clone_repository_to_path(&spec, None, Some("nope"), Some("also-nope"))
        .unwrap_err();
    assert_eq!(err.classification(), "ConfigError");
    assert!(!spec.git_dir.exists());
}

#[test]
fn test_clone_at_commit_is_detached() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_repository("gate");
    let first = gate.commit("feat(api): first");
    gate.commit("fix(api): second");

    let spec = spec_for(&fixture, "gate");
    let runner = runner();
    runner
        .clone_repository_to_path(&spec, Some(&first), None, None)
        .unwrap();

    assert_eq!(runner.query_local_repository_commit_id(&spec.git_dir).unwrap(), first);
    assert_eq!(runner.query_local_repository_branch(&spec.git_dir).unwrap(), "HEAD");
}

#[test]
fn test_clone_adds_upstream_remote() {
    let fixture = MirrorFixture::new();
    fixture.create_released_repository("gate", "1.0.0");

    let spec = spec_for(&fixture, "gate").with_upstream("https://github.com/acme/gate");
    let runner = runner();
    runner
        .clone_repository_to_path(&spec, None, Some("master"), None)
        .unwrap();

    let remotes = git(&spec.git_dir, &["remote"]);
    assert!(remotes.lines().any(|line| line == "upstream"));

    let determined = runner.determine_remote_git_repository(&spec.git_dir).unwrap();
    assert_eq!(determined.name, "gate");
    assert_eq!(determined.upstream.as_deref(), Some("https://github.com/acme/gate"));
}

#[test]
fn test_tag_commits_resolve_annotated_tags() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_repository("gate");
    let first = gate.commit("feat(api): first");
    gate.tag("version-1.0.0");
    let second = gate.commit("fix(api): second");
    gate.annotated_tag("version-1.0.1");
    gate.tag("not-a-release");

    let tags = runner()
        .query_tag_commits(&gate.path, VERSION_TAG_PATTERN)
        .unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
    assert_eq!(names, vec!["version-1.0.1", "version-1.0.0"]);
    assert_eq!(tags[0].commit_id, second);
    assert_eq!(tags[1].commit_id, first);
}

#[test]
fn test_summary_of_released_head() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_released_repository("gate", "1.2.3");

    let summary = runner().collect_repository_summary(&gate.path).unwrap();
    assert_eq!(summary.tag, "version-1.2.3");
    assert_eq!(summary.version, "1.2.3");
    assert_eq!(summary.prev_version, "1.2.3");
    assert!(!summary.has_new_commits());
    assert_eq!(summary.branch.as_deref(), Some("master"));
}

#[test]
fn test_summary_proposes_next_version() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_released_repository("gate", "1.2.3");
    gate.commit("fix(api): handle empty body");
    let head = gate.commit("feat(api): add pagination");

    let summary = runner().collect_repository_summary(&gate.path).unwrap();
    assert_eq!(summary.commit_id, head);
    assert_eq!(summary.tag, "version-1.3.0");
    assert_eq!(summary.prev_version, "1.2.3");
    assert_eq!(summary.commit_messages.len(), 2);
    assert_eq!(summary.commit_messages[0].message, "feat(api): add pagination");
    assert_eq!(summary.commit_messages[0].author, "Test Author <author@example.com>");
}

#[test]
fn test_summary_breaking_change() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_released_repository("gate", "1.2.3");
    gate.commit("refactor(api): drop v1\n\nBREAKING CHANGE: v1 endpoints are gone");

    let summary = runner().collect_repository_summary(&gate.path).unwrap();
    assert_eq!(summary.tag, "version-2.0.0");
    assert!(!summary.patchable().unwrap());
}

#[test]
fn test_summary_without_baseline_is_config_error() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_repository("gate");
    gate.commit("feat(api): untagged");

    let err = runner().collect_repository_summary(&gate.path).unwrap_err();
    assert_eq!(err.classification(), "ConfigError");
}

#[test]
fn test_tag_head_and_never_push() {
    let fixture = MirrorFixture::new();
    fixture.create_released_repository("gate", "1.0.0");
    let spec = spec_for(&fixture, "gate");

    let runner = GitRunner::new(GitOptions {
        git_never_push: true,
        retry: RetryPolicy::none(),
        ..GitOptions::default()
    });
    runner
        .clone_repository_to_path(&spec, None, Some("master"), None)
        .unwrap();
    runner.tag_head(&spec.git_dir, "version-1.0.1").unwrap();
    runner.push_tag_to_origin(&spec.git_dir, "version-1.0.1").unwrap();

    let mirror_tags = git(&fixture.mirrors_dir().join("gate"), &["tag"]);
    assert!(!mirror_tags.contains("version-1.0.1"));
}

#[test]
fn test_push_tag_reaches_origin() {
    let fixture = MirrorFixture::new();
    fixture.create_released_repository("gate", "1.0.0");
    let spec = spec_for(&fixture, "gate");

    let runner = runner();
    runner
        .clone_repository_to_path(&spec, None, Some("master"), None)
        .unwrap();
    runner.tag_head(&spec.git_dir, "version-1.0.1").unwrap();
    runner.push_tag_to_origin(&spec.git_dir, "version-1.0.1").unwrap();

    let mirror_tags = git(&fixture.mirrors_dir().join("gate"), &["tag"]);
    assert!(mirror_tags.contains("version-1.0.1"));
}

#[test]
fn test_checkout_fetches_unknown_tags() {
    let fixture = MirrorFixture::new();
    let gate = fixture.create_released_repository("gate", "1.0.0");
    let spec = spec_for(&fixture, "gate");

    let runner = runner();
    runner
        .clone_repository_to_path(&spec, None, Some("master"), None)
        .unwrap();

    gate.commit("fix(api): after the clone");
    gate.tag("version-1.0.1");
    runner.checkout(&spec.git_dir, "version-1.0.1").unwrap();
    assert_eq!(
        runner.query_local_repository_commit_id(&spec.git_dir).unwrap(),
        gate.head()
    );
}

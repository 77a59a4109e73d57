//! # Git Operations
//!
//! `GitRunner` wraps the system `git` binary as typed operations. It uses the
//! system binary rather than a library, so SSH keys, credential helpers and
//! anything else configured in `~/.gitconfig` keep working.
//!
//! Mutating operations that talk to a remote (clone, fetch, push) are retried
//! through the runner's `RetryPolicy`. Once the retries are used up they fail
//! with `Error::Execution` naming `git` and carrying its output.
//!
//! The module also has free functions for comparing repository urls across
//! their https, ssh and local-path spellings.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};
use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::repository::{RepositorySpec, RepositorySummary};
use crate::subprocess::{check_program, describe_exit, render_command, run_program, CommandOutput, RetryPolicy};
use crate::version::{CommitMessage, CommitTag, SemanticVersion, VersionBump};

/// Tags that denote releases.
pub const VERSION_TAG_PATTERN: &str = r"^version-[0-9]+\.[0-9]+\.[0-9]+$";

/// Environment variable the auth token is handed to git through.
pub const AUTH_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Options controlling how `GitRunner` talks to remotes.
#[derive(Debug, Clone, Default)]
pub struct GitOptions {
    /// Rewrite the origin push url to ssh rather than https.
    pub github_push_ssh: bool,
    /// Disable pushes to the `upstream` remote (or to origin if there is none).
    pub github_disable_upstream_push: bool,
    /// Log pushes instead of performing them.
    pub git_never_push: bool,
    /// Token exported to git subprocesses as `GITHUB_TOKEN`.
    pub auth_token: Option<String>,
    pub retry: RetryPolicy,
}

/// A repository url reduced to what identifies the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedRepoUrl {
    Remote {
        host: String,
        owner: String,
        repo: String,
    },
    Local(PathBuf),
}

pub fn make_https_url(host: &str, owner: &str, repo: &str) -> String {
    format!("https://{}/{}/{}", host, owner, repo)
}

pub fn make_ssh_url(host: &str, owner: &str, repo: &str) -> String {
    format!("git@{}:{}/{}", host, owner, repo)
}

/// Normalize a repository url for equality checks.
///
/// `<scheme>://HOST/OWNER/REPO` and `git@HOST:OWNER/REPO` both reduce to
/// `Remote`, ignoring a trailing `.git`. Anything else is a local path and is
/// made absolute.
pub fn normalize_repo_url(url: &str) -> Result<NormalizedRepoUrl> {
    let gitless = url.strip_suffix(".git").unwrap_or(url);

    if gitless.contains("://") && !gitless.starts_with("file://") {
        let parsed = Url::parse(gitless)?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        if let [owner, rest @ ..] = segments.as_slice() {
            if !rest.is_empty() {
                return Ok(NormalizedRepoUrl::Remote {
                    host,
                    owner: owner.to_string(),
                    repo: rest.join("/"),
                });
            }
        }
        return Err(Error::config(format!(
            "Repository url {} is not of the form <scheme>://HOST/OWNER/REPO",
            url
        )));
    }

    let scp_like = Regex::new(r"^git@([^:]+):([^/]+)/(.+)$")?;
    if let Some(captures) = scp_like.captures(gitless) {
        return Ok(NormalizedRepoUrl::Remote {
            host: captures[1].to_string(),
            owner: captures[2].to_string(),
            repo: captures[3].to_string(),
        });
    }

    let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
    if path.is_absolute() {
        Ok(NormalizedRepoUrl::Local(path.to_path_buf()))
    } else {
        Ok(NormalizedRepoUrl::Local(std::env::current_dir()?.join(path)))
    }
}

/// Whether two urls refer to the same repository.
pub fn is_same_repo(first: &str, second: &str) -> bool {
    match (normalize_repo_url(first), normalize_repo_url(second)) {
        (Ok(a), Ok(b)) => a == b,
        _ => first == second,
    }
}

/// Typed wrapper around git subprocess invocations.
#[derive(Debug, Clone, Default)]
pub struct GitRunner {
    options: GitOptions,
}

impl GitRunner {
    pub fn new(options: GitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GitOptions {
        &self.options
    }

    fn auth_env(&self) -> Vec<(String, String)> {
        self.options
            .auth_token
            .iter()
            .map(|token| (AUTH_TOKEN_ENV.to_string(), token.clone()))
            .collect()
    }

    fn args_in(git_dir: &Path, args: &[&str]) -> Vec<String> {
        let mut full = vec!["-C".to_string(), git_dir.display().to_string()];
        full.extend(args.iter().map(|arg| arg.to_string()));
        full
    }

    /// Run git inside `git_dir`, returning its output even when it fails.
    pub fn run_git(&self, git_dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        run_program("git", &Self::args_in(git_dir, args), None, &self.auth_env())
    }

    /// Run git inside `git_dir`, failing on a non-zero exit.
    pub fn check_git(&self, git_dir: &Path, args: &[&str]) -> Result<String> {
        check_program("git", &Self::args_in(git_dir, args), None, &self.auth_env())
    }

    fn check_git_with_retry(&self, git_dir: &Path, args: &[&str]) -> Result<String> {
        let description = render_command("git", &Self::args_in(git_dir, args));
        self.options
            .retry
            .run(&description, || self.check_git(git_dir, args))
    }

    /// Clone `spec` into its `git_dir` at a commit or a branch.
    ///
    /// If the branch does not exist upstream, `fallback_branch` is tried
    /// instead. Partial clones are removed before every attempt so the clone
    /// can be retried safely.
    pub fn clone_repository_to_path(
        &self,
        spec: &RepositorySpec,
        commit: Option<&str>,
        branch: Option<&str>,
        fallback_branch: Option<&str>,
    ) -> Result<()> {
        if commit.is_some() && branch.is_some() {
            return Err(Error::config(
                "At most one of commit or branch can be specified.",
            ));
        }

        let origin = spec.require_origin()?;
        let git_dir = &spec.git_dir;
        debug!("Begin cloning {}", origin);
        if let Some(parent) = git_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        let branches: Vec<&str> = branch
            .into_iter()
            .chain(fallback_branch.filter(|fallback| branch != Some(*fallback)))
            .collect();
        self.options.retry.run(&format!("clone {}", origin), || {
            if git_dir.exists() {
                fs::remove_dir_all(git_dir)?;
            }
            self.clone_candidate_branches(origin, git_dir, &branches)
        })?;
        info!("Cloned {} into {}", origin, git_dir.display());

        if let Some(commit) = commit {
            self.checkout(git_dir, commit)?;
        }
        self.configure_remotes(spec, origin)?;
        debug!("Finished cloning {}", origin);
        Ok(())
    }

    fn clone_candidate_branches(&self, origin: &str, git_dir: &Path, branches: &[&str]) -> Result<()> {
        let dir_arg = git_dir.display().to_string();
        if branches.is_empty() {
            check_program("git", &["clone", origin, dir_arg.as_str()], None, &self.auth_env())?;
            return Ok(());
        }

        for (index, branch) in branches.iter().enumerate() {
            let args = ["clone", origin, dir_arg.as_str(), "-b", *branch];
            let output = run_program("git", &args, None, &self.auth_env())?;
            if output.success() {
                return Ok(());
            }

            let combined = output.combined();
            if !combined.contains(&format!("Remote branch {} not found", branch)) {
                return Err(Error::execution(
                    "git",
                    format!(
                        "{} exited with {}",
                        render_command("git", &args),
                        describe_exit(output.code)
                    ),
                    combined,
                ));
            }
            if git_dir.exists() {
                fs::remove_dir_all(git_dir)?;
            }
            if let Some(next) = branches.get(index + 1) {
                warn!(
                    "Branch {} does not exist in {}. Retry with {}",
                    branch, origin, next
                );
            }
        }

        Err(Error::config(format!(
            "Branches {:?} do not exist in {}.",
            branches, origin
        )))
    }

    fn configure_remotes(&self, spec: &RepositorySpec, origin: &str) -> Result<()> {
        let git_dir = &spec.git_dir;
        let upstream = spec
            .upstream
            .as_deref()
            .filter(|upstream| !is_same_repo(upstream, origin));

        if let Some(upstream) = upstream {
            debug!("Adding upstream {} to {}", upstream, git_dir.display());
            self.check_git(git_dir, &["remote", "add", "upstream", upstream])?;
        }

        let which = if upstream.is_some() { "upstream" } else { "origin" };
        if self.options.github_disable_upstream_push {
            self.check_git(git_dir, &["remote", "set-url", "--push", which, "disabled"])?;
        }
        if which != "origin" || !self.options.github_disable_upstream_push {
            if let NormalizedRepoUrl::Remote { host, owner, repo } = normalize_repo_url(origin)? {
                let push_url = if self.options.github_push_ssh {
                    make_ssh_url(&host, &owner, &repo)
                } else {
                    make_https_url(&host, &owner, &repo)
                };
                debug!("Setting origin push url of {} to {}", git_dir.display(), push_url);
                self.check_git(git_dir, &["remote", "set-url", "--push", "origin", &push_url])?;
            }
        }
        Ok(())
    }

    /// Check out a commit, tag or branch.
    ///
    /// If the reference is unknown locally, tags are fetched from origin and
    /// the checkout is attempted again.
    pub fn checkout(&self, git_dir: &Path, reference: &str) -> Result<()> {
        match self.check_git(git_dir, &["checkout", "-q", reference]) {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => {
                warn!(
                    "Could not checkout {} in {}, fetching from origin: {}",
                    reference,
                    git_dir.display(),
                    e
                );
                self.fetch_tags(git_dir)?;
                self.check_git_with_retry(git_dir, &["checkout", "-q", reference])?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn fetch_tags(&self, git_dir: &Path) -> Result<()> {
        self.check_git_with_retry(git_dir, &["fetch", "-q", "origin", "--tags"])?;
        Ok(())
    }

    pub fn query_local_repository_commit_id(&self, git_dir: &Path) -> Result<String> {
        self.check_git(git_dir, &["rev-parse", "HEAD"])
    }

    /// The checked out branch, or `HEAD` when detached.
    pub fn query_local_repository_branch(&self, git_dir: &Path) -> Result<String> {
        self.check_git(git_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Tags matching `tag_pattern` with the commits they point at, newest
    /// version first. Annotated tags resolve to their commit.
    pub fn query_tag_commits(&self, git_dir: &Path, tag_pattern: &str) -> Result<Vec<CommitTag>> {
        let output = self.run_git(git_dir, &["show-ref", "--tags", "-d"])?;
        // show-ref exits non-zero without output when there are no tags
        if !output.success() && !output.combined().trim().is_empty() {
            return Err(Error::execution(
                "git",
                format!("git -C {} show-ref --tags -d failed", git_dir.display()),
                output.combined(),
            ));
        }

        let mut tag_to_commit: BTreeMap<String, String> = BTreeMap::new();
        for line in output.stdout.lines() {
            let Some((commit_id, reference)) = line.trim().split_once(' ') else {
                continue;
            };
            let Some(tag) = reference.strip_prefix("refs/tags/") else {
                continue;
            };
            match tag.strip_suffix("^{}") {
                Some(peeled) => {
                    tag_to_commit.insert(peeled.to_string(), commit_id.to_string());
                }
                None => {
                    tag_to_commit
                        .entry(tag.to_string())
                        .or_insert_with(|| commit_id.to_string());
                }
            }
        }

        let matcher = Regex::new(tag_pattern)?;
        let mut commit_tags = Vec::new();
        for (tag, commit_id) in tag_to_commit {
            if !matcher.is_match(&tag) {
                continue;
            }
            match SemanticVersion::parse_tag(&tag) {
                Ok(version) => commit_tags.push(CommitTag {
                    commit_id,
                    tag,
                    version,
                }),
                Err(e) => debug!("Ignoring tag {} in {}: {}", tag, git_dir.display(), e),
            }
        }
        commit_tags.sort_by(|a, b| b.cmp(a));
        Ok(commit_tags)
    }

    /// The newest baseline tag reachable from `commit_id`, and the commits
    /// made since it (newest first).
    pub fn query_local_repository_commits_to_existing_tag_from_id(
        &self,
        git_dir: &Path,
        commit_id: &str,
        commit_tags: &[CommitTag],
    ) -> Result<(String, Vec<CommitMessage>)> {
        let mut ascending: Vec<&CommitTag> = commit_tags.iter().collect();
        ascending.sort();
        let mut id_to_newest_tag: HashMap<&str, &str> = HashMap::new();
        for commit_tag in ascending {
            id_to_newest_tag.insert(&commit_tag.commit_id, &commit_tag.tag);
        }
        if let Some(tag) = id_to_newest_tag.get(commit_id) {
            return Ok((tag.to_string(), Vec::new()));
        }

        let history = self.check_git(
            git_dir,
            &["log", "--no-decorate", "--pretty=oneline", commit_id],
        )?;
        let mut baseline = None;
        let mut count = 0usize;
        for line in history.lines() {
            let line_id = line.split(' ').next().unwrap_or_default();
            if let Some(tag) = id_to_newest_tag.get(line_id) {
                baseline = Some(tag.to_string());
                break;
            }
            count += 1;
        }

        let tag = baseline.ok_or_else(|| {
            Error::config(format!(
                "There is no baseline tag for commit \"{}\" in {}.",
                commit_id,
                git_dir.display()
            ))
        })?;

        let count_arg = count.to_string();
        let log = self.check_git(
            git_dir,
            &["log", "--no-decorate", "-n", &count_arg, "--pretty=medium", commit_id],
        )?;
        Ok((tag, CommitMessage::parse_log(&log)?))
    }

    /// Observe the state of a local clone and the version it would release.
    pub fn collect_repository_summary(&self, git_dir: &Path) -> Result<RepositorySummary> {
        let start = Instant::now();
        debug!("Begin analyzing {}", git_dir.display());

        let all_tags = self.query_tag_commits(git_dir, VERSION_TAG_PATTERN)?;
        let current_id = self.query_local_repository_commit_id(git_dir)?;
        let (tag, messages) =
            self.query_local_repository_commits_to_existing_tag_from_id(git_dir, &current_id, &all_tags)?;

        let current = SemanticVersion::parse_tag(&tag)?;
        let normalized = CommitMessage::normalize_list(messages.clone())?;
        let (use_tag, use_version) = match VersionBump::determine(&current, &normalized) {
            Some(bump) => (bump.tag(), bump.version.to_version()),
            None => (tag, current.to_version()),
        };
        let branch = self.query_local_repository_branch(git_dir)?;
        let branch = (branch != "HEAD").then_some(branch);

        debug!(
            "Finished analyzing {} in {} ms",
            git_dir.display(),
            start.elapsed().as_millis()
        );
        Ok(RepositorySummary {
            commit_id: current_id,
            tag: use_tag,
            version: use_version,
            prev_version: current.to_version(),
            branch,
            commit_messages: messages,
        })
    }

    /// Infer a `RepositorySpec` from the remotes of a local clone.
    pub fn determine_remote_git_repository(&self, git_dir: &Path) -> Result<RepositorySpec> {
        let text = self.check_git(git_dir, &["remote", "-v"])?;
        let matcher = Regex::new(r"(\w+)\s+(\S+)\s+\(fetch\)")?;
        let remotes: HashMap<&str, &str> = matcher
            .captures_iter(&text)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();

        let origin = remotes.get("origin").ok_or_else(|| {
            Error::unexpected(format!("{} has no remote \"origin\"", git_dir.display()))
        })?;
        let name = git_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut spec = RepositorySpec::new(name, git_dir).with_origin(*origin);
        if let Some(upstream) = remotes.get("upstream") {
            spec = spec.with_upstream(*upstream);
        }
        Ok(spec)
    }

    pub fn tag_head(&self, git_dir: &Path, tag: &str) -> Result<()> {
        self.check_git(git_dir, &["tag", tag, "HEAD"])?;
        Ok(())
    }

    /// Push `branch` to origin. Nothing happens if the clone is on another branch.
    pub fn push_branch_to_origin(&self, git_dir: &Path, branch: &str) -> Result<()> {
        if self.skip_push(git_dir, &["push", "origin", branch], "branch") {
            return Ok(());
        }
        let in_branch = self.query_local_repository_branch(git_dir)?;
        if in_branch != branch {
            warn!(
                "Skipping push {} \"{}\" to origin because branch is \"{}\".",
                git_dir.display(),
                branch,
                in_branch
            );
            return Ok(());
        }
        self.check_git_with_retry(git_dir, &["push", "origin", branch])?;
        Ok(())
    }

    pub fn push_tag_to_origin(&self, git_dir: &Path, tag: &str) -> Result<()> {
        if self.skip_push(git_dir, &["push", "origin", tag], "tag") {
            return Ok(());
        }
        debug!("Pushing tag \"{}\" to origin in {}", tag, git_dir.display());
        self.check_git_with_retry(git_dir, &["push", "origin", tag])?;
        Ok(())
    }

    fn skip_push(&self, git_dir: &Path, args: &[&str], what: &str) -> bool {
        if !self.options.git_never_push {
            return false;
        }
        warn!(
            "SKIP pushing {} because --git_never_push=true.\nCommand would have been: {}",
            what,
            render_command("git", &Self::args_in(git_dir, args))
        );
        true
    }
}

//! # Semantic Versions from Commit History
//!
//! This module computes the next release version of a repository from the
//! conventional-commit messages written since its last `version-X.Y.Z` tag.
//!
//! ## Process
//!
//! 1.  **Parsing**: `git log --pretty=medium` output is parsed into
//!     `CommitMessage`s. `CommitMessage::normalize_list` unpacks squashed or
//!     merged commits whose bodies carry several entries.
//!
//! 2.  **Classification**: Each message is read as a `ConventionalCommit`
//!     (`type(scope): subject`). A message mentioning `BREAKING CHANGE` bumps
//!     the major version, a `feat` bumps the minor version, and everything
//!     else bumps the patch version. Messages that do not follow the grammar
//!     count as an implicit `fix`.
//!
//! 3.  **Bumping**: The whole range takes the most severe level found, no
//!     matter how many commits of each kind there are or where they sit.
//!     The bump is anchored on the newest commit of the range.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Series prefix of release tags, as in `version-1.2.3`.
pub const DEFAULT_SERIES: &str = "version";

/// Text in a commit body that marks a breaking change.
pub const BREAKING_CHANGE_MARKER: &str = "BREAKING CHANGE";

/// Which version component a change set forces to increment.
///
/// Ordered by severity so the most severe level of a range is its `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BumpLevel::Patch => "patch",
            BumpLevel::Minor => "minor",
            BumpLevel::Major => "major",
        };
        f.write_str(name)
    }
}

/// A component of a `SemanticVersion`, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionComponent {
    Series,
    Major,
    Minor,
    Patch,
}

/// A `<series>-<major>.<minor>.<patch>` release tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub series: String,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    /// A version in the default `version` series.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self::with_series(DEFAULT_SERIES, major, minor, patch)
    }

    pub fn with_series(series: &str, major: u64, minor: u64, patch: u64) -> Self {
        Self {
            series: series.to_string(),
            major,
            minor,
            patch,
        }
    }

    /// Parse a tag such as `version-1.2.3`.
    ///
    /// The series is everything before the last `-`, so series names may
    /// themselves contain dashes.
    pub fn parse_tag(tag: &str) -> Result<Self> {
        let (series, number) = tag
            .trim()
            .rsplit_once('-')
            .filter(|(series, _)| !series.is_empty())
            .ok_or_else(|| Error::unexpected(format!("Malformed tag \"{}\"", tag)))?;

        let version = Version::parse(number)?;
        if !version.pre.is_empty() || !version.build.is_empty() {
            return Err(Error::unexpected(format!(
                "Malformed tag \"{}\": expected only major.minor.patch",
                tag
            )));
        }
        Ok(Self::with_series(
            series,
            version.major,
            version.minor,
            version.patch,
        ))
    }

    /// The bare `major.minor.patch` number.
    pub fn to_version(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    /// The full tag, e.g. `version-1.2.3`.
    pub fn to_tag(&self) -> String {
        format!("{}-{}", self.series, self.to_version())
    }

    /// The release branch this version belongs to, e.g. `release-1.2.x`.
    pub fn to_release_branch(&self) -> String {
        format!("release-{}.{}.x", self.major, self.minor)
    }

    /// The most significant component in which `other` differs from `self`.
    pub fn most_significant_diff(&self, other: &SemanticVersion) -> Option<VersionComponent> {
        if self.series != other.series {
            Some(VersionComponent::Series)
        } else if self.major != other.major {
            Some(VersionComponent::Major)
        } else if self.minor != other.minor {
            Some(VersionComponent::Minor)
        } else if self.patch != other.patch {
            Some(VersionComponent::Patch)
        } else {
            None
        }
    }

    /// The version after bumping at `level`. Lower components reset to zero.
    pub fn next(&self, level: BumpLevel) -> Self {
        let (major, minor, patch) = match level {
            BumpLevel::Major => (self.major + 1, 0, 0),
            BumpLevel::Minor => (self.major, self.minor + 1, 0),
            BumpLevel::Patch => (self.major, self.minor, self.patch + 1),
        };
        Self::with_series(&self.series, major, minor, patch)
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| self.series.cmp(&other.series))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tag())
    }
}

impl FromStr for SemanticVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_tag(s)
    }
}

/// A version tag together with the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTag {
    pub commit_id: String,
    pub tag: String,
    pub version: SemanticVersion,
}

impl Ord for CommitTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

impl PartialOrd for CommitTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The conventional-commit vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
    Feat,
    Fix,
    Docs,
    Style,
    Refactor,
    Perf,
    Test,
    Chore,
    Config,
}

impl CommitType {
    /// Accepts the canonical keywords plus the aliases seen in practice
    /// (`feature`, `bug`, `doc`).
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let commit_type = match keyword.to_ascii_lowercase().as_str() {
            "feat" | "feature" => CommitType::Feat,
            "fix" | "bug" => CommitType::Fix,
            "docs" | "doc" => CommitType::Docs,
            "style" => CommitType::Style,
            "refactor" => CommitType::Refactor,
            "perf" => CommitType::Perf,
            "test" => CommitType::Test,
            "chore" => CommitType::Chore,
            "config" => CommitType::Config,
            _ => return None,
        };
        Some(commit_type)
    }
}

/// A commit message read as `type(scope): subject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit {
    pub commit_type: CommitType,
    pub scope: Option<String>,
    pub subject: String,
    pub is_breaking: bool,
    /// False when the summary line did not follow the grammar and the commit
    /// was read as an implicit `fix`.
    pub conforming: bool,
}

impl ConventionalCommit {
    pub fn parse(message: &str) -> Self {
        let summary = message
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("");
        let marked_breaking = message.contains(BREAKING_CHANGE_MARKER);

        match parse_summary_line(summary) {
            Some(parsed) => Self {
                commit_type: parsed.commit_type,
                scope: parsed.scope,
                subject: parsed.subject,
                is_breaking: marked_breaking || parsed.bang,
                conforming: true,
            },
            None => Self {
                commit_type: CommitType::Fix,
                scope: None,
                subject: summary.to_string(),
                is_breaking: marked_breaking,
                conforming: false,
            },
        }
    }

    pub fn bump_level(&self) -> BumpLevel {
        if self.is_breaking {
            BumpLevel::Major
        } else if self.commit_type == CommitType::Feat {
            BumpLevel::Minor
        } else {
            BumpLevel::Patch
        }
    }
}

struct SummaryLine {
    commit_type: CommitType,
    scope: Option<String>,
    subject: String,
    bang: bool,
}

fn parse_summary_line(line: &str) -> Option<SummaryLine> {
    // Squashed messages often list entries as "* fix(x): ..."
    let line = line.strip_prefix('*').map(str::trim_start).unwrap_or(line);

    let keyword_len = line
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(line.len());
    if keyword_len == 0 {
        return None;
    }
    let commit_type = CommitType::from_keyword(&line[..keyword_len])?;

    let mut rest = &line[keyword_len..];
    let mut scope = None;
    if let Some(after_paren) = rest.strip_prefix('(') {
        let close = after_paren.find(')')?;
        let inner = after_paren[..close].trim();
        if !inner.is_empty() {
            scope = Some(inner.to_string());
        }
        rest = &after_paren[close + 1..];
    }

    let (bang, rest) = match rest.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let subject = rest.strip_prefix(':')?;

    Some(SummaryLine {
        commit_type,
        scope,
        subject: subject.trim().to_string(),
        bang,
    })
}

/// One entry of `git log --pretty=medium`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub commit_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub date: String,
    pub message: String,
}

const MEDIUM_HEADER_PATTERN: &str =
    r"^(\S+)[^\n]*\n(?:Merge:[^\n]*\n)?Author:[ \t]*([^\n]*)\nDate:[ \t]*([^\n]*)(?:\n|$)";

const EMBEDDED_COMMIT_PATTERN: &str =
    r"(?m)^( *)commit [a-f0-9]+\n[ \t]*Author: .+\n[ \t]*Date: .+\n";

const EMBEDDED_SUMMARY_PATTERN: &str = r"^\s*(?:\*\s*)?[a-z]+\(.+?\): .+";

impl CommitMessage {
    pub fn new(commit_id: &str, message: &str) -> Self {
        Self {
            commit_id: commit_id.to_string(),
            author: String::new(),
            date: String::new(),
            message: message.to_string(),
        }
    }

    pub fn conventional(&self) -> ConventionalCommit {
        ConventionalCommit::parse(&self.message)
    }

    /// Parse the output of `git log --pretty=medium`, newest first.
    pub fn parse_log(text: &str) -> Result<Vec<Self>> {
        let header = Regex::new(MEDIUM_HEADER_PATTERN)?;
        let text = format!("\n{}", text.trim());
        text.split("\ncommit ")
            .skip(1)
            .map(|entry| Self::parse_entry(&header, entry))
            .collect()
    }

    fn parse_entry(header: &Regex, entry: &str) -> Result<Self> {
        let captures = header
            .captures(entry)
            .ok_or_else(|| Error::unexpected(format!("Unexpected commit entry {}", entry)))?;
        let end = captures.get(0).map(|m| m.end()).unwrap_or(0);

        // git indents message bodies by four spaces
        let mut lines: Vec<&str> = entry[end..]
            .split('\n')
            .map(|line| line.strip_prefix("    ").unwrap_or(line).trim_end())
            .collect();
        while lines.first().is_some_and(|line| line.is_empty()) {
            lines.remove(0);
        }
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }

        Ok(Self {
            commit_id: captures[1].to_string(),
            author: captures[2].trim().to_string(),
            date: captures[3].trim().to_string(),
            message: lines.join("\n"),
        })
    }

    /// Break compound messages apart so each logical change is classified.
    ///
    /// A compound message is either a merge that embeds whole `commit/Author/Date`
    /// entries, or a single commit whose body lists several `type(scope): ...`
    /// summaries. Embedded commits keep their own ids, split summaries keep
    /// the id of the message they came from.
    pub fn normalize_list(messages: Vec<Self>) -> Result<Vec<Self>> {
        let messages = Self::unpack_embedded_commits(messages)?;
        Self::unpack_embedded_summaries(messages)
    }

    fn unpack_embedded_commits(messages: Vec<Self>) -> Result<Vec<Self>> {
        let matcher = Regex::new(EMBEDDED_COMMIT_PATTERN)?;
        let mut result = Vec::with_capacity(messages.len());

        for commit_message in messages {
            let found = matcher
                .captures(&commit_message.message)
                .and_then(|captures| captures.get(1));
            let Some(indent) = found else {
                result.push(commit_message);
                continue;
            };

            let text = &commit_message.message;
            let prefix = indent.as_str();
            let text_before = &text[..indent.start()];
            let mut pruned = Vec::new();
            let mut consistent = true;
            for line in text[indent.start()..].split('\n') {
                if let Some(stripped) = line.strip_prefix(prefix) {
                    pruned.push(stripped);
                } else if line.is_empty() {
                    pruned.push(line);
                } else {
                    warn!(
                        "\"{}\" looks like a composite commit, but is not indented by {}.",
                        text,
                        prefix.len()
                    );
                    consistent = false;
                    break;
                }
            }

            if !consistent {
                result.push(commit_message);
                continue;
            }
            if !text_before.trim().is_empty() {
                info!(
                    "Dropping commit message \"{}\" in favor of its embedded commits",
                    text_before.trim()
                );
            }
            result.extend(Self::parse_log(&pruned.join("\n"))?);
        }
        Ok(result)
    }

    fn unpack_embedded_summaries(messages: Vec<Self>) -> Result<Vec<Self>> {
        let matcher = Regex::new(EMBEDDED_SUMMARY_PATTERN)?;
        let mut result = Vec::with_capacity(messages.len());

        for commit_message in messages {
            let lines: Vec<&str> = commit_message.message.split('\n').collect();
            let mut start: Option<usize> = None;
            for (index, line) in lines.iter().enumerate() {
                if !matcher.is_match(line) {
                    continue;
                }
                if let Some(prev) = start {
                    debug!("Found embedded summary at line \"{}\"", line);
                    result.push(commit_message.with_text(lines[prev..index].join("\n").trim_end()));
                }
                start = Some(index);
            }
            let prev = start.unwrap_or(0);
            result.push(commit_message.with_text(lines[prev..].join("\n").trim_end()));
        }
        Ok(result)
    }

    fn with_text(&self, message: &str) -> Self {
        Self {
            commit_id: self.commit_id.clone(),
            author: self.author.clone(),
            date: self.date.clone(),
            message: message.to_string(),
        }
    }
}

/// The most severe bump implied by a set of commits, or `None` if empty.
pub fn classify(messages: &[CommitMessage]) -> Option<BumpLevel> {
    messages
        .iter()
        .map(|message| {
            let level = message.conventional().bump_level();
            debug!("Commit {} implies a {} bump", message.commit_id, level);
            level
        })
        .max()
}

/// The version a range of commits leads to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBump {
    pub level: BumpLevel,
    pub version: SemanticVersion,
    /// The newest commit of the range, which the new tag belongs on.
    pub commit_id: String,
}

impl VersionBump {
    /// Compute the bump for `commits`, ordered newest first, on top of
    /// `previous`. Returns `None` when there are no commits.
    pub fn determine(previous: &SemanticVersion, commits: &[CommitMessage]) -> Option<Self> {
        let newest = commits.first()?;
        let level = classify(commits)?;
        let version = previous.next(level);
        debug!(
            "{} commits since {} imply a {} bump to {}",
            commits.len(),
            previous,
            level,
            version
        );
        Some(Self {
            level,
            version,
            commit_id: newest.commit_id.clone(),
        })
    }

    pub fn tag(&self) -> String {
        self.version.to_tag()
    }
}

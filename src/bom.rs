//! # Bill of Materials
//!
//! A BOM pins every service of a release to an exact version and commit:
//!
//! ```yaml
//! version: master-20180101000000
//! timestamp: '2018-01-01 00:00:00'
//! artifactSources:
//!   gitPrefix: https://github.com/acme
//! services:
//!   gate:
//!     version: 1.2.3-20180101000000
//!     commit: 0123456789abcdef0123456789abcdef01234567
//!     gitPrefix: https://github.com/fork   # optional override
//! ```
//!
//! `Bom` is the typed form of that document. Keys this crate does not use
//! (`dependencies`, extra `artifactSources` entries) are carried through
//! untouched so a BOM survives a load/store cycle.
//!
//! `BomBuilder` goes the other way: it assembles a new BOM from the summaries
//! of branch-tracked repositories, optionally refreshing an existing BOM.

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::repository::{RepositorySpec, SourceInfo};
use crate::subprocess::check_program;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_prefix: Option<String>,
    /// Artifact repositories this crate does not interpret.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bom {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub artifact_sources: ArtifactSources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<serde_yaml::Value>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEntry>,
}

impl Bom {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::config(format!(
                "BOM path {} does not exist",
                path.display()
            )));
        }
        debug!("Loading BOM from {}", path.display());
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Fetch a published BOM by version through the release-manifest tool.
    pub fn retrieve_version(version: &str, tool: &str) -> Result<Self> {
        debug!("Retrieving BOM version {} with {}", version, tool);
        let text = check_program(
            tool,
            &[
                "version", "bom", version, "--color", "false", "--quiet", "--output", "yaml",
            ],
            None,
            &[],
        )?;
        Self::from_yaml(&text)
    }

    /// The entry for `name`. A missing entry means the caller asked for a
    /// repository the BOM was never meant to contain.
    pub fn service(&self, name: &str) -> Result<&ServiceEntry> {
        self.services.get(name).ok_or_else(|| {
            Error::unexpected(format!(
                "BOM version {} does not contain a service \"{}\"",
                self.version, name
            ))
        })
    }

    pub fn git_prefix_for(&self, name: &str) -> Result<String> {
        let service = self.service(name)?;
        service
            .git_prefix
            .as_ref()
            .or(self.artifact_sources.git_prefix.as_ref())
            .cloned()
            .ok_or_else(|| {
                Error::unexpected(format!(
                    "BOM version {} has no gitPrefix for \"{}\"",
                    self.version, name
                ))
            })
    }

    /// `gitPrefix + "/" + name`.
    pub fn origin_for(&self, name: &str) -> Result<String> {
        Ok(format!("{}/{}", self.git_prefix_for(name)?, name))
    }

    pub fn commit_for(&self, name: &str) -> Result<String> {
        self.service(name)?.commit.clone().ok_or_else(|| {
            Error::unexpected(format!(
                "BOM version {} has no commit for \"{}\"",
                self.version, name
            ))
        })
    }

    /// The build number part of a `<base>-<build-number>` service version.
    pub fn build_number_for(&self, name: &str) -> Result<String> {
        let service = self.service(name)?;
        service
            .version
            .as_deref()
            .and_then(|version| version.split_once('-'))
            .map(|(_, build_number)| build_number.to_string())
            .ok_or_else(|| {
                Error::unexpected(format!(
                    "BOM version {} service \"{}\" has no <base>-<build> version",
                    self.version, name
                ))
            })
    }
}

/// Everything up to the last path component of a git url.
pub fn url_prefix(url: &str) -> &str {
    url.rfind('/').map(|index| &url[..index]).unwrap_or(url)
}

/// Assembles a BOM from branch-tracked repositories.
#[derive(Debug, Clone, Default)]
pub struct BomBuilder {
    base: Option<Bom>,
    services: BTreeMap<String, ServiceEntry>,
    origins: BTreeMap<String, String>,
}

impl BomBuilder {
    /// `base`, if given, is refreshed rather than replaced: services that are
    /// not added again keep their existing entries.
    pub fn new(base: Option<Bom>) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn base_bom(&self) -> Option<&Bom> {
        self.base.as_ref()
    }

    pub fn add_repository(&mut self, spec: &RepositorySpec, source_info: &SourceInfo) -> Result<()> {
        let origin = spec.require_origin()?;
        self.services.insert(
            spec.name.clone(),
            ServiceEntry {
                version: Some(source_info.to_build_version()),
                commit: Some(source_info.summary.commit_id.clone()),
                git_prefix: None,
            },
        );
        self.origins.insert(spec.name.clone(), origin.to_string());
        Ok(())
    }

    /// The url prefix shared by the most repositories. Ties go to the
    /// lexically smallest prefix.
    pub fn determine_most_common_prefix(&self) -> Option<String> {
        let mut prefix_count: BTreeMap<&str, usize> = BTreeMap::new();
        for origin in self.origins.values() {
            *prefix_count.entry(url_prefix(origin)).or_default() += 1;
        }
        let mut best: Option<(&str, usize)> = None;
        for (prefix, count) in prefix_count {
            if best.map_or(true, |(_, max)| count > max) {
                best = Some((prefix, count));
            }
        }
        best.map(|(prefix, _)| prefix.to_string())
    }

    /// Build the BOM. If a base BOM was given and nothing differs from it,
    /// the base BOM is returned unchanged.
    pub fn build(&self, version: &str, timestamp: &str) -> Bom {
        let base_sources = self
            .base
            .as_ref()
            .map(|bom| bom.artifact_sources.clone())
            .unwrap_or_default();
        let default_prefix = base_sources
            .git_prefix
            .clone()
            .or_else(|| self.determine_most_common_prefix());

        let mut services = self
            .base
            .as_ref()
            .map(|bom| bom.services.clone())
            .unwrap_or_default();
        let mut changed = self.base.is_none();

        for (name, entry) in &self.services {
            let mut entry = entry.clone();
            if let Some(origin) = self.origins.get(name) {
                let prefix = url_prefix(origin);
                if default_prefix.as_deref() != Some(prefix) {
                    entry.git_prefix = Some(prefix.to_string());
                }
            }

            let existing_commit = services.get(name).and_then(|e| e.commit.as_ref());
            if existing_commit.is_some() && existing_commit == entry.commit.as_ref() {
                debug!("{} commit has not changed, keeping existing entry", name);
                continue;
            }
            changed = true;
            services.insert(name.clone(), entry);
        }

        let artifact_sources = ArtifactSources {
            git_prefix: default_prefix,
            other: base_sources.other.clone(),
        };

        if let Some(base) = &self.base {
            if !changed && base.artifact_sources == artifact_sources {
                return base.clone();
            }
        }

        Bom {
            version: version.to_string(),
            timestamp: Some(timestamp.to_string()),
            artifact_sources,
            dependencies: self.base.as_ref().and_then(|bom| bom.dependencies.clone()),
            services,
        }
    }
}

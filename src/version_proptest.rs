//! Property-based tests for version bump determination.

#[cfg(test)]
mod proptest_tests {
    use crate::version::{BumpLevel, CommitMessage, SemanticVersion, VersionBump};
    use proptest::prelude::*;

    fn version_strategy() -> impl Strategy<Value = SemanticVersion> {
        (0u64..50, 0u64..50, 0u64..50).prop_map(|(major, minor, patch)| {
            SemanticVersion::new(major, minor, patch)
        })
    }

    fn subject_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z ]{0,20}[a-z]"
    }

    fn commits_from(messages: &[String]) -> Vec<CommitMessage> {
        messages
            .iter()
            .enumerate()
            .map(|(i, message)| CommitMessage::new(&format!("{:040x}", i + 1), message))
            .collect()
    }

    // ========================================================================
    // Bump level properties
    // ========================================================================

    proptest! {
        /// Property: fixes and non-conforming messages only ever bump the patch
        #[test]
        fn patch_only_without_feat_or_breaking(
            previous in version_strategy(),
            subjects in prop::collection::vec(subject_strategy(), 1..8),
            conforming in prop::collection::vec(any::<bool>(), 8),
        ) {
            let messages: Vec<String> = subjects
                .iter()
                .zip(conforming.iter())
                .map(|(subject, conforming)| {
                    if *conforming {
                        format!("fix(core): {}", subject)
                    } else {
                        subject.clone()
                    }
                })
                .collect();
            let bump = VersionBump::determine(&previous, &commits_from(&messages)).unwrap();
            prop_assert_eq!(bump.level, BumpLevel::Patch);
            prop_assert_eq!(
                bump.version,
                SemanticVersion::new(previous.major, previous.minor, previous.patch + 1)
            );
        }

        /// Property: a single feat among fixes bumps the minor and resets the patch
        #[test]
        fn feat_bumps_minor(
            previous in version_strategy(),
            subjects in prop::collection::vec(subject_strategy(), 1..8),
            feat_index in 0usize..8,
        ) {
            let feat_index = feat_index % subjects.len();
            let messages: Vec<String> = subjects
                .iter()
                .enumerate()
                .map(|(i, subject)| {
                    let kind = if i == feat_index { "feat" } else { "fix" };
                    format!("{}(api): {}", kind, subject)
                })
                .collect();
            let bump = VersionBump::determine(&previous, &commits_from(&messages)).unwrap();
            prop_assert_eq!(bump.level, BumpLevel::Minor);
            prop_assert_eq!(
                bump.version,
                SemanticVersion::new(previous.major, previous.minor + 1, 0)
            );
        }

        /// Property: one breaking change anywhere forces a major bump
        #[test]
        fn breaking_change_bumps_major(
            previous in version_strategy(),
            subjects in prop::collection::vec(subject_strategy(), 1..8),
            breaking_index in 0usize..8,
        ) {
            let breaking_index = breaking_index % subjects.len();
            let messages: Vec<String> = subjects
                .iter()
                .enumerate()
                .map(|(i, subject)| {
                    if i == breaking_index {
                        format!("chore(deps): {}\n\nBREAKING CHANGE: removed it", subject)
                    } else {
                        format!("feat(api): {}", subject)
                    }
                })
                .collect();
            let bump = VersionBump::determine(&previous, &commits_from(&messages)).unwrap();
            prop_assert_eq!(bump.level, BumpLevel::Major);
            prop_assert_eq!(bump.version, SemanticVersion::new(previous.major + 1, 0, 0));
        }
    }

    // ========================================================================
    // Anchoring properties
    // ========================================================================

    proptest! {
        /// Property: the new tag always belongs on the newest commit
        #[test]
        fn bump_is_anchored_on_newest_commit(
            previous in version_strategy(),
            subjects in prop::collection::vec(subject_strategy(), 1..8),
        ) {
            let messages: Vec<String> = subjects
                .iter()
                .map(|subject| format!("fix: {}", subject))
                .collect();
            let commits = commits_from(&messages);
            let bump = VersionBump::determine(&previous, &commits).unwrap();
            prop_assert_eq!(&bump.commit_id, &commits[0].commit_id);
            prop_assert!(bump.version > previous);
        }

        /// Property: no commits means no bump
        #[test]
        fn no_commits_no_bump(previous in version_strategy()) {
            prop_assert!(VersionBump::determine(&previous, &[]).is_none());
        }
    }
}

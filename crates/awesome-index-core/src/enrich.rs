//! Repository metadata enrichment.
//!
//! Projects whose URL points at a GitHub repository carry stars and
//! primary language. Those fields are not part of the content fingerprint,
//! so syncs never touch them; enrichment is the only writer. A project
//! whose metadata changed becomes an update with a revision bump, which
//! makes the index writer (and the reconciler) pick it up like any other
//! change.

use std::collections::{BTreeSet, HashMap};

use crate::client::RepoMetadata;
use crate::models::Project;
use crate::normalize::Changeset;

/// Distinct repositories of the live projects in `projects`, sorted.
pub fn repos_to_enrich(projects: &[Project]) -> Vec<String> {
    projects
        .iter()
        .filter(|p| !p.is_tombstoned())
        .filter_map(|p| p.github_repo.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Updates for every live project whose stored metadata differs from
/// `metadata`. Repositories missing from `metadata` are left as they are.
pub fn enrichment_changes(
    projects: &[Project],
    metadata: &HashMap<String, RepoMetadata>,
    now: i64,
) -> Changeset {
    let mut changes = Changeset::default();
    for project in projects.iter().filter(|p| !p.is_tombstoned()) {
        let Some(meta) = project.github_repo.as_ref().and_then(|r| metadata.get(r)) else {
            continue;
        };
        if project.github_stars == Some(meta.stars) && project.github_language == meta.language {
            changes.unchanged += 1;
            continue;
        }
        changes.updates.push(Project {
            github_stars: Some(meta.stars),
            github_language: meta.language.clone(),
            revision: project.revision + 1,
            updated_at: now,
            ..project.clone()
        });
    }
    changes
}

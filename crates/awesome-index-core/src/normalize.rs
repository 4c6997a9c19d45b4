//! Entry normalization and change detection.
//!
//! Turns a fresh sequence of [`CandidateEntry`]s into a [`Changeset`]
//! against the projects already stored for a source:
//!
//! | Candidate matches an existing project? | Fingerprint | Result |
//! |----------------------------------------|-------------|--------|
//! | yes, live | equal | unchanged (position refreshed if it moved) |
//! | yes, live | differs | update (revision + 1) |
//! | yes, tombstoned | any | update, tombstone cleared |
//! | no | - | insert (revision 1) |
//!
//! Stored projects that the fresh sequence does not yield are tombstoned
//! first and purged once they have been absent from
//! [`TombstonePolicy::purge_after_misses`] extractions of *different*
//! content. Re-processing the same content never advances the counter.
//!
//! The diff is pure: running it twice on identical input, with the first
//! changeset applied in between, yields an empty second changeset.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::{CandidateEntry, Project, Tombstone};

/// Query parameters that only identify the referrer.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid"];

/// First path segments on github.com that are not repository owners.
const GITHUB_RESERVED: &[&str] = &[
    "about",
    "collections",
    "features",
    "marketplace",
    "orgs",
    "settings",
    "sponsors",
    "topics",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonicalize a target URL.
///
/// Lowercases scheme and host, drops default ports and credentials, strips
/// tracking query parameters and trailing slashes, and preserves path case
/// and fragments. Returns `None` for anything but absolute http(s) URLs.
///
/// ```rust
/// use awesome_index_core::normalize::normalize_url;
///
/// assert_eq!(
///     normalize_url("https://Example.com/x/?utm_source=list").as_deref(),
///     Some("https://example.com/x"),
/// );
/// ```
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str().filter(|h| !h.is_empty())?;

    let mut out = format!("{}://{}", parsed.scheme(), host.to_ascii_lowercase());
    if let Some(port) = parsed.port() {
        let _ = write!(out, ":{}", port);
    }
    out.push_str(parsed.path().trim_end_matches('/'));

    if let Some(query) = parsed.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| !is_tracking_param(pair.split('=').next().unwrap_or_default()))
            .collect();
        if !kept.is_empty() {
            out.push('?');
            out.push_str(&kept.join("&"));
        }
    }
    if let Some(fragment) = parsed.fragment().filter(|f| !f.is_empty()) {
        out.push('#');
        out.push_str(fragment);
    }
    Some(out)
}

/// Trim and collapse runs of whitespace to a single space.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `owner/name` of a GitHub repository URL, if it is one.
pub fn github_repo(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if host != "github.com" && host != "www.github.com" {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let name = segments.next()?.trim_end_matches(".git");
    if name.is_empty() || GITHUB_RESERVED.contains(&owner.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(format!("{}/{}", owner, name))
}

/// SHA-256 over the fields that make up a project's visible content.
pub fn fingerprint(name: &str, description: Option<&str>, category_path: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    for (i, heading) in category_path.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1fu8]);
        }
        hasher.update(heading.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// A candidate after canonicalization, not yet matched against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEntry {
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub category_path: Vec<String>,
    pub github_repo: Option<String>,
    pub position: i64,
    pub fingerprint: String,
}

/// Canonicalize one candidate. `None` if its target cannot be normalized.
pub fn normalize_entry(entry: &CandidateEntry) -> Option<NormalizedEntry> {
    let url = normalize_url(&entry.target)?;
    let name = clean_text(&entry.name);
    let description = entry
        .description
        .as_deref()
        .map(clean_text)
        .filter(|d| !d.is_empty());
    let fingerprint = fingerprint(&name, description.as_deref(), &entry.category_path);
    Some(NormalizedEntry {
        github_repo: github_repo(&url),
        url,
        name,
        description,
        category_path: entry.category_path.clone(),
        position: entry.position as i64,
        fingerprint,
    })
}

/// How long absent projects are kept before purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TombstonePolicy {
    pub purge_after_misses: u32,
}

impl Default for TombstonePolicy {
    fn default() -> Self {
        Self {
            purge_after_misses: 2,
        }
    }
}

/// Result of diffing fresh candidates against stored projects.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub inserts: Vec<Project>,
    pub updates: Vec<Project>,
    /// Projects newly tombstoned or whose miss counter advanced.
    pub tombstones: Vec<Project>,
    pub purges: Vec<Project>,
    /// Unchanged projects whose position in the document moved. Persisted
    /// without a revision bump; the index does not carry position.
    pub moves: Vec<Project>,
    pub unchanged: usize,
    /// Candidates whose canonical URL repeated an earlier candidate's.
    pub duplicates: usize,
    /// Candidates whose target could not be normalized.
    pub rejected: usize,
}

impl Changeset {
    /// Nothing to persist.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.tombstones.is_empty()
            && self.purges.is_empty()
            && self.moves.is_empty()
    }

    /// Projects whose index document must be (re)written.
    pub fn upserts(&self) -> impl Iterator<Item = &Project> {
        self.inserts.iter().chain(self.updates.iter())
    }
}

/// Compute the three-way diff for one source.
///
/// `existing` is the full stored project set for `source_id`, tombstoned
/// projects included. `content_fingerprint` identifies the document the
/// candidates came from. `now` stamps new and changed projects.
pub fn diff<I>(
    source_id: &str,
    existing: &[Project],
    candidates: I,
    content_fingerprint: &str,
    policy: TombstonePolicy,
    now: i64,
) -> Changeset
where
    I: IntoIterator<Item = CandidateEntry>,
{
    let by_url: HashMap<&str, &Project> =
        existing.iter().map(|p| (p.url.as_str(), p)).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut changes = Changeset::default();

    for candidate in candidates {
        let Some(entry) = normalize_entry(&candidate) else {
            changes.rejected += 1;
            continue;
        };
        if !seen.insert(entry.url.clone()) {
            changes.duplicates += 1;
            continue;
        }

        match by_url.get(entry.url.as_str()) {
            Some(current) if current.tombstone.is_none() && current.fingerprint == entry.fingerprint => {
                changes.unchanged += 1;
                if current.position != entry.position {
                    changes.moves.push(Project {
                        position: entry.position,
                        ..(*current).clone()
                    });
                }
            }
            Some(current) => {
                changes.updates.push(Project {
                    name: entry.name,
                    description: entry.description,
                    category_path: entry.category_path,
                    github_repo: entry.github_repo,
                    position: entry.position,
                    fingerprint: entry.fingerprint,
                    revision: current.revision + 1,
                    tombstone: None,
                    updated_at: now,
                    ..(*current).clone()
                });
            }
            None => {
                changes.inserts.push(Project {
                    source_id: source_id.to_string(),
                    url: entry.url,
                    name: entry.name,
                    description: entry.description,
                    category_path: entry.category_path,
                    github_repo: entry.github_repo,
                    github_stars: None,
                    github_language: None,
                    position: entry.position,
                    fingerprint: entry.fingerprint,
                    revision: 1,
                    tombstone: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
    }

    for project in existing.iter().filter(|p| !seen.contains(&p.url)) {
        let misses = match &project.tombstone {
            Some(t) if t.content_fingerprint == content_fingerprint => {
                changes.unchanged += 1;
                continue;
            }
            Some(t) => t.misses + 1,
            None => 1,
        };
        let marked = Project {
            tombstone: Some(Tombstone {
                misses,
                content_fingerprint: content_fingerprint.to_string(),
            }),
            ..project.clone()
        };
        if misses >= policy.purge_after_misses {
            changes.purges.push(marked);
        } else {
            changes.tombstones.push(marked);
        }
    }

    changes
}

/// Apply a changeset to an in-memory project list, as a store would.
///
/// Used by the in-memory store and by tests that chain several runs.
pub fn apply_to(projects: &mut Vec<Project>, changes: &Changeset) {
    let purged: HashSet<&str> = changes.purges.iter().map(|p| p.url.as_str()).collect();
    projects.retain(|p| !purged.contains(p.url.as_str()));
    for changed in changes
        .updates
        .iter()
        .chain(changes.tombstones.iter())
        .chain(changes.moves.iter())
    {
        if let Some(slot) = projects.iter_mut().find(|p| p.url == changed.url) {
            *slot = changed.clone();
        }
    }
    projects.extend(changes.inserts.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, target: &str, description: Option<&str>) -> CandidateEntry {
        CandidateEntry {
            name: name.into(),
            target: target.into(),
            description: description.map(String::from),
            category_path: vec!["Tools".into()],
            position: 0,
            line: 1,
        }
    }

    fn run(
        projects: &mut Vec<Project>,
        candidates: Vec<CandidateEntry>,
        fp: &str,
    ) -> Changeset {
        let changes = diff("o/list", projects, candidates, fp, TombstonePolicy::default(), 100);
        apply_to(projects, &changes);
        changes
    }

    #[test]
    fn test_normalize_url_rules() {
        assert_eq!(
            normalize_url("https://Example.com/x/").as_deref(),
            Some("https://example.com/x")
        );
        assert_eq!(normalize_url("https://a.com").as_deref(), Some("https://a.com"));
        assert_eq!(normalize_url("https://a.com/").as_deref(), Some("https://a.com"));
        assert_eq!(
            normalize_url("HTTPS://GitHub.com/Rust-Lang/Rust").as_deref(),
            Some("https://github.com/Rust-Lang/Rust")
        );
        assert_eq!(
            normalize_url("https://a.com/p?utm_source=x&id=3&fbclid=abc").as_deref(),
            Some("https://a.com/p?id=3")
        );
        assert_eq!(
            normalize_url("http://a.com:80/p#usage").as_deref(),
            Some("http://a.com/p#usage")
        );
        assert_eq!(
            normalize_url("https://a.com:8443/").as_deref(),
            Some("https://a.com:8443")
        );
        assert_eq!(normalize_url("ftp://a.com/file"), None);
        assert_eq!(normalize_url("#anchor"), None);
    }

    #[test]
    fn test_normalize_url_idempotent() {
        for raw in [
            "https://Example.com/x/",
            "https://a.com/p?utm_medium=y&q=rust%20lang",
            "https://a.com/A/B/#Frag",
        ] {
            let once = normalize_url(raw).unwrap();
            assert_eq!(normalize_url(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  a   b\t\nc "), "a b c");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn test_github_repo() {
        assert_eq!(
            github_repo("https://github.com/tokio-rs/tokio").as_deref(),
            Some("tokio-rs/tokio")
        );
        assert_eq!(
            github_repo("https://www.github.com/a/b.git/tree/main").as_deref(),
            Some("a/b")
        );
        assert_eq!(github_repo("https://github.com/topics/rust"), None);
        assert_eq!(github_repo("https://github.com/solo"), None);
        assert_eq!(github_repo("https://gitlab.com/a/b"), None);
    }

    #[test]
    fn test_round_trip_candidate_to_project() {
        let mut projects = Vec::new();
        let changes = run(
            &mut projects,
            vec![candidate("Foo", "https://Example.com/x/", Some("bar"))],
            "fp1",
        );
        assert_eq!(changes.inserts.len(), 1);
        let p = &changes.inserts[0];
        assert_eq!(p.url, "https://example.com/x");
        assert_eq!(p.name, "Foo");
        assert_eq!(p.description.as_deref(), Some("bar"));
        assert_eq!(p.revision, 1);
        let doc = crate::models::IndexDocument::from_project(p);
        assert_eq!(doc.revision, p.revision);
    }

    #[test]
    fn test_idempotent_second_pass() {
        let mut projects = Vec::new();
        let fresh = vec![
            candidate("A", "https://a.com", Some("one")),
            candidate("B", "https://b.com/", None),
        ];
        let first = run(&mut projects, fresh.clone(), "fp1");
        assert_eq!(first.inserts.len(), 2);
        let second = run(&mut projects, fresh, "fp1");
        assert!(second.is_empty());
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn test_update_on_field_change() {
        let mut projects = Vec::new();
        run(&mut projects, vec![candidate("A", "https://a.com", Some("one"))], "fp1");
        let changes = run(
            &mut projects,
            vec![candidate("A", "https://a.com/", Some("one  improved"))],
            "fp2",
        );
        assert_eq!(changes.updates.len(), 1);
        assert!(changes.inserts.is_empty());
        assert_eq!(changes.updates[0].revision, 2);
        assert_eq!(changes.updates[0].description.as_deref(), Some("one improved"));
        assert_eq!(changes.updates[0].created_at, 100);
    }

    #[test]
    fn test_whitespace_only_change_is_noop() {
        let mut projects = Vec::new();
        run(&mut projects, vec![candidate("A  B", "https://a.com", Some("x"))], "fp1");
        let changes = run(&mut projects, vec![candidate(" A B ", "https://a.com", Some(" x"))], "fp2");
        assert!(changes.is_empty());
    }

    #[test]
    fn test_normalized_duplicates_collapse() {
        let mut projects = Vec::new();
        let changes = run(
            &mut projects,
            vec![
                candidate("A", "https://a.com/x", None),
                candidate("A again", "https://A.com/x/?utm_source=z", None),
            ],
            "fp1",
        );
        assert_eq!(changes.inserts.len(), 1);
        assert_eq!(changes.inserts[0].name, "A");
        assert_eq!(changes.duplicates, 1);
    }

    #[test]
    fn test_reorder_refreshes_position_only() {
        let mut projects = Vec::new();
        let mut a = candidate("A", "https://a.com", None);
        let mut b = candidate("B", "https://b.com", None);
        b.position = 1;
        run(&mut projects, vec![a.clone(), b.clone()], "fp1");

        a.position = 1;
        b.position = 0;
        let changes = run(&mut projects, vec![b, a], "fp2");
        assert!(changes.updates.is_empty());
        assert_eq!(changes.unchanged, 2);
        assert_eq!(changes.moves.len(), 2);
        assert!(!changes.is_empty());
        assert_eq!(changes.upserts().count(), 0);

        let b = projects.iter().find(|p| p.url == "https://b.com").unwrap();
        assert_eq!(b.position, 0);
        assert_eq!(b.revision, 1);
    }

    #[test]
    fn test_update_keeps_enrichment() {
        let mut projects = Vec::new();
        run(&mut projects, vec![candidate("A", "https://github.com/o/a", Some("x"))], "fp1");
        projects[0].github_stars = Some(7);
        projects[0].github_language = Some("Rust".into());

        let changes = run(&mut projects, vec![candidate("A", "https://github.com/o/a", Some("y"))], "fp2");
        assert_eq!(changes.updates[0].github_stars, Some(7));
        assert_eq!(changes.updates[0].github_language.as_deref(), Some("Rust"));
    }

    #[test]
    fn test_tombstone_then_purge() {
        let mut projects = Vec::new();
        let both = vec![
            candidate("A", "https://a.com", None),
            candidate("B", "https://b.com", None),
        ];
        let only_a = vec![candidate("A", "https://a.com", None)];

        run(&mut projects, both, "n");
        let n1 = run(&mut projects, only_a.clone(), "n+1");
        assert_eq!(n1.tombstones.len(), 1);
        assert!(n1.purges.is_empty());
        let b = projects.iter().find(|p| p.url == "https://b.com").unwrap();
        assert_eq!(b.tombstone.as_ref().map(|t| t.misses), Some(1));

        let n2 = run(&mut projects, only_a, "n+2");
        assert_eq!(n2.purges.len(), 1);
        assert_eq!(n2.purges[0].url, "https://b.com");
        assert_eq!(projects.len(), 1);
    }

    #[test]
    fn test_same_content_does_not_advance_tombstone() {
        let mut projects = Vec::new();
        run(&mut projects, vec![candidate("B", "https://b.com", None)], "n");
        run(&mut projects, vec![], "n+1");
        let again = run(&mut projects, vec![], "n+1");
        assert!(again.is_empty());
        assert_eq!(projects.len(), 1);
    }

    #[test]
    fn test_reappearing_project_is_revived() {
        let mut projects = Vec::new();
        let b = vec![candidate("B", "https://b.com", None)];
        run(&mut projects, b.clone(), "n");
        run(&mut projects, vec![], "n+1");
        let revived = run(&mut projects, b, "n+2");
        assert_eq!(revived.updates.len(), 1);
        assert!(revived.updates[0].tombstone.is_none());
        assert_eq!(revived.updates[0].revision, 2);
        assert!(revived.purges.is_empty());
    }

    #[test]
    fn test_fingerprint_sensitive_to_fields() {
        let path = vec!["A".to_string(), "B".to_string()];
        let base = fingerprint("n", Some("d"), &path);
        assert_ne!(base, fingerprint("n2", Some("d"), &path));
        assert_ne!(base, fingerprint("n", None, &path));
        assert_ne!(base, fingerprint("n", Some("d"), &["A B".to_string()]));
        assert_eq!(base, fingerprint("n", Some("d"), &path));
    }
}

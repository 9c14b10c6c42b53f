//! Domain model: documents fetched for a run, the sections derived from them,
//! and the frozen handbook handed to a renderer.
//!
//! A [`DocumentSet`] is tagged with the [`RunId`] of the fetch that produced
//! it. Sections refer to documents by [`DocumentId`] and are only valid
//! against the set of their own run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{HandbookError, Result, Stage};

/// `owner/name` of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryLocator {
    pub owner: String,
    pub name: String,
}

impl RepositoryLocator {
    /// Accepts `owner/name`, `github.com/owner/name` or a full
    /// `https://github.com/owner/name[.git][/tree/...]` URL.
    ///
    /// Anything else is reported as [`HandbookError::NotFound`]: there is no
    /// repository behind an unparsable locator.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let path = if trimmed.contains("://") {
            let parsed = url::Url::parse(trimmed)
                .map_err(|_| HandbookError::not_found(trimmed, None))?;
            if parsed.host_str().is_none() {
                return Err(HandbookError::not_found(trimmed, None));
            }
            parsed.path().to_string()
        } else if let Some(rest) = trimmed.strip_prefix("github.com/") {
            rest.to_string()
        } else {
            trimmed.to_string()
        };

        let mut parts = path.trim_matches('/').split('/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default().trim_end_matches(".git");
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(owner) || !valid(name) {
            return Err(HandbookError::not_found(trimmed, None));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Identity of a fetched document within one run: the run that fetched it,
/// the repository and the exact, case-sensitive path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    pub run_id: RunId,
    pub repository: String,
    pub path: String,
}

/// One raw markdown file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub raw_text: String,
    pub source_repository: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Everything one fetch produced. Documents are keyed (and iterated) by path.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSet {
    run_id: RunId,
    repository: RepositoryLocator,
    branch: String,
    documents: BTreeMap<String, Document>,
    images: Vec<String>,
}

impl DocumentSet {
    /// Builds a set for a fresh run. Two documents with the same path are a
    /// validation error rather than a silent overwrite.
    pub fn new(
        repository: RepositoryLocator,
        branch: impl Into<String>,
        documents: Vec<Document>,
        mut images: Vec<String>,
    ) -> Result<Self> {
        let repo_name = repository.to_string();
        let mut by_path = BTreeMap::new();
        for doc in documents {
            if doc.source_repository != repo_name {
                return Err(HandbookError::validation(
                    Stage::Fetch,
                    format!(
                        "document {} belongs to {}, not {}",
                        doc.path, doc.source_repository, repo_name
                    ),
                ));
            }
            if let Some(previous) = by_path.insert(doc.path.clone(), doc) {
                return Err(HandbookError::validation(
                    Stage::Fetch,
                    format!("duplicate document path {}", previous.path),
                ));
            }
        }
        images.sort();
        images.dedup();
        Ok(Self {
            run_id: RunId::new(),
            repository,
            branch: branch.into(),
            documents: by_path,
            images,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn repository(&self) -> &RepositoryLocator {
        &self.repository
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Documents in path order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn paths(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    /// Reference to `doc` as fetched by this run.
    pub fn id_of(&self, doc: &Document) -> DocumentId {
        DocumentId {
            run_id: self.run_id,
            repository: doc.source_repository.clone(),
            path: doc.path.clone(),
        }
    }

    /// True when `id` was issued by this run and names one of its documents.
    pub fn resolves(&self, id: &DocumentId) -> bool {
        id.run_id == self.run_id
            && id.repository == self.repository.to_string()
            && self.documents.contains_key(&id.path)
    }

    /// Subset of this run's documents, keeping the run id so sections derived
    /// from the subset still resolve against the original fetch.
    pub fn restricted_to<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        let documents = paths
            .into_iter()
            .filter_map(|p| self.documents.get(p).map(|d| (p.to_string(), d.clone())))
            .collect();
        Self {
            run_id: self.run_id,
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            documents,
            images: self.images.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionId(pub Uuid);

impl SectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for SectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SectionId)
    }
}

/// One orderable unit of the handbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    pub summary_text: String,
    pub source_document_refs: Vec<DocumentId>,
    pub order_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandbookMetadata {
    pub repository: String,
    pub branch: String,
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    /// Image paths recorded by the fetch, for the gallery.
    pub images: Vec<String>,
}

/// Finalized, ordered sections. Only constructible through [`Handbook::new`],
/// which checks the invariants; there is no mutable access afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handbook {
    sections: Vec<Section>,
    metadata: HandbookMetadata,
}

impl Handbook {
    pub fn new(
        sections: Vec<Section>,
        documents: &DocumentSet,
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        if sections.is_empty() {
            return Err(HandbookError::validation(
                Stage::Preview,
                "a handbook needs at least one section",
            ));
        }
        validate_order(&sections, Stage::Preview)?;
        validate_refs(&sections, documents, Stage::Preview)?;
        Ok(Self {
            sections,
            metadata: HandbookMetadata {
                repository: documents.repository().to_string(),
                branch: documents.branch().to_string(),
                run_id: documents.run_id(),
                generated_at,
                images: documents.images().to_vec(),
            },
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn metadata(&self) -> &HandbookMetadata {
        &self.metadata
    }

    /// Hex SHA-256 over the ordered section content. `generated_at` and the
    /// run id are left out, so two handbooks with the same content agree.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.metadata.repository.as_bytes());
        hasher.update([0]);
        hasher.update(self.metadata.branch.as_bytes());
        for section in &self.sections {
            hasher.update([0xff]);
            hasher.update(section.order_index.to_le_bytes());
            hasher.update(section.title.as_bytes());
            hasher.update([0]);
            hasher.update(section.summary_text.as_bytes());
            for r in &section.source_document_refs {
                hasher.update([0]);
                hasher.update(r.path.as_bytes());
            }
        }
        for image in &self.metadata.images {
            hasher.update([0xfe]);
            hasher.update(image.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// `order_index` must be exactly `0..len` in sequence order.
pub fn validate_order(sections: &[Section], stage: Stage) -> Result<()> {
    for (expected, section) in sections.iter().enumerate() {
        if section.order_index != expected {
            return Err(HandbookError::validation(
                stage,
                format!(
                    "section '{}' has order_index {} at position {}",
                    section.title, section.order_index, expected
                ),
            ));
        }
    }
    Ok(())
}

/// Every section references at least one document of `documents`' run.
pub fn validate_refs(sections: &[Section], documents: &DocumentSet, stage: Stage) -> Result<()> {
    for section in sections {
        if section.source_document_refs.is_empty() {
            return Err(HandbookError::validation(
                stage,
                format!("section '{}' references no document", section.title),
            ));
        }
        if let Some(missing) = section
            .source_document_refs
            .iter()
            .find(|r| !documents.resolves(r))
        {
            return Err(HandbookError::validation(
                stage,
                format!(
                    "section '{}' references {}:{} from run {}, which is not part of run {}",
                    section.title,
                    missing.repository,
                    missing.path,
                    missing.run_id,
                    documents.run_id()
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str) -> Document {
        Document {
            path: path.into(),
            raw_text: format!("# {path}"),
            source_repository: "octo/docs".into(),
        }
    }

    fn locator() -> RepositoryLocator {
        RepositoryLocator::parse("octo/docs").unwrap()
    }

    fn section(set: &DocumentSet, path: &str, order_index: usize) -> Section {
        Section {
            id: SectionId::new(),
            title: path.into(),
            summary_text: "summary".into(),
            source_document_refs: vec![set.id_of(&doc(path))],
            order_index,
        }
    }

    #[test]
    fn parses_locator_forms() {
        let cases = [
            "octo/docs",
            "github.com/octo/docs",
            "https://github.com/octo/docs",
            "https://github.com/octo/docs.git",
            "https://github.com/octo/docs/tree/main/guides",
        ];
        for raw in cases {
            let loc = RepositoryLocator::parse(raw).unwrap();
            assert_eq!(loc.to_string(), "octo/docs", "{raw}");
        }
    }

    #[test]
    fn rejects_invalid_locators_as_not_found() {
        for raw in ["", "octo", "https://github.com/", "not a repo/at all", "https://"] {
            let err = RepositoryLocator::parse(raw).unwrap_err();
            assert!(matches!(err, HandbookError::NotFound { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn document_set_is_sorted_and_unique() {
        let set = DocumentSet::new(
            locator(),
            "main",
            vec![doc("SETUP.md"), doc("API.md"), doc("README.md")],
            vec!["img/b.png".into(), "img/a.png".into(), "img/a.png".into()],
        )
        .unwrap();
        assert_eq!(set.paths(), vec!["API.md", "README.md", "SETUP.md"]);
        assert_eq!(set.images(), ["img/a.png", "img/b.png"]);

        let err = DocumentSet::new(locator(), "main", vec![doc("A.md"), doc("A.md")], vec![])
            .unwrap_err();
        assert!(matches!(err, HandbookError::Validation { .. }));
    }

    #[test]
    fn paths_are_case_sensitive() {
        let set = DocumentSet::new(locator(), "main", vec![doc("README.md"), doc("readme.md")], vec![])
            .unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.get("Readme.md").is_none());
    }

    #[test]
    fn restricted_set_keeps_run() {
        let set = DocumentSet::new(locator(), "main", vec![doc("A.md"), doc("B.md")], vec![]).unwrap();
        let subset = set.restricted_to(["B.md", "missing.md"]);
        assert_eq!(subset.run_id(), set.run_id());
        assert_eq!(subset.paths(), vec!["B.md"]);
    }

    #[test]
    fn handbook_rejects_gaps_and_foreign_refs() {
        let set = DocumentSet::new(locator(), "main", vec![doc("A.md"), doc("B.md")], vec![]).unwrap();

        let gap = vec![section(&set, "A.md", 0), section(&set, "B.md", 2)];
        assert!(Handbook::new(gap, &set, Utc::now()).is_err());

        let foreign = vec![section(&set, "A.md", 0), section(&set, "C.md", 1)];
        assert!(Handbook::new(foreign, &set, Utc::now()).is_err());

        let ok = Handbook::new(
            vec![section(&set, "B.md", 0), section(&set, "A.md", 1)],
            &set,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(ok.metadata().run_id, set.run_id());
    }

    #[test]
    fn sections_of_an_earlier_run_do_not_resolve() {
        let earlier = DocumentSet::new(locator(), "main", vec![doc("README.md")], vec![]).unwrap();
        let current = DocumentSet::new(locator(), "main", vec![doc("README.md")], vec![]).unwrap();
        assert_ne!(earlier.run_id(), current.run_id());

        let stale = vec![section(&earlier, "README.md", 0)];
        assert!(!current.resolves(&stale[0].source_document_refs[0]));
        let err = Handbook::new(stale, &current, Utc::now()).unwrap_err();
        assert!(matches!(err, HandbookError::Validation { .. }));
        assert!(err.to_string().contains(&earlier.run_id().to_string()));
    }

    #[test]
    fn digest_ignores_generation_time() {
        let set = DocumentSet::new(locator(), "main", vec![doc("A.md")], vec![]).unwrap();
        let sections = vec![section(&set, "A.md", 0)];
        let first = Handbook::new(sections.clone(), &set, Utc::now()).unwrap();
        let later = Handbook::new(
            sections,
            &set,
            Utc::now() + chrono::Duration::hours(3),
        )
        .unwrap();
        assert_eq!(first.content_digest(), later.content_digest());
    }
}

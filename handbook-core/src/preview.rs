//! Human review of organizer output.
//!
//! A [`PreviewSession`] owns the draft sections of one run together with an
//! include flag per section. Every operation applies immediately and leaves
//! `order_index` equal to the position in the draft (`0..len`). Excluded
//! sections keep their place so they can be switched back on; they are
//! dropped and the rest re-indexed when the session is finalized.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::contract::{DocumentFailure, Organized};
use crate::error::{HandbookError, Result, Stage};
use crate::model::{validate_order, validate_refs, DocumentSet, Handbook, Section, SectionId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftSection {
    pub section: Section,
    pub included: bool,
}

#[derive(Debug, Clone)]
pub struct PreviewSession {
    documents: DocumentSet,
    drafts: Vec<DraftSection>,
    failures: Vec<DocumentFailure>,
}

impl PreviewSession {
    /// Opens a session over organizer output. The sections must already be
    /// contiguous and reference only `documents`.
    pub fn new(documents: DocumentSet, organized: Organized) -> Result<Self> {
        validate_order(&organized.sections, Stage::Organize)?;
        validate_refs(&organized.sections, &documents, Stage::Organize)?;
        info!(
            run_id = %documents.run_id(),
            sections = organized.sections.len(),
            failures = organized.failures.len(),
            "Preview session opened"
        );
        Ok(Self {
            documents,
            drafts: organized
                .sections
                .into_iter()
                .map(|section| DraftSection {
                    section,
                    included: true,
                })
                .collect(),
            failures: organized.failures,
        })
    }

    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn drafts(&self) -> &[DraftSection] {
        &self.drafts
    }

    /// Sections in current order, excluded ones included.
    pub fn sections(&self) -> impl Iterator<Item = &Section> + '_ {
        self.drafts.iter().map(|d| &d.section)
    }

    /// Documents the organizer reported as failed for this session.
    pub fn failures(&self) -> &[DocumentFailure] {
        &self.failures
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.drafts
            .iter()
            .find(|d| d.section.id == id)
            .map(|d| &d.section)
    }

    fn position(&self, id: SectionId) -> Result<usize> {
        self.drafts
            .iter()
            .position(|d| d.section.id == id)
            .ok_or_else(|| HandbookError::validation(Stage::Preview, format!("unknown section {id}")))
    }

    /// Moves a section to `new_index`, shifting the ones in between.
    pub fn reorder(&mut self, id: SectionId, new_index: usize) -> Result<()> {
        let from = self.position(id)?;
        if new_index >= self.drafts.len() {
            return Err(HandbookError::validation(
                Stage::Preview,
                format!(
                    "index {new_index} out of range for {} sections",
                    self.drafts.len()
                ),
            ));
        }
        let draft = self.drafts.remove(from);
        self.drafts.insert(new_index, draft);
        self.reindex();
        debug!(section = %id, from, to = new_index, "Section reordered");
        validate_order(&self.sections_snapshot(), Stage::Preview)
    }

    pub fn edit_text(&mut self, id: SectionId, new_summary_text: impl Into<String>) -> Result<()> {
        let text = new_summary_text.into();
        if text.trim().is_empty() {
            return Err(HandbookError::validation(
                Stage::Preview,
                "summary text cannot be empty",
            ));
        }
        let at = self.position(id)?;
        self.drafts[at].section.summary_text = text;
        debug!(section = %id, "Section text edited");
        Ok(())
    }

    pub fn edit_title(&mut self, id: SectionId, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(HandbookError::validation(Stage::Preview, "title cannot be empty"));
        }
        let at = self.position(id)?;
        self.drafts[at].section.title = title.trim().to_string();
        Ok(())
    }

    pub fn toggle_include(&mut self, id: SectionId, include: bool) -> Result<()> {
        let at = self.position(id)?;
        self.drafts[at].included = include;
        debug!(section = %id, include, "Section inclusion toggled");
        validate_order(&self.sections_snapshot(), Stage::Preview)
    }

    /// Paths behind the included sections, in draft order.
    pub fn included_paths(&self) -> Vec<String> {
        self.drafts
            .iter()
            .filter(|d| d.included)
            .flat_map(|d| d.section.source_document_refs.iter().map(|r| r.path.clone()))
            .collect()
    }

    /// Freezes the included sections into a [`Handbook`].
    pub fn finalize(&self, generated_at: DateTime<Utc>) -> Result<Handbook> {
        let sections: Vec<Section> = self
            .drafts
            .iter()
            .filter(|d| d.included)
            .enumerate()
            .map(|(order_index, d)| Section {
                order_index,
                ..d.section.clone()
            })
            .collect();
        if sections.is_empty() {
            return Err(HandbookError::validation(
                Stage::Preview,
                "every section is excluded; include at least one before generating",
            ));
        }
        Handbook::new(sections, &self.documents, generated_at)
    }

    fn reindex(&mut self) {
        for (i, draft) in self.drafts.iter_mut().enumerate() {
            draft.section.order_index = i;
        }
    }

    fn sections_snapshot(&self) -> Vec<Section> {
        self.drafts.iter().map(|d| d.section.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, RepositoryLocator};

    fn session() -> PreviewSession {
        let docs: Vec<Document> = ["README.md", "SETUP.md", "API.md"]
            .iter()
            .map(|p| Document {
                path: p.to_string(),
                raw_text: format!("# {p}"),
                source_repository: "octo/docs".into(),
            })
            .collect();
        let set = DocumentSet::new(
            RepositoryLocator::parse("octo/docs").unwrap(),
            "main",
            docs.clone(),
            vec![],
        )
        .unwrap();
        let sections = docs
            .iter()
            .enumerate()
            .map(|(i, d)| Section {
                id: SectionId::new(),
                title: d.path.trim_end_matches(".md").to_string(),
                summary_text: format!("About {}", d.path),
                source_document_refs: vec![set.id_of(d)],
                order_index: i,
            })
            .collect();
        PreviewSession::new(
            set,
            Organized {
                sections,
                failures: vec![],
            },
        )
        .unwrap()
    }

    fn id_of(session: &PreviewSession, title: &str) -> SectionId {
        session
            .drafts()
            .iter()
            .find(|d| d.section.title == title)
            .map(|d| d.section.id)
            .unwrap()
    }

    fn titles(session: &PreviewSession) -> Vec<String> {
        session.sections().map(|s| s.title.clone()).collect()
    }

    fn assert_contiguous(session: &PreviewSession) {
        let indices: Vec<usize> = session.sections().map(|s| s.order_index).collect();
        let expected: Vec<usize> = (0..session.drafts().len()).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn reorder_setup_to_front_shifts_the_rest() {
        let mut s = session();
        let setup = id_of(&s, "SETUP");
        s.reorder(setup, 0).unwrap();
        assert_eq!(titles(&s), vec!["SETUP", "README", "API"]);
        assert_eq!(s.section(setup).unwrap().order_index, 0);
        assert_contiguous(&s);
    }

    #[test]
    fn indices_stay_contiguous_over_any_operation_sequence() {
        let mut s = session();
        let ids: Vec<SectionId> = s.drafts().iter().map(|d| d.section.id).collect();
        for step in 0..30usize {
            let id = ids[step % ids.len()];
            if step % 3 == 0 {
                s.toggle_include(id, step % 2 == 0).unwrap();
            } else {
                s.reorder(id, (step * 7) % ids.len()).unwrap();
            }
            assert_contiguous(&s);
        }
    }

    #[test]
    fn out_of_range_and_unknown_ids_are_rejected() {
        let mut s = session();
        let api = id_of(&s, "API");
        assert!(matches!(
            s.reorder(api, 3),
            Err(HandbookError::Validation { .. })
        ));
        assert!(s.reorder(SectionId::new(), 0).is_err());
        assert!(s.edit_text(api, "   ").is_err());
        assert_eq!(titles(&s), vec!["README", "SETUP", "API"]);
    }

    #[test]
    fn finalize_drops_excluded_and_reindexes() {
        let mut s = session();
        let readme = id_of(&s, "README");
        let api = id_of(&s, "API");
        s.toggle_include(readme, false).unwrap();
        s.edit_text(api, "Edited API summary").unwrap();
        s.edit_title(api, "  HTTP API ").unwrap();

        let handbook = s.finalize(Utc::now()).unwrap();
        let sections = handbook.sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "SETUP");
        assert_eq!(sections[1].title, "HTTP API");
        assert_eq!(sections[1].summary_text, "Edited API summary");
        assert_eq!(sections[1].order_index, 1);
        assert_eq!(s.included_paths(), vec!["SETUP.md", "API.md"]);
    }

    #[test]
    fn finalize_with_nothing_included_fails() {
        let mut s = session();
        let ids: Vec<SectionId> = s.drafts().iter().map(|d| d.section.id).collect();
        for id in ids {
            s.toggle_include(id, false).unwrap();
        }
        assert!(s.finalize(Utc::now()).is_err());
    }

    #[test]
    fn sections_from_another_run_are_rejected() {
        let s = session();
        // Same repository, same paths, fetched again.
        let refetched = DocumentSet::new(
            RepositoryLocator::parse("octo/docs").unwrap(),
            "main",
            s.documents().iter().cloned().collect(),
            vec![],
        )
        .unwrap();
        assert_eq!(refetched.paths(), s.documents().paths());

        let sections = s.sections().cloned().collect();
        let err = PreviewSession::new(
            refetched,
            Organized {
                sections,
                failures: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(err, HandbookError::Validation { .. }));
    }
}

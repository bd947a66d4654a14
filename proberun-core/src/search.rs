//! 1:N search with candidate reconciliation.
//!
//! Backends may return fewer hits than the gallery holds. [`reconcile`] pads
//! each probe's list with every missing gallery id at similarity `0.0`, so
//! every probe yields exactly one candidate per gallery entry.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use tracing::{info, instrument, warn};

use crate::{
    backend::{Backend, SearchHit},
    error::Result,
    harness::{Harness, load_gallery, load_templates, release_gallery, release_templates},
    manifest::{CsvWriter, ManifestEntry, read_manifest},
    metrics::{Category, ErrorClass, MetricsCollector},
    track::{SubjectId, TemplateId},
};

/// Header of the candidate file.
pub const SEARCH_HEADER: &str = "PROBE_ID,RANK,GALLERY_ID,SIMILARITY,GENUINE";

/// One row of a probe's candidate list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Gallery template id.
    pub gallery_id: TemplateId,
    /// 0-based position in the probe's list.
    pub rank: usize,
    /// Backend similarity, or `0.0` for padded entries.
    pub similarity: f32,
    /// Whether probe and gallery template share a subject.
    pub genuine: bool,
}

/// Gallery ids in manifest order with their subjects.
#[derive(Debug, Clone, Default)]
pub struct GalleryIndex {
    order: Vec<(TemplateId, SubjectId)>,
    subjects: HashMap<TemplateId, SubjectId>,
}

impl GalleryIndex {
    /// Builds an index from `(template_id, subject_id)` pairs. Repeated ids
    /// keep their first position and subject.
    ///
    /// # Examples
    /// ```
    /// use proberun_core::GalleryIndex;
    ///
    /// let index = GalleryIndex::new([(10, 1), (11, 2), (10, 3)]);
    /// assert_eq!(index.len(), 2);
    /// assert_eq!(index.subject(10), Some(1));
    /// ```
    pub fn new(entries: impl IntoIterator<Item = (TemplateId, SubjectId)>) -> Self {
        let mut index = Self::default();
        for (id, subject) in entries {
            if let std::collections::hash_map::Entry::Vacant(slot) = index.subjects.entry(id) {
                slot.insert(subject);
                index.order.push((id, subject));
            }
        }
        index
    }

    /// Builds an index from manifest entries.
    #[must_use]
    pub fn from_manifest(entries: &[ManifestEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|entry| (entry.template_id, entry.subject_id)),
        )
    }

    /// Number of distinct gallery ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the gallery is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Subject of a gallery id.
    #[must_use]
    pub fn subject(&self, id: TemplateId) -> Option<SubjectId> {
        self.subjects.get(&id).copied()
    }
}

/// Turns a probe's backend hits into a full candidate list.
///
/// Hits keep their backend order. Ids unknown to the index and repeated ids
/// are dropped with a warning. Every gallery id not hit follows in index
/// order with similarity `0.0`. The result always has `index.len()` entries.
///
/// # Examples
/// ```
/// use proberun_core::{GalleryIndex, SearchHit, reconcile};
///
/// let index = GalleryIndex::new([(10, 1), (11, 2), (12, 1)]);
/// let hits = [SearchHit { id: 12, similarity: 0.8 }];
/// let candidates = reconcile(1, &hits, &index);
/// let ids: Vec<_> = candidates.iter().map(|c| c.gallery_id).collect();
/// assert_eq!(ids, [12, 10, 11]);
/// assert!(candidates[0].genuine && !candidates[2].genuine);
/// ```
#[must_use]
pub fn reconcile(probe_subject: SubjectId, hits: &[SearchHit], index: &GalleryIndex) -> Vec<Candidate> {
    let mut seen = HashSet::with_capacity(index.len());
    let mut candidates = Vec::with_capacity(index.len());
    for hit in hits {
        let Some(subject) = index.subject(hit.id) else {
            warn!(gallery_id = hit.id, "search returned an id missing from the gallery");
            continue;
        };
        if !seen.insert(hit.id) {
            warn!(gallery_id = hit.id, "search returned a duplicate id");
            continue;
        }
        candidates.push(Candidate {
            gallery_id: hit.id,
            rank: candidates.len(),
            similarity: hit.similarity,
            genuine: subject == probe_subject,
        });
    }
    for &(id, subject) in &index.order {
        if seen.insert(id) {
            candidates.push(Candidate {
                gallery_id: id,
                rank: candidates.len(),
                similarity: 0.0,
                genuine: subject == probe_subject,
            });
        }
    }
    candidates
}

/// Inputs and outputs of a search run.
#[derive(Debug, Clone)]
pub struct SearchJob {
    /// Manifest of probe templates.
    pub probes: PathBuf,
    /// Manifest the gallery was built from.
    pub gallery_manifest: PathBuf,
    /// Serialized, prepared gallery.
    pub gallery: PathBuf,
    /// Candidate file to write.
    pub output: PathBuf,
}

/// Counts reported by [`Harness::search`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSummary {
    /// Probes searched.
    pub probes: usize,
    /// Candidate rows written.
    pub rows: usize,
    /// Probes whose backend search failed and were fully padded.
    pub failed: usize,
}

impl Harness {
    /// Searches every probe against the gallery and writes one candidate row
    /// per probe and gallery entry.
    ///
    /// # Errors
    /// Unreadable manifests, templates or gallery are fatal. A failed search
    /// for one probe is tallied and its candidates are all padding.
    #[instrument(
        name = "core.search",
        err,
        skip(self, backend, metrics, job),
        fields(backend = %backend.name(), depth = self.search_depth().get()),
    )]
    pub fn search<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        job: &SearchJob,
    ) -> Result<SearchSummary> {
        let probe_entries = read_manifest(&job.probes)?;
        let gallery_entries = read_manifest(&job.gallery_manifest)?;
        let probes = load_templates(backend, metrics, &probe_entries)?;
        let summary = self.search_loaded(backend, metrics, job, &probe_entries, &probes, &gallery_entries);
        release_templates(backend, metrics, probes);
        let summary = summary?;

        info!(
            probes = summary.probes,
            rows = summary.rows,
            failed = summary.failed,
            "search completed"
        );
        Ok(summary)
    }

    fn search_loaded<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        job: &SearchJob,
        probe_entries: &[ManifestEntry],
        probes: &[B::Template],
        gallery_entries: &[ManifestEntry],
    ) -> Result<SearchSummary> {
        // Only the ids and subjects of the gallery templates are kept.
        let sources = load_templates(backend, metrics, gallery_entries)?;
        release_templates(backend, metrics, sources);
        let index = GalleryIndex::from_manifest(gallery_entries);

        let gallery = load_gallery(backend, metrics, &job.gallery)?;
        let written = self.write_candidates(
            backend,
            metrics,
            probe_entries,
            probes,
            &gallery,
            &index,
            &job.output,
        );
        release_gallery(backend, metrics, gallery);
        written
    }

    #[expect(clippy::too_many_arguments, reason = "internal plumbing")]
    fn write_candidates<B: Backend>(
        &self,
        backend: &B,
        metrics: &mut MetricsCollector,
        entries: &[ManifestEntry],
        probes: &[B::Template],
        gallery: &B::Gallery,
        index: &GalleryIndex,
        output: &Path,
    ) -> Result<SearchSummary> {
        let mut out = CsvWriter::create(output, SEARCH_HEADER)?;
        let depth = self.search_depth().get();
        let mut summary = SearchSummary::default();
        for (entry, probe) in entries.iter().zip(probes) {
            let probe_id = entry.template_id;
            let hits = match metrics.time(Category::Search, || backend.search(probe, gallery, depth)) {
                Ok(hits) => hits,
                Err(error) => {
                    metrics.tally(ErrorClass::Other);
                    summary.failed += 1;
                    warn!(probe_id, error = %error, "search failed; padding every candidate");
                    Vec::new()
                }
            };
            let candidates = reconcile(entry.subject_id, &hits, index);
            for candidate in &candidates {
                out.row(format_args!(
                    "{probe_id},{},{},{},{}",
                    candidate.rank, candidate.gallery_id, candidate.similarity, candidate.genuine
                ))?;
            }
            summary.probes += 1;
            summary.rows += candidates.len();
        }
        out.finish()?;
        Ok(summary)
    }
}

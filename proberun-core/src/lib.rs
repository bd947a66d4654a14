//! Proberun core library: drives a pluggable recognition [`Backend`] through
//! detection, enrollment, gallery assembly, verification, search and
//! clustering while collecting latency and error metrics.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod backend;
mod builder;
mod cluster;
mod detect;
mod enroll;
mod error;
mod gallery;
mod harness;
mod manifest;
mod metadata;
mod metrics;
mod search;
mod track;
mod verify;

pub use crate::{
    backend::{
        Association, Backend, BackendResult, ClusterAssignment, MediaClusterItem, Role, SearchHit,
    },
    builder::HarnessBuilder,
    cluster::{ClusterOutcome, MEDIA_CLUSTER_HEADER, TEMPLATE_CLUSTER_HEADER},
    detect::{DETECT_HEADER, DetectJob, DetectSummary},
    enroll::{EnrollJob, EnrollOutcome, EnrollSummary, classify_enrollment},
    error::{BackendError, BackendErrorCode, HarnessError, HarnessErrorCode, MetadataError, Result},
    gallery::{AmendJob, AmendSummary, GallerySummary},
    harness::Harness,
    manifest::{
        MANIFEST_HEADER, MANIFEST_HEADER_WITH_FILENAME, ManifestEntry, read_manifest,
        read_media_list, read_pairs,
    },
    metadata::MetadataGrouper,
    metrics::{Category, ErrorClass, ErrorCounts, Metrics, MetricsCollector, Stats},
    search::{Candidate, GalleryIndex, SEARCH_HEADER, SearchJob, SearchSummary, reconcile},
    track::{
        FaceBox, FrameAttributes, Point, SubjectId, TemplateId, TemplateRecord, Track,
        UNSET_SUBJECT,
    },
    verify::{FAILED_SIMILARITY, VERIFY_HEADER, VerifyJob, VerifySummary},
};

//! Pairing and diffing of media files

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Pair;
use super::records::{record_mapping, top_level_differences};
use crate::sync::clean::clean_media;
use crate::sync::exclusions::ExclusionSet;
use crate::sync::fingerprint::{self, SimilarityConfig};
use crate::sync::id_mapping::IdMappingTable;
use crate::sync::snapshot::{InstanceData, Snapshot};
use crate::sync::types::{ContentKind, Entity, EntityKey, MEDIA_TYPE, MediaMeta};

/// A source/target file pair accepted by fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPairing {
    pub source_document_id: String,
    pub target_document_id: String,
    pub source_name: String,
    pub target_name: String,
    /// Perceptual distance, when both files are images
    pub distance: Option<u32>,
}

/// Pair media files by mapping, then document id, then fingerprint
pub(super) fn pair_media<'s>(
    snapshot: &'s Snapshot,
    mappings: &mut IdMappingTable,
    config: &SimilarityConfig,
) -> (Vec<Pair<'s>>, Vec<MediaPairing>) {
    let sources: Vec<&Entity> = snapshot.source.entities_of(MEDIA_TYPE).collect();
    let targets: Vec<&Entity> = snapshot.target.entities_of(MEDIA_TYPE).collect();

    let target_pos: HashMap<EntityKey, usize> = targets
        .iter()
        .enumerate()
        .map(|(idx, t)| (t.key(), idx))
        .collect();
    let mut taken = vec![false; targets.len()];
    let mut matched: Vec<Option<usize>> = vec![None; sources.len()];

    for (i, source) in sources.iter().enumerate() {
        let by_mapping = mappings
            .target_for(&source.key())
            .and_then(|m| target_pos.get(&m.target_key()).copied());
        let candidate = by_mapping.or_else(|| target_pos.get(&source.key()).copied());
        if let Some(j) = candidate {
            if !taken[j] {
                matched[i] = Some(j);
                taken[j] = true;
            }
        }
    }

    let mut pairings = Vec::new();
    let unmatched_sources: Vec<usize> = (0..sources.len()).filter(|i| matched[*i].is_none()).collect();
    let unmatched_targets: Vec<usize> = (0..targets.len()).filter(|j| !taken[*j]).collect();

    for &i in &unmatched_sources {
        let source = sources[i];
        let candidates: Vec<usize> = unmatched_targets
            .iter()
            .copied()
            .filter(|j| !taken[*j])
            .filter(|j| plausible_pair(snapshot, source, targets[*j], config))
            .collect();
        let [j] = candidates.as_slice() else {
            if candidates.len() > 1 {
                log::debug!(
                    "Not auto-pairing {}: {} target candidates",
                    source.document_id,
                    candidates.len()
                );
            }
            continue;
        };

        // The candidate must not be claimed by another unmatched source either
        let rivals = unmatched_sources
            .iter()
            .filter(|other| matched[**other].is_none())
            .filter(|other| plausible_pair(snapshot, sources[**other], targets[*j], config))
            .count();
        if rivals != 1 {
            continue;
        }

        let target = targets[*j];
        matched[i] = Some(*j);
        taken[*j] = true;

        let distance = match (
            snapshot.source.fingerprint(source.id).and_then(|f| f.perceptual),
            snapshot.target.fingerprint(target.id).and_then(|f| f.perceptual),
        ) {
            (Some(a), Some(b)) => Some(a.distance(&b)),
            _ => None,
        };
        log::info!(
            "Auto-paired media {} -> {} by fingerprint",
            source.document_id,
            target.document_id
        );
        pairings.push(MediaPairing {
            source_document_id: source.document_id.clone(),
            target_document_id: target.document_id.clone(),
            source_name: meta_of(&snapshot.source, source).name,
            target_name: meta_of(&snapshot.target, target).name,
            distance,
        });
    }

    let mut pairs = Vec::with_capacity(sources.len() + targets.len());
    for (i, source) in sources.iter().enumerate() {
        let target = matched[i].map(|j| targets[j]);
        if let Some(target) = target {
            record_mapping(mappings, source, target);
        }
        pairs.push(Pair {
            key: source.key(),
            kind: ContentKind::CollectionType,
            source: Some(*source),
            target,
        });
    }
    for (j, target) in targets.iter().enumerate() {
        if !taken[j] {
            pairs.push(Pair {
                key: target.key(),
                kind: ContentKind::CollectionType,
                source: None,
                target: Some(*target),
            });
        }
    }

    (pairs, pairings)
}

fn meta_of(data: &InstanceData, entity: &Entity) -> MediaMeta {
    data.media_meta(entity.id).cloned().unwrap_or_default()
}

fn mime_family(mime: &str) -> &str {
    mime.split('/').next().unwrap_or(mime)
}

/// Auto-pairing needs fingerprints on both sides, the same mime family and a binary match
fn plausible_pair(snapshot: &Snapshot, source: &Entity, target: &Entity, config: &SimilarityConfig) -> bool {
    let (Some(a), Some(b)) = (
        snapshot.source.fingerprint(source.id),
        snapshot.target.fingerprint(target.id),
    ) else {
        return false;
    };
    let a_meta = meta_of(&snapshot.source, source);
    let b_meta = meta_of(&snapshot.target, target);

    mime_family(&a_meta.mime) == mime_family(&b_meta.mime)
        && fingerprint::media_identical(a, &a_meta, b, &b_meta, config)
}

/// Whether two files hold the same binary
///
/// Without fingerprints on both sides, equal size, extension and mime type stand in.
pub(super) fn binaries_equal(snapshot: &Snapshot, source: &Entity, target: &Entity, config: &SimilarityConfig) -> bool {
    let a_meta = meta_of(&snapshot.source, source);
    let b_meta = meta_of(&snapshot.target, target);

    match (
        snapshot.source.fingerprint(source.id),
        snapshot.target.fingerprint(target.id),
    ) {
        (Some(a), Some(b)) => fingerprint::media_identical(a, &a_meta, b, &b_meta, config),
        _ => {
            (a_meta.size_kb - b_meta.size_kb).abs() < 0.01
                && a_meta.ext.eq_ignore_ascii_case(&b_meta.ext)
                && a_meta.mime == b_meta.mime
        }
    }
}

/// Differing metadata fields, plus `file` when the binaries differ
pub(super) fn media_differences(
    snapshot: &Snapshot,
    source: &Entity,
    target: &Entity,
    config: &SimilarityConfig,
    exclusions: &ExclusionSet,
) -> Vec<String> {
    let mut a = clean_media(&meta_of(&snapshot.source, source));
    let mut b = clean_media(&meta_of(&snapshot.target, target));
    for doc in [&source.document_id, &target.document_id] {
        exclusions.strip_fields(&mut a, MEDIA_TYPE, doc);
        exclusions.strip_fields(&mut b, MEDIA_TYPE, doc);
    }

    let mut fields = top_level_differences(&a, &b);
    if !binaries_equal(snapshot, source, target, config) {
        fields.insert(0, "file".to_string());
    }
    fields
}

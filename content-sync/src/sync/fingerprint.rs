//! Similarity signatures for media files
//!
//! Images get a 256-bit difference hash that survives re-encoding and
//! resizing; every file also gets a SHA-256 content hash for exact matches.

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sync::types::MediaMeta;

/// Width of the difference hash grid (one extra column for neighbour comparison)
const DHASH_WIDTH: u32 = 17;
/// Height of the difference hash grid
const DHASH_HEIGHT: u32 = 16;
/// Number of bits in a perceptual hash
pub const PERCEPTUAL_BITS: u32 = 256;

/// Extensions treated as raster images even when the mime type is generic
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"];

/// Fixed-length perceptual difference hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash(pub [u8; 32]);

impl PerceptualHash {
    /// Number of differing bits between two hashes
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Signature of one media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hex-encoded SHA-256 of the file bytes
    pub content_hash: String,
    /// Difference hash, for decodable raster images only
    pub perceptual: Option<PerceptualHash>,
}

/// Thresholds for deciding whether two media binaries are the same asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Maximum Hamming distance (out of 256 bits) for perceptual matches
    pub hamming_threshold: u32,
    /// Relative size difference tolerated for perceptual matches
    pub size_tolerance: f64,
    /// Minimum name similarity (0.0..=1.0) accepted instead of a size match
    pub name_similarity: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            hamming_threshold: 12,
            size_tolerance: 0.25,
            name_similarity: 0.6,
        }
    }
}

/// Compute the fingerprint of a file
pub fn compute(bytes: &[u8], mime: &str, ext: &str) -> Fingerprint {
    let content_hash = hex::encode(Sha256::digest(bytes));

    let perceptual = if is_raster_image(mime, ext) {
        match difference_hash(bytes) {
            Ok(hash) => Some(hash),
            Err(e) => {
                log::debug!("Falling back to content hash, image did not decode: {}", e);
                None
            }
        }
    } else {
        None
    };

    Fingerprint {
        content_hash,
        perceptual,
    }
}

/// Whether a file should get a perceptual hash
pub fn is_raster_image(mime: &str, ext: &str) -> bool {
    if mime.starts_with("image/") && !mime.contains("svg") {
        return true;
    }
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

fn difference_hash(bytes: &[u8]) -> Result<PerceptualHash, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let small = image::imageops::resize(
        &decoded.to_luma8(),
        DHASH_WIDTH,
        DHASH_HEIGHT,
        FilterType::Triangle,
    );

    let mut hash = [0u8; 32];
    let mut bit = 0usize;
    for y in 0..DHASH_HEIGHT {
        for x in 0..DHASH_WIDTH - 1 {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            if left < right {
                hash[bit / 8] |= 1 << (7 - (bit % 8));
            }
            bit += 1;
        }
    }

    Ok(PerceptualHash(hash))
}

/// Decide whether two media binaries are the same asset
///
/// Exact content hashes always match. Perceptual matches additionally need a
/// plausible size or a similar name, which rejects visually simple but
/// distinct assets (flat icons, solid placeholders) whose hashes collide.
pub fn media_identical(
    a: &Fingerprint,
    a_meta: &MediaMeta,
    b: &Fingerprint,
    b_meta: &MediaMeta,
    config: &SimilarityConfig,
) -> bool {
    if a.content_hash == b.content_hash {
        return true;
    }

    let (Some(pa), Some(pb)) = (&a.perceptual, &b.perceptual) else {
        return false;
    };

    let distance = pa.distance(pb);
    if distance > config.hamming_threshold {
        return false;
    }

    let size_ok = sizes_close(a_meta.size_kb, b_meta.size_kb, config.size_tolerance);
    let name_ok = name_similarity(&a_meta.name, &b_meta.name) >= config.name_similarity;

    log::trace!(
        "Perceptual match candidate {} / {}: distance={} size_ok={} name_ok={}",
        a_meta.name,
        b_meta.name,
        distance,
        size_ok,
        name_ok
    );

    size_ok || name_ok
}

/// Relative size check: |a - b| <= tolerance * max(a, b)
pub fn sizes_close(a: f64, b: f64, tolerance: f64) -> bool {
    let largest = a.max(b);
    if largest <= 0.0 {
        return true;
    }
    (a - b).abs() <= tolerance * largest
}

/// Similarity between two file names in 0.0..=1.0
///
/// Names are compared without extension, case, punctuation, or a trailing
/// hash-like suffix added by uploads.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    let matcher = SkimMatcherV2::default();

    let Some(self_score) = matcher.fuzzy_match(shorter, shorter) else {
        return 0.0;
    };
    let Some(score) = matcher.fuzzy_match(longer, shorter) else {
        return 0.0;
    };
    if self_score <= 0 {
        return 0.0;
    }

    let coverage = shorter.len() as f64 / longer.len() as f64;
    ((score as f64 / self_score as f64).min(1.0)) * coverage
}

fn normalize_name(name: &str) -> String {
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };

    let mut tokens: Vec<String> = stem
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if tokens.len() > 1 {
        if let Some(last) = tokens.last() {
            if last.len() >= 6 && last.chars().all(|c| c.is_ascii_hexdigit()) {
                tokens.pop();
            }
        }
    }

    tokens.join(" ")
}

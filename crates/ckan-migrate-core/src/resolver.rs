//! Collision resolution for natural keys that became unique in the revised
//! schema.
//!
//! A taken key is renamed to `{key}-migrated-{digest}` where `digest` is
//! derived from a stable seed (the row's own identifier), so repeated runs over
//! the same input produce the same names. Further collisions append a counter;
//! past the retry bound a random token is used instead.

use crate::descriptor::KeyStyle;
use rand::Rng;

/// Default number of deterministic candidates tried before falling back.
pub const DEFAULT_MAX_TRIES: usize = 50;

/// Marker placed between the original key and its suffix.
pub const RENAME_MARKER: &str = "-migrated-";

const DIGEST_LEN: usize = 8;
const TOKEN_LEN: usize = 12;

/// Stateless natural-key collision resolver.
#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    max_tries: usize,
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

impl CollisionResolver {
    /// Create a resolver with a retry bound (at least one candidate).
    pub fn new(max_tries: usize) -> Self {
        Self {
            max_tries: max_tries.max(1),
        }
    }

    /// Retry bound.
    pub fn max_tries(&self) -> usize {
        self.max_tries
    }

    /// Return `candidate` if free, otherwise a free renamed variant.
    ///
    /// The caller must add the returned key to its taken set before resolving
    /// the next row.
    pub fn resolve(
        &self,
        candidate: &str,
        is_taken: impl Fn(&str) -> bool,
        seed: &str,
        style: KeyStyle,
    ) -> String {
        if !is_taken(candidate) {
            return candidate.to_string();
        }

        let digest = seed_digest(seed);
        for i in 1..=self.max_tries {
            let suffix = if i == 1 {
                format!("{}{}", RENAME_MARKER, digest)
            } else {
                format!("{}{}-{}", RENAME_MARKER, digest, i)
            };
            let renamed = apply_suffix(candidate, &suffix, style);
            if !is_taken(&renamed) {
                return renamed;
            }
        }

        let mut rng = rand::thread_rng();
        loop {
            let token: String = (0..TOKEN_LEN)
                .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
                .collect();
            let renamed = apply_suffix(candidate, &format!("{}{}", RENAME_MARKER, token), style);
            if !is_taken(&renamed) {
                tracing::warn!(key = %candidate, renamed = %renamed, "deterministic rename exhausted");
                return renamed;
            }
        }
    }
}

/// Short deterministic digest of a seed.
pub fn seed_digest(seed: &str) -> String {
    let hash = blake3::hash(seed.as_bytes());
    hex::encode(&hash.as_bytes()[..DIGEST_LEN / 2])
}

fn apply_suffix(key: &str, suffix: &str, style: KeyStyle) -> String {
    match style {
        KeyStyle::Email => match key.rsplit_once('@') {
            Some((local, domain)) => format!("{}{}@{}", local, suffix, domain),
            None => format!("{}{}", key, suffix),
        },
        KeyStyle::Name => format!("{}{}", key, suffix),
    }
}

/// Key of a name within a uniqueness partition.
///
/// Parts are joined with a unit separator so `("a/b", ["c"])` and
/// `("a", ["b/c"])` stay distinct.
pub fn composite_key(name: &str, scope: &[Option<String>]) -> String {
    if scope.is_empty() {
        return name.to_string();
    }
    let mut key = name.to_string();
    for part in scope {
        key.push('\u{1f}');
        key.push_str(part.as_deref().unwrap_or("\u{0}"));
    }
    key
}

/// URL-safe name: lowercase ASCII letters, digits and dashes.
pub fn slugify(value: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = false;
    for c in value.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    let truncated: String = slug.chars().take(max_len).collect();
    if truncated.is_empty() {
        "item".to_string()
    } else {
        truncated
    }
}

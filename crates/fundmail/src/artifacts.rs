//! Attachment naming
//!
//! Decides which attachments are kept and where they are written:
//! logo-like images are dropped, names are made filesystem-safe, existing
//! files are never overwritten and the full path stays within a byte
//! budget without splitting a UTF-8 code point.

use chrono::{DateTime, FixedOffset, Utc};
use std::path::{Path, PathBuf};

use crate::error::NamingError;
use crate::source::RemoteAttachment;

/// Images smaller than this are assumed to be logos or signatures
pub const LOGO_SIZE_THRESHOLD: u64 = 20 * 1024;

/// Maximum full path length in bytes
pub const MAX_PATH_BYTES: usize = 255;

/// Hex characters of the filename hash used when a name is shortened
const HASH_LEN: usize = 8;

/// Characters that are unsafe in file names on at least one platform
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Whether an attachment looks like an embedded logo/signature image
pub fn is_logo_like(attachment: &RemoteAttachment) -> bool {
    if attachment.is_inline {
        return true;
    }
    attachment
        .content_type
        .to_ascii_lowercase()
        .starts_with("image/")
        && attachment.size < LOGO_SIZE_THRESHOLD
}

type Clock = Box<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// Resolves collision-free, length-limited attachment paths
pub struct ArtifactNamer {
    max_path_bytes: usize,
    clock: Clock,
}

impl ArtifactNamer {
    /// Namer whose collision suffixes use local time at `local_offset`
    pub fn new(local_offset: FixedOffset) -> Self {
        Self {
            max_path_bytes: MAX_PATH_BYTES,
            clock: Box::new(move || Utc::now().with_timezone(&local_offset)),
        }
    }

    /// Replace the clock used for collision suffixes
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<FixedOffset> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_max_path_bytes(mut self, max_path_bytes: usize) -> Self {
        self.max_path_bytes = max_path_bytes;
        self
    }

    /// Pick the path to write `desired_name` to inside `base_folder`.
    ///
    /// Tries the plain name, then `<stem>_<YYYYMMDD_HHMMSS><ext>`, then
    /// `<stem>_<YYYYMMDD_HHMMSS>_<n><ext>` until no file exists at the
    /// path. Each candidate is shortened to fit the byte budget first.
    pub fn resolve(&self, base_folder: &Path, desired_name: &str) -> Result<PathBuf, NamingError> {
        let name = sanitize_file_name(desired_name);
        let (stem, ext) = split_extension(&name);
        let hash = short_hash(desired_name);
        let stamp = (self.clock)().format("%Y%m%d_%H%M%S").to_string();

        let mut attempt: u32 = 0;
        loop {
            let suffix = match attempt {
                0 => String::new(),
                1 => format!("_{stamp}"),
                n => format!("_{stamp}_{}", n - 1),
            };

            let candidate = self.fit(base_folder, stem, ext, &suffix, &hash)?;
            if !candidate.exists() {
                return Ok(candidate);
            }
            attempt += 1;
        }
    }

    /// Build `<folder>/<stem><suffix><ext>`, shortening the stem when the
    /// path would exceed the budget. The directory is never shortened.
    fn fit(
        &self,
        folder: &Path,
        stem: &str,
        ext: &str,
        suffix: &str,
        hash: &str,
    ) -> Result<PathBuf, NamingError> {
        // joining "" yields the folder plus a trailing separator
        let prefix_len = folder.join("").as_os_str().as_encoded_bytes().len();

        let plain_len = prefix_len + stem.len() + suffix.len() + ext.len();
        if plain_len <= self.max_path_bytes {
            return Ok(folder.join(format!("{stem}{suffix}{ext}")));
        }

        let fixed = prefix_len + 1 + hash.len() + suffix.len() + ext.len();
        if fixed > self.max_path_bytes {
            return Err(NamingError {
                folder: folder.to_path_buf(),
                file_name: format!("{stem}{ext}"),
                max_bytes: self.max_path_bytes,
            });
        }

        let kept = truncate_at_char_boundary(stem, self.max_path_bytes - fixed);
        Ok(folder.join(format!("{kept}_{hash}{suffix}{ext}")))
    }
}

/// Replace path separators, reserved and control characters
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || UNSAFE_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "attachment".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split `report.final.pdf` into (`report.final`, `.pdf`).
/// Dot-files and names without a dot have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// First 8 hex chars of the MD5 of the original name
fn short_hash(name: &str) -> String {
    let digest = format!("{:x}", md5::compute(name.as_bytes()));
    digest[..HASH_LEN].to_string()
}

/// Longest prefix of `s` that is at most `max_bytes` long
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

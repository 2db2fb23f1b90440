//! Admission validation: size caps, queue caps, type allow-listing.

use crate::manager::error::ValidationError;
use crate::manager::types::{FileSpec, UploadManagerConfig};

/// Validate one file against the config and the current queue depth.
/// Rejection never touches already-accepted files.
pub(crate) fn validate(
    config: &UploadManagerConfig,
    live_sessions: usize,
    spec: &FileSpec,
) -> Result<(), ValidationError> {
    if live_sessions >= config.max_files {
        return Err(ValidationError::QueueFull {
            max: config.max_files,
        });
    }

    if spec.total_size == 0 {
        return Err(ValidationError::Empty);
    }

    if spec.total_size > config.max_file_size {
        return Err(ValidationError::TooLarge {
            size: spec.total_size,
            max: config.max_file_size,
        });
    }

    let accepted: Vec<&str> = if config.accepted_types.is_empty() {
        config.file_kind.default_accepted_types().to_vec()
    } else {
        config.accepted_types.iter().map(|s| s.as_str()).collect()
    };

    if !type_allowed(&accepted, &spec.content_type, &spec.file_name) {
        return Err(ValidationError::UnsupportedType {
            content_type: spec.content_type.clone(),
        });
    }

    Ok(())
}

/// Match a file against an allow-list of `*`, `type/*`, exact MIME
/// types, and `.ext` extensions (case-insensitive).
pub(crate) fn type_allowed(patterns: &[&str], content_type: &str, file_name: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    let file_name = file_name.to_ascii_lowercase();

    patterns.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        if pattern == "*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            content_type
                .split('/')
                .next()
                .is_some_and(|major| major == prefix)
        } else if pattern.starts_with('.') {
            file_name.ends_with(&pattern)
        } else {
            content_type == pattern
        }
    })
}

/// Extension-based content type guess for path submissions. Unknown
/// extensions fall back to octet-stream and live or die by the
/// category allow-list.
pub(crate) fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "arw" | "cr2" | "cr3" | "nef" | "dng" | "raf" => "image/x-raw",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "braw" | "r3d" => "video/x-raw",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::types::FileKind;

    fn spec(name: &str, content_type: &str, size: u64) -> FileSpec {
        FileSpec::from_bytes(name, content_type, vec![0u8; size as usize])
    }

    fn config(kind: FileKind) -> UploadManagerConfig {
        UploadManagerConfig {
            file_kind: kind,
            max_files: 3,
            max_file_size: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_size_and_queue_caps() {
        let config = config(FileKind::Raw);

        let too_big = spec("a.jpg", "image/jpeg", 2048);
        assert_eq!(
            validate(&config, 0, &too_big),
            Err(ValidationError::TooLarge {
                size: 2048,
                max: 1024
            })
        );

        let ok = spec("a.jpg", "image/jpeg", 100);
        assert!(validate(&config, 0, &ok).is_ok());
        assert_eq!(
            validate(&config, 3, &ok),
            Err(ValidationError::QueueFull { max: 3 })
        );

        let empty = spec("a.jpg", "image/jpeg", 0);
        assert_eq!(validate(&config, 0, &empty), Err(ValidationError::Empty));
    }

    #[test]
    fn test_category_allow_lists() {
        let raw = config(FileKind::Raw);
        assert!(validate(&raw, 0, &spec("a.braw", "application/octet-stream", 10)).is_ok());
        assert!(validate(&raw, 0, &spec("a.mov", "video/quicktime", 10)).is_ok());
        assert!(matches!(
            validate(&raw, 0, &spec("invoice.pdf", "application/pdf", 10)),
            Err(ValidationError::UnsupportedType { .. })
        ));

        let deliverable = config(FileKind::Deliverable);
        assert!(validate(&deliverable, 0, &spec("final.pdf", "application/pdf", 10)).is_ok());
        assert!(matches!(
            validate(&deliverable, 0, &spec("a.braw", "video/x-raw", 10)),
            Err(ValidationError::UnsupportedType { .. })
        ));

        let wip = config(FileKind::TeamWip);
        assert!(validate(&wip, 0, &spec("scratch.xyz", "application/weird", 10)).is_ok());
    }

    #[test]
    fn test_explicit_override_beats_category() {
        let mut config = config(FileKind::Raw);
        config.accepted_types = vec![".psd".into()];

        assert!(validate(&config, 0, &spec("comp.psd", "application/octet-stream", 10)).is_ok());
        assert!(matches!(
            validate(&config, 0, &spec("a.jpg", "image/jpeg", 10)),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_type_matching() {
        assert!(type_allowed(&["image/*"], "image/jpeg", "a.jpg"));
        assert!(!type_allowed(&["image/*"], "video/mp4", "a.mp4"));
        assert!(type_allowed(&["video/quicktime"], "video/quicktime", "a.mov"));
        assert!(type_allowed(&[".R3D"], "application/octet-stream", "A001.r3d"));
        assert!(type_allowed(&["*"], "anything/at-all", "x"));
        assert!(!type_allowed(&[], "image/jpeg", "a.jpg"));
    }

    #[test]
    fn test_content_type_guessing() {
        assert_eq!(guess_content_type("reel.MOV"), "video/quicktime");
        assert_eq!(guess_content_type("shot.CR3"), "image/x-raw");
        assert_eq!(guess_content_type("weird.bin"), "application/octet-stream");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }
}

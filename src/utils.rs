use crate::errors::Result;
use log::info;

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    let replaced: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Windows refuses names ending in a dot or space
    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds the "Title - Artist" stem used for exported files.
pub fn sanitize_track_filename(title: &str, artist: &str) -> String {
    let sanitized_title = sanitize_filename(title);
    let sanitized_artist = sanitize_filename(artist);
    format!("{} - {}", sanitized_title, sanitized_artist)
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Generates a unique ID for a pipeline run
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize_filename("a\tb"), "a_b");
    }

    #[test]
    fn test_sanitize_filename_trims_trailing_dots() {
        assert_eq!(sanitize_filename("Song... "), "Song");
        assert_eq!(sanitize_filename("..."), "untitled");
        assert_eq!(sanitize_filename(""), "untitled");
    }

    #[test]
    fn test_sanitize_track_filename_orders_title_first() {
        assert_eq!(sanitize_track_filename("Shape of You", "Ed Sheeran"), "Shape of You - Ed Sheeran");
    }

    #[tokio::test]
    async fn test_ensure_dir_exists_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("a").join("b");
        ensure_dir_exists(&target).await.unwrap();
        ensure_dir_exists(&target).await.unwrap();
        assert!(target.is_dir());
    }
}

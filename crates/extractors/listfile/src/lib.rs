use std::path::PathBuf;

use core_model::{ExtractError, Extractor};
use tracing::info;

/// Names supplied by hand: a newline-separated file (blank lines and `#`
/// comments ignored) or a fixed list.
pub enum ListFileExtractor {
    File { path: PathBuf, max_name_len: usize },
    Fixed { names: Vec<String>, max_name_len: usize },
}

impl ListFileExtractor {
    pub fn from_file(path: impl Into<PathBuf>, max_name_len: usize) -> Self {
        Self::File {
            path: path.into(),
            max_name_len,
        }
    }

    pub fn fixed(names: Vec<String>, max_name_len: usize) -> Self {
        Self::Fixed {
            names,
            max_name_len,
        }
    }
}

fn parse_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

impl Extractor for ListFileExtractor {
    fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "listfile",
            Self::Fixed { .. } => "fixed",
        }
    }

    fn extract(&self) -> Result<Vec<String>, ExtractError> {
        let (names, source_ref) = match self {
            Self::File { path, max_name_len } => {
                let content = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                (
                    extractor_common::normalize_names(parse_lines(&content), *max_name_len),
                    path.display().to_string(),
                )
            }
            Self::Fixed {
                names,
                max_name_len,
            } => (
                extractor_common::normalize_names(names, *max_name_len),
                "command line".to_string(),
            ),
        };
        if names.is_empty() {
            return Err(ExtractError::NoMatches {
                source_ref,
                tried: "one name per line".to_string(),
            });
        }
        info!(source = %source_ref, names = names.len(), "names read");
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_names_skipping_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("today.txt");
        std::fs::write(&path, "# 2024-01-10 backfill\n삼성전자\n\n  카카오 \n삼성전자\n").unwrap();
        let ex = ListFileExtractor::from_file(&path, 10);
        assert_eq!(ex.kind(), "listfile");
        assert_eq!(ex.extract().unwrap(), vec!["삼성전자", "카카오"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let ex = ListFileExtractor::from_file(dir.path().join("absent.txt"), 10);
        assert!(matches!(ex.extract(), Err(ExtractError::Io { .. })));
    }

    #[test]
    fn fixed_list_needs_a_name() {
        let ex = ListFileExtractor::fixed(vec![" ".to_string()], 10);
        assert!(matches!(ex.extract(), Err(ExtractError::NoMatches { .. })));
        let ex = ListFileExtractor::fixed(vec!["A".to_string(), "B".to_string()], 10);
        assert_eq!(ex.extract().unwrap(), vec!["A", "B"]);
    }
}

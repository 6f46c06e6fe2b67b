//! Include/exclude lists that restrict which views are searched for markers.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::scene::View;

#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("cannot read view list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FilterError {
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Parse a view list: one relative image path per line, blank lines ignored.
pub fn parse_view_list(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn load_view_list(path: &Path) -> Result<BTreeSet<String>, FilterError> {
    let text = fs::read_to_string(path).map_err(|source| FilterError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let list = parse_view_list(&text);
    info!("{} image path(s) listed in {}", list.len(), path.display());
    Ok(list)
}

/// Views are matched on their scene-relative image path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewFilter {
    pub include: Option<BTreeSet<String>>,
    pub exclude: Option<BTreeSet<String>>,
}

impl ViewFilter {
    pub fn from_files(
        include: Option<&Path>,
        exclude: Option<&Path>,
    ) -> Result<Self, FilterError> {
        Ok(Self {
            include: include.map(load_view_list).transpose()?,
            exclude: exclude.map(load_view_list).transpose()?,
        })
    }

    pub fn accepts(&self, view: &View) -> bool {
        if let Some(include) = &self.include {
            if !include.contains(&view.image_path) {
                return false;
            }
        }
        !self
            .exclude
            .as_ref()
            .is_some_and(|ex| ex.contains(&view.image_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(path: &str) -> View {
        View {
            id: 0,
            image_path: path.to_string(),
            width: 10,
            height: 10,
            intrinsic: Some(0),
            pose: Some(0),
        }
    }

    #[test]
    fn lists_skip_blank_lines_and_trim() {
        let list = parse_view_list("a.jpg\n\n  sub/b.jpg \r\na.jpg\n");
        assert_eq!(list.len(), 2);
        assert!(list.contains("sub/b.jpg"));
    }

    #[test]
    fn include_then_exclude() {
        let filter = ViewFilter {
            include: Some(parse_view_list("a.jpg\nb.jpg")),
            exclude: Some(parse_view_list("b.jpg")),
        };
        assert!(filter.accepts(&view("a.jpg")));
        assert!(!filter.accepts(&view("b.jpg")));
        assert!(!filter.accepts(&view("c.jpg")));
        assert!(ViewFilter::default().accepts(&view("c.jpg")));
    }

    #[test]
    fn missing_list_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp");
        let err = ViewFilter::from_files(Some(&dir.path().join("missing.txt")), None)
            .expect_err("missing file");
        assert_eq!(err.exit_code(), 2);
    }
}

//! Locating simulation files and the files they depend on.

use agsim_core::{AgsimError, AgsimResult, ModelTree};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expand a file specification into the simulation files it names.
///
/// A specification without wildcards names a single file. Otherwise its last component
/// is a pattern (`*` and `?`) matched against file names in its directory, and in every
/// subdirectory too when `recurse` is set. Matches are sorted for a stable run order.
pub fn find_files(spec: &str, recurse: bool) -> AgsimResult<Vec<PathBuf>> {
    let path = Path::new(spec);
    let pattern = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AgsimError::Error(format!("Invalid file specification '{}'", spec)))?;

    if !has_wildcards(pattern) && !recurse {
        if !path.is_file() {
            return Err(AgsimError::Error(format!("File '{}' does not exist", spec)));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let walker = WalkDir::new(directory)
        .min_depth(1)
        .max_depth(if recurse { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| AgsimError::Error(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = entry
            .file_name()
            .to_str()
            .map(|name| wildcard_match(pattern, name))
            .unwrap_or(false);
        if matched {
            files.push(entry.into_path());
        }
    }
    if files.is_empty() {
        return Err(AgsimError::Error(format!("No files match '{}'", spec)));
    }
    Ok(files)
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(|c: char| c == '*' || c == '?')
}

/// Match `name` against a pattern where `*` is any run of characters and `?` any one.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(c) if *c == '?' || *c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// External files read by the models of a tree, as stored in the tree.
///
/// Paths are absolute once the tree has been loaded with [`agsim_core::file::read`].
pub fn referenced_files(tree: &mut ModelTree) -> AgsimResult<Vec<PathBuf>> {
    let Some(root) = tree.root() else {
        return Ok(Vec::new());
    };
    let ids: Vec<_> = tree.subtree(root).collect();
    let mut files = Vec::new();
    for id in ids {
        for reference in tree.model_mut(id)?.file_references() {
            if !files.contains(&*reference) {
                files.push(reference.clone());
            }
        }
    }
    Ok(files)
}

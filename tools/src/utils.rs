use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Collect the files with a given extension from a set of paths
///
/// Files are taken as-is; folders are walked (one level deep unless
/// `recursive`), skipping hidden entries.
pub fn iter_files(paths: &[PathBuf], recursive: bool, extension: &str) -> Vec<PathBuf> {
    let mut result = Vec::new();

    for path in paths {
        if path.is_dir() {
            let depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(path)
                .max_depth(depth)
                .into_iter()
                .filter_map(Result::ok)
            {
                let path = entry.path();
                if !is_hidden(path) && has_extension(path, extension) {
                    result.push(path.to_owned());
                }
            }
        } else {
            result.push(path.clone());
        }
    }

    result
}

fn is_hidden(path: &Path) -> bool {
    match path.file_name() {
        Some(file_name) => file_name
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false),
        None => false,
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    match path.extension() {
        Some(ext) => ext == extension,
        None => false,
    }
}

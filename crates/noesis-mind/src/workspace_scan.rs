use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Minimum file size (bytes) for a newly-created file to count as real progress
/// (§4.8 step 8 "file counts only if content > 50 bytes").
const MIN_FILE_BYTES: u64 = 50;

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Snapshot of `path -> size_bytes` for every regular file under `root`, skipping
/// VCS/build directories. Used before and after an autonomous action to detect
/// newly-created files.
pub fn snapshot(root: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    walk(Path::new(root), &mut out);
    out
}

fn walk(dir: &Path, out: &mut HashMap<String, u64>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || SKIP_DIRS.contains(&name) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            walk(&path, out);
        } else if metadata.is_file() {
            out.insert(path.to_string_lossy().to_string(), metadata.len());
        }
    }
}

/// True if `after` contains a file absent from (or empty in) `before` whose size
/// exceeds the minimum threshold.
pub fn has_created_file(before: &HashMap<String, u64>, after: &HashMap<String, u64>) -> bool {
    let before_paths: HashSet<&String> = before.keys().collect();
    after.iter().any(|(path, size)| {
        *size > MIN_FILE_BYTES && (!before_paths.contains(path) || before.get(path) != Some(size))
    })
}

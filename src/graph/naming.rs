//! Project-wide uniqueness of qualified names.
//!
//! A file names its units under its module key, which collapses package
//! entry files and drops the extension. When two files end up owning the
//! same qualified name (`src/lib.rs` and `src/main.rs` are both `src`,
//! `utils.py` sits next to `utils.js`), every file involved moves to a
//! longer key until no name is shared:
//!
//! | tier | `src/lib.rs` | `utils.py`  |
//! |------|--------------|-------------|
//! | 0    | `src`        | `utils`     |
//! | 1    | `src.lib`    | `utils`     |
//! | 2    | `src.lib.rs` | `utils.py`  |
//!
//! Keys depend only on the set of paths and their unit names, so the same
//! tree always gets the same names.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::types::FileAnalysis;
use crate::parser::module_key;

const LAST_TIER: u8 = 2;

/// Module key of `path` at a disambiguation tier.
pub fn tiered_key(path: &Path, tier: u8) -> String {
    match tier {
        0 => module_key(path),
        1 => components(&path.with_extension("")).join("."),
        _ => components(path).join("."),
    }
}

fn components(path: &Path) -> Vec<&str> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect()
}

/// `qualified_name` moved from module `from` to module `to`.
fn rekey(qualified_name: &str, from: &str, to: &str) -> String {
    if from == to {
        return qualified_name.to_string();
    }
    if from.is_empty() {
        return format!("{to}.{qualified_name}");
    }
    match qualified_name.strip_prefix(from) {
        Some("") => to.to_string(),
        Some(rest) if rest.starts_with('.') => format!("{to}{rest}"),
        _ => qualified_name.to_string(),
    }
}

/// Key each file should use so that no qualified name has two owners.
pub fn assign_keys(files: &BTreeMap<PathBuf, Arc<FileAnalysis>>) -> BTreeMap<PathBuf, String> {
    let mut tiers: BTreeMap<&Path, u8> = files.keys().map(|p| (p.as_path(), 0)).collect();
    loop {
        let keys: BTreeMap<&Path, String> = tiers.iter().map(|(p, t)| (*p, tiered_key(p, *t))).collect();

        let mut owners: HashMap<String, Vec<&Path>> = HashMap::new();
        for (path, analysis) in files {
            let key = &keys[path.as_path()];
            for unit in analysis.units() {
                let name = rekey(&unit.qualified_name, &analysis.extraction.module, key);
                owners.entry(name).or_default().push(path.as_path());
            }
        }
        let colliding: BTreeSet<&Path> = owners
            .into_values()
            .filter(|paths| paths.len() > 1)
            .flatten()
            .collect();

        let mut bumped = false;
        for path in &colliding {
            if let Some(tier) = tiers.get_mut(path) {
                if *tier < LAST_TIER {
                    *tier += 1;
                    bumped = true;
                }
            }
        }
        if !bumped {
            if !colliding.is_empty() {
                warn!(files = colliding.len(), "qualified names still collide after disambiguation");
            }
            return keys.into_iter().map(|(p, k)| (p.to_path_buf(), k)).collect();
        }
    }
}

/// Re-key every file whose names do not match its assigned key.
///
/// Returns the renamed paths; their analyses are replaced by renamed copies.
pub fn disambiguate(files: &mut BTreeMap<PathBuf, Arc<FileAnalysis>>) -> Vec<PathBuf> {
    let keys = assign_keys(files);
    let mut renamed = Vec::new();
    for (path, key) in keys {
        let Some(analysis) = files.get_mut(&path) else {
            continue;
        };
        if analysis.extraction.module == key {
            continue;
        }
        let from = analysis.extraction.module.clone();
        let next = Arc::make_mut(analysis);
        for unit in &mut next.extraction.units {
            unit.qualified_name = rekey(&unit.qualified_name, &from, &key);
            unit.parent = unit.parent.as_deref().map(|p| rekey(p, &from, &key));
        }
        debug!(file = %path.display(), from = %from, to = %key, "module key changed");
        next.extraction.module = key;
        renamed.push(path);
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{analyze_source, hash_bytes, FileContent};

    fn files(sources: &[(&str, &str)]) -> BTreeMap<PathBuf, Arc<FileAnalysis>> {
        sources
            .iter()
            .map(|(path, text)| {
                let path = PathBuf::from(path);
                let content = FileContent {
                    bytes: text.as_bytes().to_vec(),
                    hash: hash_bytes(text.as_bytes()),
                    modified: 0,
                };
                let analysis = analyze_source(&path, content, 10).unwrap();
                (path, Arc::new(analysis))
            })
            .collect()
    }

    fn names(files: &BTreeMap<PathBuf, Arc<FileAnalysis>>, path: &str) -> Vec<String> {
        files[Path::new(path)]
            .units()
            .iter()
            .map(|u| u.qualified_name.clone())
            .collect()
    }

    #[test]
    fn test_tiered_keys() {
        let path = Path::new("src/lib.rs");
        assert_eq!(tiered_key(path, 0), "src");
        assert_eq!(tiered_key(path, 1), "src.lib");
        assert_eq!(tiered_key(path, 2), "src.lib.rs");
        assert_eq!(rekey("src.Session.login", "src", "src.lib"), "src.lib.Session.login");
        assert_eq!(rekey("srcx.f", "src", "src.lib"), "srcx.f");
    }

    #[test]
    fn test_crate_root_and_binary_get_distinct_names() {
        let mut files = files(&[
            ("src/lib.rs", "pub fn run() {}\npub fn go() -> u32 { run(); 1 }\n"),
            ("src/main.rs", "fn run() {}\nfn main() { run() }\n"),
        ]);
        let renamed = disambiguate(&mut files);
        assert_eq!(renamed.len(), 2);
        assert_eq!(names(&files, "src/lib.rs"), ["src.lib.run", "src.lib.go"]);
        assert_eq!(names(&files, "src/main.rs"), ["src.main.run", "src.main.main"]);
    }

    #[test]
    fn test_same_stem_in_two_languages() {
        let mut files = files(&[
            ("utils.py", "def helper():\n    pass\n"),
            ("utils.js", "function helper() {}\n"),
        ]);
        disambiguate(&mut files);
        assert_eq!(names(&files, "utils.py"), ["utils.py.helper"]);
        assert_eq!(names(&files, "utils.js"), ["utils.js.helper"]);
    }

    #[test]
    fn test_only_colliding_files_are_renamed() {
        let mut files = files(&[
            ("pkg/index.ts", "export function a() {}\n"),
            ("pkg.ts", "export function a() {}\n"),
            ("other.ts", "export function a() {}\n"),
        ]);
        let renamed = disambiguate(&mut files);
        assert_eq!(renamed, [PathBuf::from("pkg/index.ts")]);
        assert_eq!(names(&files, "pkg/index.ts"), ["pkg.index.a"]);
        assert_eq!(names(&files, "pkg.ts"), ["pkg.a"]);
        assert_eq!(names(&files, "other.ts"), ["other.a"]);
    }

    #[test]
    fn test_names_return_when_the_collision_goes_away() {
        let mut both = files(&[
            ("src/lib.rs", "pub fn run() {}\n"),
            ("src/main.rs", "fn run() {}\n"),
        ]);
        disambiguate(&mut both);
        both.remove(Path::new("src/main.rs"));
        let renamed = disambiguate(&mut both);
        assert_eq!(renamed, [PathBuf::from("src/lib.rs")]);
        assert_eq!(names(&both, "src/lib.rs"), ["src.run"]);
        assert!(disambiguate(&mut both).is_empty());
    }
}

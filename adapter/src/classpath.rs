// Source file to JVM class name mapping
//
// The build writes a `*kotlin-lsp.json` target-info file per target under
// `bazel-out`. Each lists the target's source files (workspace-relative) with
// the binary names of the classes compiled from them.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const TARGET_INFO_SUFFIX: &str = "kotlin-lsp.json";

/// Maps sources to the classes compiled from them and back
pub trait SourceMapping: Send + Sync {
    /// Binary class names for a workspace-relative source path
    fn binary_names_for(&self, source: &Path) -> Vec<String>;

    /// Workspace-relative source path of a binary class name
    fn source_for(&self, binary_name: &str) -> Option<PathBuf>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(default)]
    source_files: Vec<SourceFileInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceFileInfo {
    path: String,
    #[serde(default)]
    jvm_names: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct SourceClassNames {
    by_source: HashMap<PathBuf, BTreeSet<String>>,
    by_binary_name: HashMap<String, PathBuf>,
}

impl SourceClassNames {
    /// Index every target-info file under `<workspace_root>/bazel-out`
    pub fn scan(workspace_root: &Path) -> Self {
        let bazel_out = workspace_root.join("bazel-out");
        let mut names = Self::default();

        if !bazel_out.exists() {
            warn!(
                "{} does not exist, breakpoints will stay unverified until the workspace is built",
                bazel_out.display()
            );
            return names;
        }

        let mut files = 0;
        for entry in WalkDir::new(&bazel_out)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_target_info = entry.file_type().is_file()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().ends_with(TARGET_INFO_SUFFIX))
                    .unwrap_or(false);
            if !is_target_info {
                continue;
            }

            match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<TargetInfo>(&text).map_err(|e| e.to_string()))
            {
                Ok(info) => {
                    files += 1;
                    names.add_target(info);
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        debug!(
            "Indexed {} target-info files, {} sources",
            files,
            names.by_source.len()
        );
        names
    }

    fn add_target(&mut self, info: TargetInfo) {
        for file in info.source_files {
            for name in file.jvm_names {
                self.insert(&file.path, name);
            }
        }
    }

    pub fn insert(&mut self, source: impl Into<PathBuf>, binary_name: impl Into<String>) {
        let source = source.into();
        let name = binary_name.into();
        self.by_binary_name.insert(name.clone(), source.clone());
        self.by_source.entry(source).or_default().insert(name);
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

impl SourceMapping for SourceClassNames {
    fn binary_names_for(&self, source: &Path) -> Vec<String> {
        let names: Vec<String> = self
            .by_source
            .get(source)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        if names.is_empty() {
            warn!("No JVM class names known for {}, its breakpoints may not resolve", source.display());
        }
        names
    }

    fn source_for(&self, binary_name: &str) -> Option<PathBuf> {
        if let Some(source) = self.by_binary_name.get(binary_name) {
            return Some(source.clone());
        }
        // Lambdas and nested classes live in their outer class's file
        let outer = binary_name.split('$').next()?;
        self.by_binary_name.get(outer).cloned()
    }
}

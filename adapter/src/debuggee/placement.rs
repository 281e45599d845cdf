// Breakpoint placement
//
// Turns source breakpoints into low-level requests. Each source maps to one
// or more class names; a loaded class gets location breakpoints right away,
// an unloaded one gets a class-prepare watch and is handled when the VM
// reports it. Changing a source's breakpoints clears everything installed for
// that source and starts over.

use async_trait::async_trait;
use jdwp_wire::commands::event_kinds;
use jdwp_wire::types::{binary_name_to_signature, Location, ReferenceTypeId, RequestId};
use jdwp_wire::{JdwpConnection, JdwpResult, SuspendPolicy};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::breakpoints::{BreakpointSet, ExceptionFilters};
use crate::classpath::SourceMapping;
use crate::error::{AdapterError, AdapterResult};
use crate::model::{Breakpoint, ExceptionBreakpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedClass {
    pub tag: u8,
    pub id: ReferenceTypeId,
}

/// The requests placement needs from a VM
#[async_trait]
pub trait BreakpointBackend: Send + Sync {
    async fn loaded_classes(&self, binary_name: &str) -> JdwpResult<Vec<LoadedClass>>;

    /// Where to break for `line`: the first code index of the line in every
    /// method that has it
    async fn line_locations(&self, class: LoadedClass, line: u32) -> JdwpResult<Vec<Location>>;

    async fn set_location_breakpoint(&self, location: Location) -> JdwpResult<RequestId>;

    async fn clear_location_breakpoint(&self, request: RequestId) -> JdwpResult<()>;

    /// Report classes matching `pattern` as they are prepared
    async fn set_class_watch(&self, pattern: &str) -> JdwpResult<RequestId>;

    async fn clear_class_watch(&self, request: RequestId) -> JdwpResult<()>;

    async fn set_exception_request(&self, caught: bool, uncaught: bool) -> JdwpResult<RequestId>;

    async fn clear_exception_request(&self, request: RequestId) -> JdwpResult<()>;
}

#[async_trait]
impl BreakpointBackend for JdwpConnection {
    async fn loaded_classes(&self, binary_name: &str) -> JdwpResult<Vec<LoadedClass>> {
        let classes = self
            .classes_by_signature(&binary_name_to_signature(binary_name))
            .await?;
        Ok(classes
            .into_iter()
            .map(|c| LoadedClass {
                tag: c.ref_type_tag,
                id: c.type_id,
            })
            .collect())
    }

    async fn line_locations(&self, class: LoadedClass, line: u32) -> JdwpResult<Vec<Location>> {
        let mut locations = Vec::new();
        for method in self.get_methods(class.id).await? {
            // Abstract and native methods have no line table
            let table = match self.get_line_table(class.id, method.method_id).await {
                Ok(table) => table,
                Err(e) if e.is_disconnect() => return Err(e),
                Err(_) => continue,
            };
            if let Some(index) = table.first_index_of_line(line as i32) {
                locations.push(Location {
                    type_tag: class.tag,
                    class_id: class.id,
                    method_id: method.method_id,
                    index,
                });
            }
        }
        Ok(locations)
    }

    async fn set_location_breakpoint(&self, location: Location) -> JdwpResult<RequestId> {
        self.set_breakpoint(location, SuspendPolicy::EventThread).await
    }

    async fn clear_location_breakpoint(&self, request: RequestId) -> JdwpResult<()> {
        self.clear_breakpoint(request).await
    }

    async fn set_class_watch(&self, pattern: &str) -> JdwpResult<RequestId> {
        self.set_class_prepare(pattern, SuspendPolicy::EventThread).await
    }

    async fn clear_class_watch(&self, request: RequestId) -> JdwpResult<()> {
        self.clear_event_request(event_kinds::CLASS_PREPARE, request)
            .await
    }

    async fn set_exception_request(&self, caught: bool, uncaught: bool) -> JdwpResult<RequestId> {
        JdwpConnection::set_exception_request(self, caught, uncaught, SuspendPolicy::EventThread).await
    }

    async fn clear_exception_request(&self, request: RequestId) -> JdwpResult<()> {
        self.clear_event_request(event_kinds::EXCEPTION, request)
            .await
    }
}

/// Everything installed on behalf of one source file
#[derive(Debug, Default)]
struct InstalledSource {
    revision: u64,
    breakpoints: Vec<Breakpoint>,
    locations: Vec<RequestId>,
    watches: Vec<RequestId>,
    verified: HashSet<i64>,
}

pub struct BreakpointPlacer<B> {
    backend: Arc<B>,
    mapping: Arc<dyn SourceMapping>,
    workspace_root: PathBuf,
    installed: HashMap<PathBuf, InstalledSource>,
    /// Class-prepare request → source it was installed for
    watches: HashMap<RequestId, PathBuf>,
    exception_request: Option<(RequestId, bool, bool)>,
}

/// Keep going after a failed request unless the VM is gone
fn tolerate<T>(result: JdwpResult<T>, what: &str) -> AdapterResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_disconnect() => Err(AdapterError::BackendDisconnected),
        Err(e) => {
            warn!("Could not {}: {}", what, e);
            Ok(None)
        }
    }
}

impl<B: BreakpointBackend> BreakpointPlacer<B> {
    pub fn new(backend: Arc<B>, mapping: Arc<dyn SourceMapping>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            mapping,
            workspace_root: workspace_root.into(),
            installed: HashMap::new(),
            watches: HashMap::new(),
            exception_request: None,
        }
    }

    /// Bring the installed requests in line with `desired`. Every source set
    /// since the last sync has all its requests cleared, then placed again.
    /// Returns the ids of all breakpoints installed at one or more locations.
    pub async fn sync(&mut self, desired: &BreakpointSet) -> AdapterResult<HashSet<i64>> {
        let stale: Vec<PathBuf> = self
            .installed
            .iter()
            .filter(|(path, installed)| desired.revisions.get(*path) != Some(&installed.revision))
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            self.clear_source(&path).await?;
        }

        for (path, breakpoints) in &desired.by_source {
            if !self.installed.contains_key(path) {
                let revision = desired.revisions.get(path).copied().unwrap_or_default();
                self.install_source(path, revision, breakpoints).await?;
            }
        }

        Ok(self.verified())
    }

    pub fn verified(&self) -> HashSet<i64> {
        self.installed
            .values()
            .flat_map(|s| s.verified.iter().copied())
            .collect()
    }

    async fn clear_source(&mut self, path: &Path) -> AdapterResult<()> {
        let Some(installed) = self.installed.remove(path) else {
            return Ok(());
        };
        debug!(
            "Clearing {} breakpoint and {} watch requests for {}",
            installed.locations.len(),
            installed.watches.len(),
            path.display()
        );

        for request in installed.locations {
            tolerate(
                self.backend.clear_location_breakpoint(request).await,
                "clear breakpoint request",
            )?;
        }
        for request in installed.watches {
            self.watches.remove(&request);
            tolerate(self.backend.clear_class_watch(request).await, "clear class watch")?;
        }
        Ok(())
    }

    async fn install_source(&mut self, path: &Path, revision: u64, breakpoints: &[Breakpoint]) -> AdapterResult<()> {
        let relative = path
            .strip_prefix(&self.workspace_root)
            .unwrap_or(path)
            .to_path_buf();
        let candidates = self.mapping.binary_names_for(&relative);

        let mut installed = InstalledSource {
            revision,
            breakpoints: breakpoints.to_vec(),
            ..Default::default()
        };

        for candidate in &candidates {
            let loaded = tolerate(
                self.backend.loaded_classes(candidate).await,
                "look up loaded classes",
            )?
            .unwrap_or_default();

            if loaded.is_empty() {
                self.watch(path, candidate.clone(), &mut installed).await?;
            }
            for class in loaded {
                self.install_in_class(class, &mut installed).await?;
            }

            // Lambdas and nested classes are compiled into `Outer$...`
            self.watch(path, format!("{}$*", candidate), &mut installed).await?;
        }

        info!(
            "Placed {} of {} breakpoints in {}",
            installed.verified.len(),
            breakpoints.len(),
            relative.display()
        );
        self.installed.insert(path.to_path_buf(), installed);
        Ok(())
    }

    async fn watch(&mut self, path: &Path, pattern: String, installed: &mut InstalledSource) -> AdapterResult<()> {
        if let Some(request) = tolerate(self.backend.set_class_watch(&pattern).await, "watch class")? {
            debug!("Watching for {} (request {})", pattern, request);
            installed.watches.push(request);
            self.watches.insert(request, path.to_path_buf());
        }
        Ok(())
    }

    /// Install every breakpoint that has code in `class`; returns the newly verified ones
    async fn install_in_class(
        &self,
        class: LoadedClass,
        installed: &mut InstalledSource,
    ) -> AdapterResult<Vec<(i64, u32)>> {
        let mut newly_verified = Vec::new();

        for bp in &installed.breakpoints {
            let locations = tolerate(
                self.backend.line_locations(class, bp.line()).await,
                "read line table",
            )?
            .unwrap_or_default();

            let mut placed = false;
            for location in locations {
                if let Some(request) = tolerate(
                    self.backend.set_location_breakpoint(location).await,
                    "set breakpoint",
                )? {
                    installed.locations.push(request);
                    placed = true;
                }
            }

            if placed && installed.verified.insert(bp.id) {
                newly_verified.push((bp.id, bp.line()));
            }
        }

        Ok(newly_verified)
    }

    /// Handle a class-prepare event. Returns breakpoints that became verified.
    pub async fn on_class_prepared(
        &mut self,
        request: RequestId,
        class: LoadedClass,
    ) -> AdapterResult<Vec<(i64, u32)>> {
        let Some(path) = self.watches.get(&request).cloned() else {
            return Ok(Vec::new());
        };
        let Some(mut installed) = self.installed.remove(&path) else {
            return Ok(Vec::new());
        };

        let result = self.install_in_class(class, &mut installed).await;
        self.installed.insert(path, installed);
        result
    }

    /// Keep a single exception request matching the active filters
    pub async fn set_exception_filters(&mut self, filters: &ExceptionFilters) -> AdapterResult<()> {
        let desired = (!filters.is_empty()).then(|| {
            (
                filters.contains(&ExceptionBreakpoint::Caught),
                filters.contains(&ExceptionBreakpoint::Uncaught),
            )
        });
        let current = self.exception_request.map(|(_, caught, uncaught)| (caught, uncaught));
        if desired == current {
            return Ok(());
        }

        if let Some((request, _, _)) = self.exception_request.take() {
            tolerate(
                self.backend.clear_exception_request(request).await,
                "clear exception request",
            )?;
        }
        if let Some((caught, uncaught)) = desired {
            if let Some(request) = tolerate(
                self.backend.set_exception_request(caught, uncaught).await,
                "set exception request",
            )? {
                debug!("Exception request {} (caught={}, uncaught={})", request, caught, uncaught);
                self.exception_request = Some((request, caught, uncaught));
            }
        }
        Ok(())
    }
}

// Conversion between domain values and protocol values
//
// Owns the client's line/column numbering and the two handle pools. Frame
// and variable handles handed to the client are only meaningful until the
// owning thread runs again.

use std::sync::Mutex;

use crate::error::{AdapterError, AdapterResult};
use crate::model::{self, FrameRef, ThreadId, VariableRef};
use crate::pool::ReferencePool;
use crate::protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numbering {
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
}

impl Default for Numbering {
    fn default() -> Self {
        Self {
            lines_start_at1: true,
            columns_start_at1: true,
        }
    }
}

#[derive(Debug)]
pub struct Converter {
    numbering: Mutex<Numbering>,
    frames: Mutex<ReferencePool<ThreadId, FrameRef>>,
    variables: Mutex<ReferencePool<ThreadId, VariableRef>>,
}

impl Converter {
    pub fn new() -> Self {
        Self {
            numbering: Mutex::new(Numbering::default()),
            frames: Mutex::new(ReferencePool::new("frame")),
            variables: Mutex::new(ReferencePool::new("variable reference")),
        }
    }

    pub fn set_numbering(&self, numbering: Numbering) {
        if let Ok(mut current) = self.numbering.lock() {
            *current = numbering;
        }
    }

    fn numbering(&self) -> Numbering {
        self.numbering.lock().map(|n| *n).unwrap_or_default()
    }

    pub fn line_from_client(&self, line: i64) -> AdapterResult<u32> {
        let offset = if self.numbering().lines_start_at1 { 0 } else { 1 };
        u32::try_from(line + offset)
            .ok()
            .filter(|l| *l >= 1)
            .ok_or_else(|| AdapterError::ProtocolArgument(format!("invalid line {}", line)))
    }

    pub fn line_to_client(&self, line: u32) -> i64 {
        let line = line as i64;
        if self.numbering().lines_start_at1 {
            line
        } else {
            line - 1
        }
    }

    pub fn column_from_client(&self, column: i64) -> Option<u32> {
        let offset = if self.numbering().columns_start_at1 { 0 } else { 1 };
        u32::try_from(column + offset).ok().filter(|c| *c >= 1)
    }

    pub fn column_to_client(&self, column: Option<u32>) -> i64 {
        let column = column.unwrap_or(1) as i64;
        if self.numbering().columns_start_at1 {
            column
        } else {
            column - 1
        }
    }

    pub fn source_from_client(&self, source: &protocol::Source) -> AdapterResult<model::Source> {
        let path = source
            .path
            .as_ref()
            .ok_or_else(|| AdapterError::ProtocolArgument("source has no path".into()))?;
        Ok(model::Source::from_path(path))
    }

    pub fn source_to_client(&self, source: &model::Source) -> protocol::Source {
        protocol::Source {
            name: Some(source.name.clone()),
            path: Some(source.path.display().to_string()),
        }
    }

    pub fn breakpoint_to_client(&self, bp: &model::Breakpoint, verified: bool) -> protocol::Breakpoint {
        protocol::Breakpoint {
            id: bp.id,
            verified,
            line: self.line_to_client(bp.line()),
            source: Some(self.source_to_client(&bp.position.source)),
            message: (!verified).then(|| "Waiting for the class to load".to_string()),
        }
    }

    pub fn thread_to_client(&self, thread: &model::ThreadInfo) -> protocol::Thread {
        protocol::Thread {
            id: thread_to_client(thread.id),
            name: thread.name.clone(),
        }
    }

    pub fn frame_to_client(&self, frame: model::StackFrame) -> AdapterResult<protocol::StackFrame> {
        let id = self.frames.lock().map_err(poisoned)?.store(frame.frame.thread, frame.frame);
        let (source, line, column) = match &frame.position {
            Some(p) => (
                Some(self.source_to_client(&p.source)),
                self.line_to_client(p.line),
                self.column_to_client(p.column),
            ),
            None => (None, 0, 0),
        };
        Ok(protocol::StackFrame {
            id,
            name: frame.name,
            source,
            line,
            column,
        })
    }

    pub fn frame(&self, handle: i64) -> AdapterResult<FrameRef> {
        self.frames.lock().map_err(poisoned)?.get(handle).cloned()
    }

    pub fn scope_to_client(&self, scope: model::Scope) -> AdapterResult<protocol::Scope> {
        Ok(protocol::Scope {
            name: scope.name,
            variables_reference: self.store_variables(scope.variables)?,
            expensive: false,
        })
    }

    pub fn variable_to_client(&self, variable: model::Variable) -> AdapterResult<protocol::Variable> {
        let variables_reference = match variable.children {
            Some(children) => self.store_variables(children)?,
            None => 0,
        };
        Ok(protocol::Variable {
            name: variable.name,
            value: variable.value,
            type_name: variable.type_name,
            variables_reference,
        })
    }

    fn store_variables(&self, reference: VariableRef) -> AdapterResult<i64> {
        let owner = reference.thread();
        Ok(self.variables.lock().map_err(poisoned)?.store(owner, reference))
    }

    pub fn variables(&self, handle: i64) -> AdapterResult<VariableRef> {
        self.variables.lock().map_err(poisoned)?.get(handle).cloned()
    }

    pub fn completion_to_client(&self, item: model::CompletionItem) -> protocol::CompletionItem {
        let kind = match item.kind {
            model::CompletionKind::Variable => "variable",
            model::CompletionKind::Property => "property",
        };
        protocol::CompletionItem {
            label: item.label,
            kind: kind.to_string(),
        }
    }

    /// Forget every handle the thread produced while it was stopped
    pub fn release_thread(&self, thread: ThreadId) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.remove_all_owned_by(&thread);
        }
        if let Ok(mut variables) = self.variables.lock() {
            variables.remove_all_owned_by(&thread);
        }
    }

    pub fn release_all(&self) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
        if let Ok(mut variables) = self.variables.lock() {
            variables.clear();
        }
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AdapterError {
    AdapterError::Io(std::io::Error::other("reference pool lock poisoned"))
}

/// Thread ids are JDWP object ids; DAP wants a number
pub fn thread_to_client(thread: ThreadId) -> i64 {
    thread as i64
}

pub fn thread_from_client(thread: i64) -> ThreadId {
    thread as ThreadId
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdwp_wire::types::Location;

    fn frame_ref(thread: ThreadId) -> FrameRef {
        FrameRef {
            thread,
            frame_id: 1,
            location: Location {
                type_tag: 1,
                class_id: 2,
                method_id: 3,
                index: 0,
            },
        }
    }

    #[test]
    fn test_zero_based_lines() {
        let converter = Converter::new();
        converter.set_numbering(Numbering {
            lines_start_at1: false,
            columns_start_at1: false,
        });

        assert_eq!(converter.line_from_client(0).unwrap(), 1);
        assert_eq!(converter.line_to_client(10), 9);
        assert_eq!(converter.column_to_client(None), 0);
        assert!(converter.line_from_client(-1).is_err());
    }

    #[test]
    fn test_release_thread_only_drops_its_handles() {
        let converter = Converter::new();
        let a = converter
            .frame_to_client(model::StackFrame {
                name: "main".into(),
                position: None,
                frame: frame_ref(1),
            })
            .unwrap();
        let b = converter
            .scope_to_client(model::Scope {
                name: "Locals".into(),
                variables: VariableRef::Locals(frame_ref(2)),
            })
            .unwrap();

        converter.release_thread(1);

        assert!(matches!(converter.frame(a.id), Err(AdapterError::NotFound(_))));
        assert!(converter.variables(b.variables_reference).is_ok());

        converter.release_all();
        assert!(converter.variables(b.variables_reference).is_err());
    }

    #[test]
    fn test_leaf_variable_has_zero_reference() {
        let converter = Converter::new();
        let v = converter
            .variable_to_client(model::Variable {
                name: "x".into(),
                value: "1".into(),
                type_name: Some("int".into()),
                children: None,
            })
            .unwrap();
        assert_eq!(v.variables_reference, 0);
    }
}

// Stack and variable inspection
//
// Read-only queries against a suspended thread. Class metadata (signatures,
// methods, fields) does not change while the VM runs, so it is cached.

use jdwp_wire::protocol::error_codes;
use jdwp_wire::reftype::{FieldInfo, MethodInfo};
use jdwp_wire::stackframe::VariableSlot;
use jdwp_wire::types::{
    signature_to_binary_name, signature_to_type_name, tags, Location, ObjectId, ReferenceTypeId, Value,
};
use jdwp_wire::JdwpResult;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::Inner;
use crate::error::{AdapterError, AdapterResult};
use crate::model::{
    CompletionItem, CompletionKind, FrameRef, Position, Scope, Source, StackFrame, ThreadId, Variable,
    VariableRef,
};

/// Array elements shown per expansion
const MAX_ARRAY_ELEMENTS: i32 = 100;

#[derive(Default)]
pub(super) struct TypeCache {
    signatures: Mutex<HashMap<ReferenceTypeId, String>>,
    methods: Mutex<HashMap<ReferenceTypeId, Arc<Vec<MethodInfo>>>>,
    fields: Mutex<HashMap<ReferenceTypeId, Arc<Vec<FieldInfo>>>>,
}

fn cached<K: std::hash::Hash + Eq + Copy, V: Clone>(map: &Mutex<HashMap<K, V>>, key: K) -> Option<V> {
    map.lock().ok().and_then(|m| m.get(&key).cloned())
}

fn remember<K: std::hash::Hash + Eq, V>(map: &Mutex<HashMap<K, V>>, key: K, value: V) {
    if let Ok(mut m) = map.lock() {
        m.insert(key, value);
    }
}

/// `com.example.Outer$Inner` → `Outer$Inner`
fn simple_name(binary_name: &str) -> &str {
    binary_name.rsplit('.').next().unwrap_or(binary_name)
}

/// `int[]` with 3 elements → `int[3]`
fn array_value(type_name: &str, length: i32) -> String {
    match type_name.strip_suffix("[]") {
        Some(element) => format!("{}[{}]", element, length),
        None => format!("{}[{}]", type_name, length),
    }
}

impl Inner {
    pub(super) async fn signature(&self, class: ReferenceTypeId) -> JdwpResult<String> {
        if let Some(signature) = cached(&self.types.signatures, class) {
            return Ok(signature);
        }
        let signature = self.connection.get_signature(class).await?;
        remember(&self.types.signatures, class, signature.clone());
        Ok(signature)
    }

    pub(super) async fn methods(&self, class: ReferenceTypeId) -> JdwpResult<Arc<Vec<MethodInfo>>> {
        if let Some(methods) = cached(&self.types.methods, class) {
            return Ok(methods);
        }
        let methods = Arc::new(self.connection.get_methods(class).await?);
        remember(&self.types.methods, class, methods.clone());
        Ok(methods)
    }

    pub(super) async fn fields(&self, class: ReferenceTypeId) -> JdwpResult<Arc<Vec<FieldInfo>>> {
        if let Some(fields) = cached(&self.types.fields, class) {
            return Ok(fields);
        }
        let fields = Arc::new(self.connection.get_fields(class).await?);
        remember(&self.types.fields, class, fields.clone());
        Ok(fields)
    }

    async fn binary_name(&self, class: ReferenceTypeId) -> JdwpResult<String> {
        Ok(signature_to_binary_name(&self.signature(class).await?))
    }

    async fn method_name(&self, location: &Location) -> String {
        let class = self
            .binary_name(location.class_id)
            .await
            .unwrap_or_else(|_| "<unknown>".to_string());
        let method = match self.methods(location.class_id).await {
            Ok(methods) => methods
                .iter()
                .find(|m| m.method_id == location.method_id)
                .map(|m| m.name.clone()),
            Err(_) => None,
        };
        format!(
            "{}.{}",
            simple_name(&class),
            method.unwrap_or_else(|| format!("<method {}>", location.method_id))
        )
    }

    /// Source position of a code location, when the class has line information
    pub(super) async fn position_of(&self, location: &Location) -> Option<Position> {
        let line = self
            .connection
            .get_line_table(location.class_id, location.method_id)
            .await
            .ok()?
            .line_for_index(location.index)?;
        let line = u32::try_from(line).ok()?;

        let binary_name = self.binary_name(location.class_id).await.ok()?;
        let source = match self.mapping.source_for(&binary_name) {
            Some(relative) => Source::from_path(self.workspace_root.join(relative)),
            None => {
                // Unmapped: show the compiled-in file name under its package directory
                let file = self.connection.get_source_file(location.class_id).await.ok()?;
                let package: PathBuf = binary_name
                    .rsplit_once('.')
                    .map(|(package, _)| package.split('.').collect())
                    .unwrap_or_default();
                debug!("No source mapping for {}, using {}", binary_name, file);
                Source::from_path(package.join(file))
            }
        };

        Some(Position {
            source,
            line,
            column: None,
        })
    }

    pub(super) async fn stack_trace(&self, thread: ThreadId) -> AdapterResult<Vec<StackFrame>> {
        let frames = self.connection.get_frames(thread, 0, -1).await?;

        let mut stack = Vec::with_capacity(frames.len());
        for frame in frames {
            stack.push(StackFrame {
                name: self.method_name(&frame.location).await,
                position: self.position_of(&frame.location).await,
                frame: FrameRef {
                    thread,
                    frame_id: frame.frame_id,
                    location: frame.location,
                },
            });
        }
        Ok(stack)
    }

    pub(super) fn scopes(&self, frame: &FrameRef) -> Vec<Scope> {
        vec![Scope {
            name: "Locals".to_string(),
            variables: VariableRef::Locals(frame.clone()),
        }]
    }

    pub(super) async fn variables(&self, reference: &VariableRef) -> AdapterResult<Vec<Variable>> {
        match reference {
            VariableRef::Locals(frame) => self.locals(frame).await,
            VariableRef::Object { thread, object } => self.object_fields(*thread, *object).await,
            VariableRef::Array { thread, array, length } => self.array_elements(*thread, *array, *length).await,
        }
    }

    async fn locals(&self, frame: &FrameRef) -> AdapterResult<Vec<Variable>> {
        let location = frame.location;
        let mut variables = Vec::new();

        if let Some(this) = self.connection.get_this_object(frame.thread, frame.frame_id).await? {
            let value = Value {
                tag: tags::OBJECT,
                data: jdwp_wire::types::ValueData::Object(this),
            };
            variables.push(self.render(frame.thread, "this", None, &value).await?);
        }

        let table = match self
            .connection
            .get_variable_table(location.class_id, location.method_id)
            .await
        {
            Ok(table) => table,
            Err(e) if e.code() == Some(error_codes::ABSENT_INFORMATION) => {
                debug!("No variable information for method {}", location.method_id);
                return Ok(variables);
            }
            Err(e) => return Err(e.into()),
        };

        let mut live: Vec<_> = table.into_iter().filter(|v| v.is_live_at(location.index)).collect();
        live.sort_by_key(|v| v.slot);
        if live.is_empty() {
            return Ok(variables);
        }

        let slots: Vec<VariableSlot> = live
            .iter()
            .map(|v| VariableSlot::for_signature(v.slot, &v.signature))
            .collect();
        let values = self
            .connection
            .get_frame_values(frame.thread, frame.frame_id, &slots)
            .await?;

        for (info, value) in live.iter().zip(values.iter()) {
            variables.push(
                self.render(frame.thread, &info.name, Some(&info.signature), value)
                    .await?,
            );
        }
        Ok(variables)
    }

    async fn object_fields(&self, thread: ThreadId, object: ObjectId) -> AdapterResult<Vec<Variable>> {
        let class = self.connection.get_object_reference_type(object).await?;
        let fields: Vec<FieldInfo> = self
            .fields(class)
            .await?
            .iter()
            .filter(|f| !f.is_static())
            .cloned()
            .collect();
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<_> = fields.iter().map(|f| f.field_id).collect();
        let values = self.connection.get_object_values(object, &ids).await?;

        let mut variables = Vec::with_capacity(fields.len());
        for (field, value) in fields.iter().zip(values.iter()) {
            variables.push(self.render(thread, &field.name, Some(&field.signature), value).await?);
        }
        Ok(variables)
    }

    async fn array_elements(&self, thread: ThreadId, array: ObjectId, length: i32) -> AdapterResult<Vec<Variable>> {
        let shown = length.min(MAX_ARRAY_ELEMENTS);
        if shown <= 0 {
            return Ok(Vec::new());
        }

        let values = self.connection.get_array_values(array, 0, shown).await?;
        let mut variables = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            variables.push(self.render(thread, &format!("[{}]", i), None, value).await?);
        }
        Ok(variables)
    }

    /// One named value as the client shows it
    async fn render(
        &self,
        thread: ThreadId,
        name: &str,
        declared: Option<&str>,
        value: &Value,
    ) -> AdapterResult<Variable> {
        let declared_type = declared.map(signature_to_type_name);

        let Some(object) = value.object_id() else {
            let type_name = if tags::is_primitive(value.tag) {
                Some(signature_to_type_name(&(value.tag as char).to_string()))
            } else {
                declared_type
            };
            return Ok(Variable {
                name: name.to_string(),
                value: value.format(),
                type_name,
                children: None,
            });
        };

        if value.tag == tags::STRING {
            let text = self.connection.get_string_value(object).await?;
            return Ok(Variable {
                name: name.to_string(),
                value: format!("\"{}\"", text),
                type_name: Some("java.lang.String".to_string()),
                children: None,
            });
        }

        let class = self.connection.get_object_reference_type(object).await?;
        let type_name = signature_to_type_name(&self.signature(class).await?);

        if value.tag == tags::ARRAY {
            let length = self.connection.get_array_length(object).await?;
            return Ok(Variable {
                name: name.to_string(),
                value: array_value(&type_name, length),
                type_name: Some(type_name),
                children: (length > 0).then_some(VariableRef::Array {
                    thread,
                    array: object,
                    length,
                }),
            });
        }

        Ok(Variable {
            name: name.to_string(),
            value: format!("{} (id={})", simple_name(&type_name), object),
            type_name: Some(type_name),
            children: Some(VariableRef::Object { thread, object }),
        })
    }

    /// Resolve a dotted path of a local (or `this`) and its fields
    pub(super) async fn evaluate(&self, frame: &FrameRef, expression: &str) -> AdapterResult<Option<Variable>> {
        let expression = expression.trim();
        let mut segments = expression.split('.').map(str::trim);
        let Some(first) = segments.next().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let mut current = match self
            .locals(frame)
            .await?
            .into_iter()
            .find(|v| v.name == first)
        {
            Some(variable) => variable,
            None => return Ok(None),
        };

        for segment in segments {
            let Some(children) = current.children.clone() else {
                return Ok(None);
            };
            match self.variables(&children).await?.into_iter().find(|v| v.name == segment) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }

        current.name = expression.to_string();
        Ok(Some(current))
    }

    /// Names visible at `prefix`: locals and fields of `this`, or the fields
    /// of the value left of the last dot
    pub(super) async fn completions(&self, frame: &FrameRef, prefix: &str) -> AdapterResult<Vec<CompletionItem>> {
        if let Some((head, partial)) = prefix.rsplit_once('.') {
            let children = match self.evaluate(frame, head).await? {
                Some(Variable {
                    children: Some(children),
                    ..
                }) => self.variables(&children).await?,
                _ => Vec::new(),
            };
            return Ok(children
                .into_iter()
                .filter(|v| v.name.starts_with(partial))
                .map(|v| CompletionItem {
                    label: v.name,
                    kind: CompletionKind::Property,
                })
                .collect());
        }

        let locals = self.locals(frame).await?;
        let mut items: Vec<CompletionItem> = locals
            .iter()
            .filter(|v| v.name.starts_with(prefix))
            .map(|v| CompletionItem {
                label: v.name.clone(),
                kind: CompletionKind::Variable,
            })
            .collect();

        let this_fields = locals.into_iter().find(|v| v.name == "this").and_then(|v| v.children);
        if let Some(children) = this_fields {
            for field in self.variables(&children).await? {
                if field.name.starts_with(prefix) && !items.iter().any(|i| i.label == field.name) {
                    items.push(CompletionItem {
                        label: field.name,
                        kind: CompletionKind::Property,
                    });
                }
            }
        }
        Ok(items)
    }

    /// `Throwable.detailMessage` of a thrown object
    pub(super) async fn exception_message(&self, exception: ObjectId) -> AdapterResult<Option<String>> {
        let field = match self.detail_message_field().await? {
            Some(field) => field,
            None => return Ok(None),
        };
        let values = self.connection.get_object_values(exception, &[field]).await?;
        match values.first().and_then(Value::object_id) {
            Some(text) => Ok(Some(self.connection.get_string_value(text).await?)),
            None => Ok(None),
        }
    }

    async fn detail_message_field(&self) -> AdapterResult<Option<jdwp_wire::types::FieldId>> {
        if let Some(field) = self.detail_message.lock().ok().and_then(|f| *f) {
            return Ok(Some(field));
        }

        let throwable = self
            .connection
            .classes_by_signature("Ljava/lang/Throwable;")
            .await?;
        let Some(class) = throwable.first() else {
            return Ok(None);
        };
        let field = self
            .fields(class.type_id)
            .await?
            .iter()
            .find(|f| f.name == "detailMessage")
            .map(|f| f.field_id);

        if let (Some(field), Ok(mut slot)) = (field, self.detail_message.lock()) {
            *slot = Some(field);
        }
        Ok(field)
    }
}

/// Errors that only mean the requested frame or object is gone
pub(super) fn is_stale(error: &AdapterError) -> bool {
    matches!(
        error.wire_code(),
        Some(error_codes::INVALID_FRAMEID) | Some(error_codes::INVALID_OBJECT) | Some(error_codes::INVALID_THREAD)
    )
}

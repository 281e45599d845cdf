// JDWP type definitions
//
// Common types used across the JDWP protocol. The client only talks to VMs
// that report 8-byte ids for every id kind (checked at connect time).

use serde::{Deserialize, Serialize};

pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type StringId = ObjectId;
pub type ArrayId = ObjectId;

pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;

/// Id of an installed event request, as returned by EventRequest.Set
pub type RequestId = i32;

/// A code position: type tag (1=class, 2=interface, 3=array), class, method, bytecode index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

impl Location {
    /// Exception events report "no catch location" as an all-zero location
    pub fn is_null(&self) -> bool {
        self.class_id == 0 && self.method_id == 0
    }
}

/// An object id prefixed with its value tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedObject {
    pub tag: u8,
    pub id: ObjectId,
}

/// Value tags as they appear on the wire
pub mod tags {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';

    pub fn is_object(tag: u8) -> bool {
        matches!(
            tag,
            OBJECT | STRING | THREAD | THREAD_GROUP | CLASS_LOADER | CLASS_OBJECT | ARRAY
        )
    }

    pub fn is_primitive(tag: u8) -> bool {
        matches!(tag, BYTE | CHAR | FLOAT | DOUBLE | INT | LONG | SHORT | BOOLEAN)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    pub tag: u8,
    pub data: ValueData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueData {
    Byte(i8),
    Char(u16),
    Float(f32),
    Double(f64),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Object(ObjectId),
    Void,
}

impl Value {
    /// The object id, if this is a non-null reference
    pub fn object_id(&self) -> Option<ObjectId> {
        match self.data {
            ValueData::Object(id) if id != 0 => Some(id),
            _ => None,
        }
    }

    /// Render primitives the way a source-level debugger shows them; references as `@id`
    pub fn format(&self) -> String {
        match &self.data {
            ValueData::Byte(v) => v.to_string(),
            ValueData::Char(v) => format!("'{}'", char::from_u32(*v as u32).unwrap_or('?')),
            ValueData::Float(v) => format!("{}f", v),
            ValueData::Double(v) => v.to_string(),
            ValueData::Int(v) => v.to_string(),
            ValueData::Long(v) => format!("{}L", v),
            ValueData::Short(v) => v.to_string(),
            ValueData::Boolean(v) => v.to_string(),
            ValueData::Object(0) => "null".to_string(),
            ValueData::Object(id) => format!("@{:x}", id),
            ValueData::Void => "void".to_string(),
        }
    }
}

/// Local variable slot information from Method.VariableTable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: u32,
}

impl VariableInfo {
    /// Whether the variable is in scope at the given bytecode index
    pub fn is_live_at(&self, index: u64) -> bool {
        index >= self.code_index && index < self.code_index + self.length as u64
    }
}

/// Convert a type signature (`Lcom/example/Foo$Bar;`) to a binary name (`com.example.Foo$Bar`)
pub fn signature_to_binary_name(signature: &str) -> String {
    signature
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .map(|s| s.replace('/', "."))
        .unwrap_or_else(|| signature_to_type_name(signature))
}

/// Convert a binary class name to its type signature
pub fn binary_name_to_signature(binary_name: &str) -> String {
    format!("L{};", binary_name.replace('.', "/"))
}

/// Human-readable type name of any field/variable signature (`[I` → `int[]`)
pub fn signature_to_type_name(signature: &str) -> String {
    let bytes = signature.as_bytes();
    match bytes.first() {
        Some(b'[') => format!("{}[]", signature_to_type_name(&signature[1..])),
        Some(b'L') => signature[1..].trim_end_matches(';').replace('/', "."),
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'V') => "void".to_string(),
        _ => signature.to_string(),
    }
}

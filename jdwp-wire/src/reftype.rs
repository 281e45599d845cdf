// ReferenceType command implementations
//
// Commands for working with classes, interfaces, and arrays

use crate::commands::{command_sets, reference_type_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{read_count, read_i32, read_string, read_u64};
use crate::types::{FieldId, MethodId, ReferenceTypeId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Method information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

/// Field information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

const ACC_STATIC: i32 = 0x0008;
const ACC_SYNTHETIC: i32 = 0xf0000000u32 as i32;

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & ACC_STATIC != 0
    }

    /// Compiler-generated fields (VM-specific synthetic bit)
    pub fn is_synthetic(&self) -> bool {
        self.mod_bits & ACC_SYNTHETIC != 0
    }
}

fn ref_type_body(ref_type_id: ReferenceTypeId) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.put_u64(ref_type_id);
    body
}

impl JdwpConnection {
    /// JNI signature of a reference type (ReferenceType.Signature)
    pub async fn get_signature(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<String> {
        let reply = self
            .request(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::SIGNATURE,
                ref_type_body(ref_type_id),
            )
            .await?;
        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Source file name recorded in the class (ReferenceType.SourceFile).
    /// Fails with ABSENT_INFORMATION when compiled without debug info.
    pub async fn get_source_file(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<String> {
        let reply = self
            .request(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::SOURCE_FILE,
                ref_type_body(ref_type_id),
            )
            .await?;
        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Fields declared by a reference type (ReferenceType.Fields)
    pub async fn get_fields(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<FieldInfo>> {
        let reply = self
            .request(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::FIELDS,
                ref_type_body(ref_type_id),
            )
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(FieldInfo {
                field_id: read_u64(&mut data)?,
                name: read_string(&mut data)?,
                signature: read_string(&mut data)?,
                mod_bits: read_i32(&mut data)?,
            });
        }

        Ok(fields)
    }

    /// Methods declared by a reference type (ReferenceType.Methods)
    pub async fn get_methods(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<MethodInfo>> {
        let reply = self
            .request(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::METHODS,
                ref_type_body(ref_type_id),
            )
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut methods = Vec::with_capacity(count);
        for _ in 0..count {
            methods.push(MethodInfo {
                method_id: read_u64(&mut data)?,
                name: read_string(&mut data)?,
                signature: read_string(&mut data)?,
                mod_bits: read_i32(&mut data)?,
            });
        }

        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_modifiers() {
        let field = FieldInfo {
            field_id: 1,
            name: "count".into(),
            signature: "I".into(),
            mod_bits: 0x0008 | 0x0002,
        };
        assert!(field.is_static());
        assert!(!field.is_synthetic());
    }
}

// Method command implementations
//
// Commands for working with methods (line tables, variable tables)

use crate::commands::{command_sets, method_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{read_count, read_i32, read_i64, read_string, read_u32, read_u64};
use crate::types::{MethodId, ReferenceTypeId, VariableInfo};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Line table entry - maps source line to bytecode index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineTableEntry {
    pub line_code_index: u64,
    pub line_number: i32,
}

/// Complete line table for a method. `start`/`end` are -1 for native methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineTable {
    pub start: i64,
    pub end: i64,
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// Source line for a bytecode index: the entry with the greatest start not after `index`
    pub fn line_for_index(&self, index: u64) -> Option<i32> {
        self.lines
            .iter()
            .filter(|entry| entry.line_code_index <= index)
            .max_by_key(|entry| entry.line_code_index)
            .map(|entry| entry.line_number)
    }

    /// Lowest bytecode index that starts the given line
    pub fn first_index_of_line(&self, line: i32) -> Option<u64> {
        self.lines
            .iter()
            .filter(|entry| entry.line_number == line)
            .map(|entry| entry.line_code_index)
            .min()
    }
}

fn method_body(ref_type_id: ReferenceTypeId, method_id: MethodId) -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.put_u64(ref_type_id);
    body.put_u64(method_id);
    body
}

impl JdwpConnection {
    /// Method.LineTable
    pub async fn get_line_table(
        &self,
        ref_type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> JdwpResult<LineTable> {
        let reply = self
            .request(
                command_sets::METHOD,
                method_commands::LINE_TABLE,
                method_body(ref_type_id, method_id),
            )
            .await?;
        let mut data = reply.data();

        let start = read_i64(&mut data)?;
        let end = read_i64(&mut data)?;

        let count = read_count(&mut data)?;
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(LineTableEntry {
                line_code_index: read_u64(&mut data)?,
                line_number: read_i32(&mut data)?,
            });
        }

        Ok(LineTable { start, end, lines })
    }

    /// Local variables of a method (Method.VariableTable).
    /// Fails with ABSENT_INFORMATION when compiled without `-g`.
    pub async fn get_variable_table(
        &self,
        ref_type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> JdwpResult<Vec<VariableInfo>> {
        let reply = self
            .request(
                command_sets::METHOD,
                method_commands::VARIABLE_TABLE,
                method_body(ref_type_id, method_id),
            )
            .await?;
        let mut data = reply.data();

        let _arg_count = read_i32(&mut data)?;

        let count = read_count(&mut data)?;
        let mut variables = Vec::with_capacity(count);
        for _ in 0..count {
            variables.push(VariableInfo {
                code_index: read_u64(&mut data)?,
                name: read_string(&mut data)?,
                signature: read_string(&mut data)?,
                length: read_u32(&mut data)?,
                slot: read_u32(&mut data)?,
            });
        }

        Ok(variables)
    }
}

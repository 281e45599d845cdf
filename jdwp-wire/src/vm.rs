// VirtualMachine command implementations
//
// Whole-VM commands: version, class lookup, thread listing, suspend/resume,
// and the two ways of ending a session (Exit and Dispose).

use crate::commands::{command_sets, vm_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{read_count, read_i32, read_string, read_u64, read_u8};
use crate::types::{ReferenceTypeId, ThreadId};
use crate::writer::PacketWriter;
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// JVM version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

/// ID sizes used by the JVM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmIdSizes {
    pub field_id_size: i32,
    pub method_id_size: i32,
    pub object_id_size: i32,
    pub reference_type_id_size: i32,
    pub frame_id_size: i32,
}

impl VmIdSizes {
    pub fn all_equal_to(&self, size: i32) -> bool {
        [
            self.field_id_size,
            self.method_id_size,
            self.object_id_size,
            self.reference_type_id_size,
            self.frame_id_size,
        ]
        .iter()
        .all(|s| *s == size)
    }
}

/// Class information from ClassesBySignature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub ref_type_tag: u8, // 1=class, 2=interface, 3=array
    pub type_id: ReferenceTypeId,
    pub signature: String,
    pub status: i32,
}

impl JdwpConnection {
    /// VirtualMachine.Version
    pub async fn get_version(&self) -> JdwpResult<VmVersion> {
        let reply = self
            .request(command_sets::VIRTUAL_MACHINE, vm_commands::VERSION, Vec::new())
            .await?;
        let mut data = reply.data();

        Ok(VmVersion {
            description: read_string(&mut data)?,
            jdwp_major: read_i32(&mut data)?,
            jdwp_minor: read_i32(&mut data)?,
            vm_version: read_string(&mut data)?,
            vm_name: read_string(&mut data)?,
        })
    }

    /// VirtualMachine.IDSizes
    pub async fn get_id_sizes(&self) -> JdwpResult<VmIdSizes> {
        let reply = self
            .request(command_sets::VIRTUAL_MACHINE, vm_commands::ID_SIZES, Vec::new())
            .await?;
        let mut data = reply.data();

        Ok(VmIdSizes {
            field_id_size: read_i32(&mut data)?,
            method_id_size: read_i32(&mut data)?,
            object_id_size: read_i32(&mut data)?,
            reference_type_id_size: read_i32(&mut data)?,
            frame_id_size: read_i32(&mut data)?,
        })
    }

    /// Find loaded classes by signature (VirtualMachine.ClassesBySignature).
    /// Signature format: "Lcom/example/MyClass;"
    pub async fn classes_by_signature(&self, signature: &str) -> JdwpResult<Vec<ClassInfo>> {
        let mut body = Vec::new();
        body.put_jdwp_string(signature);

        let reply = self
            .request(
                command_sets::VIRTUAL_MACHINE,
                vm_commands::CLASSES_BY_SIGNATURE,
                body,
            )
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut classes = Vec::with_capacity(count);

        for _ in 0..count {
            classes.push(ClassInfo {
                ref_type_tag: read_u8(&mut data)?,
                type_id: read_u64(&mut data)?,
                signature: signature.to_string(),
                status: read_i32(&mut data)?,
            });
        }

        Ok(classes)
    }

    /// VirtualMachine.AllThreads
    pub async fn get_all_threads(&self) -> JdwpResult<Vec<ThreadId>> {
        let reply = self
            .request(command_sets::VIRTUAL_MACHINE, vm_commands::ALL_THREADS, Vec::new())
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut threads = Vec::with_capacity(count);
        for _ in 0..count {
            threads.push(read_u64(&mut data)?);
        }

        Ok(threads)
    }

    /// Suspend all threads (VirtualMachine.Suspend)
    pub async fn suspend_all(&self) -> JdwpResult<()> {
        self.request(command_sets::VIRTUAL_MACHINE, vm_commands::SUSPEND, Vec::new())
            .await?;
        Ok(())
    }

    /// Resume all threads (VirtualMachine.Resume)
    pub async fn resume_all(&self) -> JdwpResult<()> {
        self.request(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME, Vec::new())
            .await?;
        Ok(())
    }

    /// Terminate the VM with the given exit code (VirtualMachine.Exit)
    pub async fn exit(&self, exit_code: i32) -> JdwpResult<()> {
        let mut body = Vec::new();
        body.put_i32(exit_code);
        self.request(command_sets::VIRTUAL_MACHINE, vm_commands::EXIT, body)
            .await?;
        Ok(())
    }

    /// Detach from the VM and let it keep running (VirtualMachine.Dispose)
    pub async fn dispose(&self) -> JdwpResult<()> {
        self.request(command_sets::VIRTUAL_MACHINE, vm_commands::DISPOSE, Vec::new())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::tests::{id_sizes, mock_vm};
    use crate::connection::JdwpConnection;
    use bytes::BufMut;

    #[tokio::test]
    async fn test_classes_by_signature_and_threads() {
        let (host, port) = mock_vm(|set, cmd, data| match (set, cmd) {
            (1, 7) => (0, id_sizes(8)),
            (1, 2) => {
                // Echo one class only for the expected signature
                let expected = b"Lcom/example/MainKt;";
                let mut body = Vec::new();
                if &data[4..] == expected {
                    body.put_i32(1);
                    body.put_u8(1);
                    body.put_u64(0x77);
                    body.put_i32(7);
                } else {
                    body.put_i32(0);
                }
                (0, body)
            }
            (1, 4) => {
                let mut body = Vec::new();
                body.put_i32(2);
                body.put_u64(1);
                body.put_u64(2);
                (0, body)
            }
            _ => (0, Vec::new()),
        })
        .await;

        let connection = JdwpConnection::connect(&host, port).await.unwrap();

        let classes = connection
            .classes_by_signature("Lcom/example/MainKt;")
            .await
            .unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].type_id, 0x77);

        let none = connection.classes_by_signature("LOther;").await.unwrap();
        assert!(none.is_empty());

        assert_eq!(connection.get_all_threads().await.unwrap(), vec![1, 2]);
        connection.resume_all().await.unwrap();
    }
}

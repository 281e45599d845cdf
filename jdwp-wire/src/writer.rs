// Helpers for writing JDWP data types into command packets

use crate::types::Location;
use bytes::BufMut;

pub trait PacketWriter {
    /// Write a JDWP string (4-byte length prefix + UTF-8 bytes)
    fn put_jdwp_string(&mut self, value: &str);

    fn put_location(&mut self, location: &Location);
}

impl PacketWriter for Vec<u8> {
    fn put_jdwp_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.put_u32(bytes.len() as u32);
        self.put_slice(bytes);
    }

    fn put_location(&mut self, location: &Location) {
        self.put_u8(location.type_tag);
        self.put_u64(location.class_id);
        self.put_u64(location.method_id);
        self.put_u64(location.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_location, read_string};

    #[test]
    fn test_string_and_location_layout() {
        let location = Location {
            type_tag: 1,
            class_id: 0x0102,
            method_id: 0x0304,
            index: 9,
        };

        let mut data = Vec::new();
        data.put_jdwp_string("Lcom/example/Main;");
        data.put_location(&location);

        assert_eq!(&data[0..4], &[0, 0, 0, 18]);
        assert_eq!(data.len(), 4 + 18 + 1 + 8 * 3);

        let mut buf = &data[..];
        assert_eq!(read_string(&mut buf).unwrap(), "Lcom/example/Main;");
        assert_eq!(read_location(&mut buf).unwrap(), location);
    }
}

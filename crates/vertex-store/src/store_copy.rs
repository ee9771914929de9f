//! Rotate-and-stream store copy.
//!
//! Seeding a new slave works by rotating every data source's log (so the
//! image has a well-defined cut-off point) and streaming each source's
//! image through a caller-supplied writer. The returned per-source tx ids
//! are the watermarks the fresh copy starts from.

use std::io;

use tracing::info;

use vertex_common::types::TxId;

use crate::data_source::DataSourceSet;
use crate::error::StoreResult;

/// Sink for a streamed store image.
pub trait StoreWriter {
    /// Writes one named file of the store image.
    fn write_file(&mut self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Called once after the last file.
    fn done(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DataSourceSet {
    /// Rotates every data source and streams the store image through
    /// `writer`.
    ///
    /// Returns `(source name, last committed tx id at rotation)` per
    /// source; records applied after the rotation are not part of the
    /// image and reach the copy through the regular transaction stream.
    pub fn copy_store(&self, writer: &mut dyn StoreWriter) -> StoreResult<Vec<(String, TxId)>> {
        let mut rotated = Vec::new();
        for source in self.all() {
            let cutoff = source.rotate();

            let mut image = Vec::new();
            for record in source.stream_since(TxId::INVALID, |tx| tx <= cutoff) {
                image.extend_from_slice(&record.tx_id.as_u64().to_be_bytes());
                image.extend_from_slice(&(record.payload.len() as u32).to_be_bytes());
                image.extend_from_slice(&record.payload);
            }

            writer.write_file(&format!("{}.db", source.name()), &image)?;
            info!(
                source = %source.name(),
                cutoff = %cutoff,
                bytes = image.len(),
                "streamed store image"
            );
            rotated.push((source.name().to_string(), cutoff));
        }
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::DEFAULT_DATA_SOURCE;
    use bytes::Bytes;
    use vertex_common::types::MachineId;

    #[derive(Default)]
    struct CollectingWriter {
        files: Vec<(String, Vec<u8>)>,
        done: bool,
    }

    impl StoreWriter for CollectingWriter {
        fn write_file(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
            self.files.push((name.to_string(), data.to_vec()));
            Ok(())
        }

        fn done(&mut self) -> io::Result<()> {
            self.done = true;
            Ok(())
        }
    }

    #[test]
    fn test_copy_store_rotates_and_streams() {
        let set = DataSourceSet::new(MachineId::new(1));
        let ds = set.default_source();
        ds.apply_prepared(Bytes::from_static(b"hello")).unwrap();
        ds.apply_prepared(Bytes::from_static(b"world")).unwrap();

        let mut writer = CollectingWriter::default();
        let rotated = set.copy_store(&mut writer).unwrap();

        assert_eq!(
            rotated,
            vec![(DEFAULT_DATA_SOURCE.to_string(), TxId::new(2))]
        );
        assert_eq!(ds.rotation_count(), 1);

        assert_eq!(writer.files.len(), 1);
        let (name, image) = &writer.files[0];
        assert_eq!(name, "vertexstore.db");
        // Two records: (8 byte id + 4 byte len + 5 byte payload) each.
        assert_eq!(image.len(), 2 * (8 + 4 + 5));
    }

    #[test]
    fn test_records_after_rotation_excluded_from_image() {
        let set = DataSourceSet::new(MachineId::new(1));
        let ds = set.default_source();
        ds.apply_prepared(Bytes::from_static(b"a")).unwrap();

        let mut writer = CollectingWriter::default();
        let rotated = set.copy_store(&mut writer).unwrap();
        assert_eq!(rotated[0].1, TxId::new(1));

        // A commit after the copy belongs to the stream, not the image.
        ds.apply_prepared(Bytes::from_static(b"b")).unwrap();
        let tail = ds.stream_since(rotated[0].1, |_| true);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].tx_id, TxId::new(2));
    }
}

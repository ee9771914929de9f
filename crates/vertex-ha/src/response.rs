//! Response packing.
//!
//! Every reply to a slave carries, besides its value, the tail of the
//! commit log past that slave's watermarks. Piggybacking the tail on every
//! response lets the slave advance without a separate poll.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use vertex_common::types::TxId;
use vertex_store::DataSourceSet;

use crate::context::SlaveContext;

/// One commit record in a response's transaction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// The data source the record belongs to.
    pub data_source: String,
    /// The committed transaction id.
    pub tx_id: TxId,
    /// The serialized redo payload.
    pub payload: Bytes,
}

/// The ordered commit tail attached to a reply.
///
/// Entries are grouped by data source, ascending by tx id within each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxStream {
    entries: Vec<StreamEntry>,
}

impl TxStream {
    /// An empty stream.
    pub fn empty() -> Self {
        Self::default()
    }

    fn new(entries: Vec<StreamEntry>) -> Self {
        Self { entries }
    }

    /// Returns the entries in stream order.
    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    /// Iterates the stream in order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the stream carries no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A reply value plus the commit tail the caller should apply.
#[derive(Debug, Clone)]
pub struct Response<T> {
    value: T,
    transactions: TxStream,
}

impl<T> Response<T> {
    /// Returns the reply value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the commit tail.
    pub fn transactions(&self) -> &TxStream {
        &self.transactions
    }

    /// Splits the response into value and tail.
    pub fn into_parts(self) -> (T, TxStream) {
        (self.value, self.transactions)
    }
}

/// Builds responses with the commit tail appropriate for a caller.
pub struct ResponsePacker {
    data_sources: Arc<DataSourceSet>,
}

impl ResponsePacker {
    /// Creates a packer reading tails from `data_sources`.
    pub fn new(data_sources: Arc<DataSourceSet>) -> Self {
        Self { data_sources }
    }

    /// Packs `value` with every committed record beyond the caller's
    /// watermarks that passes `filter`.
    pub fn pack<T>(
        &self,
        value: T,
        context: &SlaveContext,
        filter: impl Fn(TxId) -> bool,
    ) -> Response<T> {
        let mut entries = Vec::new();
        for source in self.data_sources.all() {
            let watermark = context.watermark_for(source.name());
            for record in source.stream_since(watermark, &filter) {
                entries.push(StreamEntry {
                    data_source: source.name().to_string(),
                    tx_id: record.tx_id,
                    payload: record.payload,
                });
            }
        }
        Response {
            value,
            transactions: TxStream::new(entries),
        }
    }

    /// Packs `value` with no commit tail, for calls that do not advance the
    /// caller's view of the store.
    pub fn pack_without_stream<T>(&self, value: T) -> Response<T> {
        Response {
            value,
            transactions: TxStream::empty(),
        }
    }
}

impl fmt::Debug for ResponsePacker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsePacker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertex_common::types::MachineId;

    fn packer_with_records(count: u64) -> (ResponsePacker, Arc<DataSourceSet>) {
        let set = Arc::new(DataSourceSet::new(MachineId::new(1)));
        let ds = set.default_source();
        for i in 0..count {
            ds.apply_prepared(Bytes::from(format!("payload-{i}")))
                .unwrap();
        }
        (ResponsePacker::new(Arc::clone(&set)), set)
    }

    fn ctx_with_watermark(tx: u64) -> SlaveContext {
        SlaveContext::new(
            MachineId::new(2),
            1,
            1,
            vec![("vertexstore".into(), TxId::new(tx))],
        )
    }

    #[test]
    fn test_pack_streams_past_watermark() {
        let (packer, _) = packer_with_records(4);

        let response = packer.pack("ok", &ctx_with_watermark(2), |_| true);
        let ids: Vec<u64> = response
            .transactions()
            .iter()
            .map(|e| e.tx_id.as_u64())
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(*response.value(), "ok");
    }

    #[test]
    fn test_pack_applies_filter() {
        let (packer, _) = packer_with_records(4);

        let response = packer.pack((), &ctx_with_watermark(0), |tx| tx < TxId::new(3));
        let ids: Vec<u64> = response
            .transactions()
            .iter()
            .map(|e| e.tx_id.as_u64())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_pack_ascending_order() {
        let (packer, _) = packer_with_records(6);

        let response = packer.pack((), &SlaveContext::empty(), |_| true);
        let ids: Vec<u64> = response
            .transactions()
            .iter()
            .map(|e| e.tx_id.as_u64())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_pack_without_stream() {
        let (packer, _) = packer_with_records(3);

        let response = packer.pack_without_stream(42u64);
        assert!(response.transactions().is_empty());
        assert_eq!(*response.value(), 42);
    }

    #[test]
    fn test_multiple_sources_grouped() {
        let set = Arc::new(DataSourceSet::new(MachineId::new(1)));
        set.register("sidelog")
            .apply_prepared(Bytes::from_static(b"s1"))
            .unwrap();
        set.default_source()
            .apply_prepared(Bytes::from_static(b"v1"))
            .unwrap();

        let packer = ResponsePacker::new(set);
        let response = packer.pack((), &SlaveContext::empty(), |_| true);

        let sources: Vec<&str> = response
            .transactions()
            .iter()
            .map(|e| e.data_source.as_str())
            .collect();
        assert_eq!(sources, vec!["sidelog", "vertexstore"]);
    }
}

use cql_protocol::frame::{StreamId, Version};
use fxhash::FxHashMap;

const WORD_BITS: usize = u64::BITS as usize;

/// Allocates stream ids of a single connection and keeps the item associated with each id in
/// use.
///
/// The lowest free id is always handed out first, so a released id is reused as soon as every
/// lower id is taken. Capacity is fixed by the protocol version.
#[derive(Debug)]
pub struct StreamManager<T> {
    max_streams: usize,
    // set bit = free id
    free: Vec<u64>,
    pending: FxHashMap<StreamId, T>,
}

impl<T> StreamManager<T> {
    pub fn new(version: Version) -> Self {
        Self::with_max_streams(version.max_streams())
    }

    /// Creates a manager for ids in `[0, max_streams)`. `max_streams` is capped at the largest
    /// id the protocol can carry.
    pub fn with_max_streams(max_streams: usize) -> Self {
        let max_streams = max_streams.min(StreamId::MAX as usize + 1);
        let words = max_streams.div_ceil(WORD_BITS);
        let mut free = vec![u64::MAX; words];

        let tail = max_streams % WORD_BITS;
        if tail != 0 {
            if let Some(last) = free.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }

        StreamManager {
            max_streams,
            free,
            pending: FxHashMap::default(),
        }
    }

    /// Reserves the lowest free id for `item`. Returns `None` when every id is in use.
    pub fn acquire(&mut self, item: T) -> Option<StreamId> {
        let (word_index, word) = self
            .free
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != 0)?;

        let bit = word.trailing_zeros() as usize;
        *word &= !(1u64 << bit);

        let stream_id = (word_index * WORD_BITS + bit) as StreamId;
        self.pending.insert(stream_id, item);

        Some(stream_id)
    }

    /// Frees given id, returning the associated item. Releasing an id which is not in use is a
    /// no-op.
    pub fn release(&mut self, stream_id: StreamId) -> Option<T> {
        let item = self.pending.remove(&stream_id)?;

        let index = stream_id as usize;
        self.free[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);

        Some(item)
    }

    #[inline]
    pub fn get(&self, stream_id: StreamId) -> Option<&T> {
        self.pending.get(&stream_id)
    }

    #[inline]
    pub fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut T> {
        self.pending.get_mut(&stream_id)
    }

    #[inline]
    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    /// Number of ids currently in use.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.max_streams - self.pending.len()
    }

    /// Releases every id, returning the items which were still pending.
    pub fn drain(&mut self) -> Vec<(StreamId, T)> {
        let drained: Vec<_> = self.pending.drain().collect();
        for (stream_id, _) in &drained {
            let index = *stream_id as usize;
            self.free[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        }

        drained
    }
}

use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;

/// Restores session byte order from sequenced chunks arriving on many paths.
///
/// Chunks at the expected sequence go straight to the output buffer and pull
/// any directly following chunks out of the out-of-order map. The map has no
/// size bound: a sequence that never arrives keeps everything after it
/// buffered.
#[derive(Debug, Default)]
pub struct Reassembler {
    expected: u32,
    output: BytesMut,
    out_of_order: HashMap<u32, Bytes>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the payload of the chunk numbered `sequence`.
    ///
    /// A second payload for a still-buffered sequence replaces the first.
    /// Sequences already emitted (behind `expected`, modulo wrap) are dropped.
    pub fn push(&mut self, sequence: u32, payload: Bytes) {
        if sequence.wrapping_sub(self.expected) > u32::MAX / 2 {
            tracing::debug!(sequence, expected = self.expected, "dropping stale chunk");
            return;
        }
        if sequence != self.expected {
            self.out_of_order.insert(sequence, payload);
            return;
        }

        self.output.extend_from_slice(&payload);
        self.expected = self.expected.wrapping_add(1);

        while let Some(next) = self.out_of_order.remove(&self.expected) {
            self.output.extend_from_slice(&next);
            self.expected = self.expected.wrapping_add(1);
        }
    }

    /// Copy up to `buf.len()` ordered bytes out, returning how many were copied
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.output.len());
        buf[..n].copy_from_slice(&self.output[..n]);
        self.output.advance(n);
        n
    }

    /// Next sequence number the output is waiting for
    pub fn expected_sequence(&self) -> u32 {
        self.expected
    }

    /// Ordered bytes ready for `read`
    pub fn buffered_len(&self) -> usize {
        self.output.len()
    }

    /// Chunks held back waiting for an earlier sequence
    pub fn pending_len(&self) -> usize {
        self.out_of_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn chunks(data: &[u8], size: usize) -> Vec<(u32, Bytes)> {
        data.chunks(size)
            .enumerate()
            .map(|(i, c)| (i as u32, Bytes::copy_from_slice(c)))
            .collect()
    }

    fn drain(r: &mut Reassembler) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 333];
        loop {
            let n = r.read(&mut buf);
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_in_order() {
        let mut r = Reassembler::new();
        r.push(0, Bytes::from_static(b"hello "));
        r.push(1, Bytes::from_static(b"world"));
        assert_eq!(r.expected_sequence(), 2);
        assert_eq!(r.buffered_len(), 11);
        assert_eq!(drain(&mut r), b"hello world");
        assert!(r.is_empty());
    }

    #[test]
    fn test_gap_holds_back_later_chunks() {
        let mut r = Reassembler::new();
        r.push(1, Bytes::from_static(b"b"));
        r.push(2, Bytes::from_static(b"c"));
        assert!(r.is_empty());
        assert_eq!(r.pending_len(), 2);
        assert_eq!(r.expected_sequence(), 0);

        r.push(0, Bytes::from_static(b"a"));
        assert_eq!(r.pending_len(), 0);
        assert_eq!(r.expected_sequence(), 3);
        assert_eq!(drain(&mut r), b"abc");
    }

    #[test]
    fn test_short_reads() {
        let mut r = Reassembler::new();
        r.push(0, Bytes::from_static(b"abcdef"));

        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(r.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(r.read(&mut buf), 0);
    }

    #[test]
    fn test_empty_buffer_read() {
        let mut r = Reassembler::new();
        r.push(0, Bytes::from_static(b"x"));
        assert_eq!(r.read(&mut []), 0);
        assert_eq!(r.buffered_len(), 1);
    }

    #[test]
    fn test_duplicate_pending_sequence_overwrites() {
        let mut r = Reassembler::new();
        r.push(1, Bytes::from_static(b"first"));
        r.push(1, Bytes::from_static(b"second"));
        r.push(0, Bytes::from_static(b"-"));
        assert_eq!(drain(&mut r), b"-second");
    }

    #[test]
    fn test_stale_sequence_dropped() {
        let mut r = Reassembler::new();
        r.push(0, Bytes::from_static(b"a"));
        r.push(1, Bytes::from_static(b"b"));
        r.push(0, Bytes::from_static(b"x"));
        assert_eq!(r.pending_len(), 0);
        assert_eq!(drain(&mut r), b"ab");
    }

    #[test]
    fn test_empty_payload_advances_sequence() {
        let mut r = Reassembler::new();
        r.push(1, Bytes::from_static(b"z"));
        r.push(0, Bytes::new());
        assert_eq!(r.expected_sequence(), 2);
        assert_eq!(drain(&mut r), b"z");
    }

    #[test]
    fn test_sequence_wraps() {
        let mut r = Reassembler {
            expected: u32::MAX,
            ..Default::default()
        };
        r.push(0, Bytes::from_static(b"2"));
        r.push(u32::MAX, Bytes::from_static(b"1"));
        assert_eq!(r.expected_sequence(), 1);
        assert_eq!(drain(&mut r), b"12");
    }

    #[test]
    fn test_any_permutation_restores_order() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for round in 0..50 {
            let len = rng.gen_range(1..20_000);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let size = rng.gen_range(1..2048);

            let mut parts = chunks(&data, size);
            parts.shuffle(&mut rng);
            if round % 5 == 0 {
                parts.sort_by(|a, b| b.0.cmp(&a.0));
            }

            let mut r = Reassembler::new();
            for (seq, payload) in parts {
                r.push(seq, payload);
            }
            assert_eq!(r.pending_len(), 0);
            assert_eq!(drain(&mut r), data, "round {round}");
        }
    }

    #[test]
    fn test_interleaved_push_and_read() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut parts = chunks(&data, 100);
        // swap neighbours so every other push is out of order
        for pair in parts.chunks_mut(2) {
            pair.reverse();
        }

        let mut r = Reassembler::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        for (seq, payload) in parts {
            r.push(seq, payload);
            let n = r.read(&mut buf);
            out.extend_from_slice(&buf[..n]);
        }
        out.extend(drain(&mut r));
        assert_eq!(out, data);
    }
}

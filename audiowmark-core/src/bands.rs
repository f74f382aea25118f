//! Band planner: which FFT bins carry which bit at which frame.
//!
//! Everything here is a pure function of the key and the fixed protocol
//! parameters; encoder and decoder reconstruct identical plans.

use crate::config::{
    BANDS_PER_FRAME, FRAMES_PER_BIT, MAX_BAND, MIN_BAND, PAYLOAD_SIZE, SYNC_BITS,
    SYNC_FRAMES_PER_BIT,
};
use crate::convcode::{conv_code_size, BlockType};
use crate::random::{Key, Rng, Stream};

/// Frames in one sync block.
pub fn mark_sync_frame_count() -> usize {
    SYNC_BITS * SYNC_FRAMES_PER_BIT
}

/// Frames in one data block.
pub fn mark_data_frame_count() -> usize {
    conv_code_size(BlockType::A, PAYLOAD_SIZE) * FRAMES_PER_BIT
}

/// Up and down band sets for one frame of one stream.
///
/// The usable bins `[MIN_BAND, MAX_BAND]` are shuffled with the frame
/// index as seed; the first `BANDS_PER_FRAME` become the up set, the next
/// `BANDS_PER_FRAME` the down set.
pub fn get_up_down(key: &Key, f: usize, stream: Stream) -> (Vec<usize>, Vec<usize>) {
    let mut bands: Vec<usize> = (MIN_BAND..=MAX_BAND).collect();
    let mut rng = Rng::new(key, f as u64, stream);
    rng.shuffle(&mut bands);

    debug_assert!(2 * BANDS_PER_FRAME < bands.len());
    let up = bands[..BANDS_PER_FRAME].to_vec();
    let down = bands[BANDS_PER_FRAME..2 * BANDS_PER_FRAME].to_vec();
    (up, down)
}

/// The frame-position permutation of one block.
///
/// Sync frame `i` is written at position `pos[i]`, data frame `j` at
/// position `pos[sync_count + j]`; the two sets are disjoint by
/// construction. Computed once per run.
pub struct Layout {
    pos: Vec<usize>,
}

impl Layout {
    pub fn new(key: &Key) -> Self {
        let mut pos: Vec<usize> = (0..mark_sync_frame_count() + mark_data_frame_count()).collect();
        let mut rng = Rng::new(key, 0, Stream::FramePosition);
        rng.shuffle(&mut pos);
        Self { pos }
    }

    pub fn sync_frame_pos(&self, f: usize) -> usize {
        assert!(f < mark_sync_frame_count());
        self.pos[f]
    }

    pub fn data_frame_pos(&self, f: usize) -> usize {
        assert!(f < mark_data_frame_count());
        self.pos[f + mark_sync_frame_count()]
    }
}

/// One scattered embedding slot of the mix plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixEntry {
    pub frame: usize,
    pub up: usize,
    pub down: usize,
}

/// Build the global mix plan: every data frame's up/down pairs, tagged
/// with the frame's permuted position, shuffled as one list. This spreads
/// each data bit's band edits over many time positions.
pub fn gen_mix_entries(key: &Key, layout: &Layout) -> Vec<MixEntry> {
    let mut entries = Vec::with_capacity(mark_data_frame_count() * BANDS_PER_FRAME);
    for f in 0..mark_data_frame_count() {
        let (up, down) = get_up_down(key, f, Stream::DataUpDown);
        let frame = layout.data_frame_pos(f);
        for (u, d) in up.into_iter().zip(down.into_iter()) {
            entries.push(MixEntry { frame, up: u, down: d });
        }
    }
    let mut rng = Rng::new(key, 0, Stream::Mix);
    rng.shuffle(&mut entries);
    entries
}

/// Apply (or undo) the fixed bit-order permutation to a coded bit vector.
pub fn randomize_bit_order<T: Copy + Default>(key: &Key, bits: &[T], encode: bool) -> Vec<T> {
    let mut order: Vec<usize> = (0..bits.len()).collect();
    let mut rng = Rng::new(key, 0, Stream::BitOrder);
    rng.shuffle(&mut order);

    let mut out = vec![T::default(); bits.len()];
    for (i, &o) in order.iter().enumerate() {
        if encode {
            out[i] = bits[o];
        } else {
            out[o] = bits[i];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_frame_counts() {
        assert_eq!(mark_sync_frame_count(), 510);
        assert_eq!(mark_data_frame_count(), 1536);
    }

    #[test]
    fn up_down_disjoint_and_in_range() {
        let key = Key::default();
        for f in 0..40 {
            let (up, down) = get_up_down(&key, f, Stream::DataUpDown);
            assert_eq!(up.len(), BANDS_PER_FRAME);
            assert_eq!(down.len(), BANDS_PER_FRAME);
            for &b in up.iter().chain(down.iter()) {
                assert!((MIN_BAND..=MAX_BAND).contains(&b));
            }
            for u in &up {
                assert!(!down.contains(u), "up and down sets overlap at bin {u}");
            }
        }
    }

    #[test]
    fn up_down_stable_per_frame() {
        let key = Key::from_test_seed(5);
        let a = get_up_down(&key, 17, Stream::SyncUpDown);
        let b = get_up_down(&key, 17, Stream::SyncUpDown);
        assert_eq!(a, b);

        let c = get_up_down(&key, 18, Stream::SyncUpDown);
        assert_ne!(a, c);
    }

    #[test]
    fn up_down_depends_on_stream_and_key() {
        let key = Key::default();
        let data = get_up_down(&key, 3, Stream::DataUpDown);
        let sync = get_up_down(&key, 3, Stream::SyncUpDown);
        assert_ne!(data, sync);

        let other = get_up_down(&Key::from_test_seed(1), 3, Stream::DataUpDown);
        assert_ne!(data, other);
    }

    #[test]
    fn layout_sync_and_data_positions_disjoint() {
        let layout = Layout::new(&Key::default());
        let total = mark_sync_frame_count() + mark_data_frame_count();

        let mut seen = vec![false; total];
        for f in 0..mark_sync_frame_count() {
            seen[layout.sync_frame_pos(f)] = true;
        }
        for f in 0..mark_data_frame_count() {
            let pos = layout.data_frame_pos(f);
            assert!(!seen[pos], "data frame shares position {pos} with sync");
            seen[pos] = true;
        }
        assert!(seen.iter().all(|&s| s), "permutation must cover all positions");
    }

    #[test]
    fn mix_entries_cover_all_slots() {
        let key = Key::default();
        let layout = Layout::new(&key);
        let entries = gen_mix_entries(&key, &layout);
        assert_eq!(entries.len(), mark_data_frame_count() * BANDS_PER_FRAME);

        // same (key, layout) -> same plan
        let again = gen_mix_entries(&key, &layout);
        assert_eq!(entries, again);
    }

    #[test]
    fn bit_order_round_trip() {
        let key = Key::from_test_seed(11);
        let bits: Vec<u8> = (0..768).map(|i| (i % 3 == 0) as u8).collect();
        let scrambled = randomize_bit_order(&key, &bits, true);
        assert_ne!(scrambled, bits);
        let restored = randomize_bit_order(&key, &scrambled, false);
        assert_eq!(restored, bits);
    }
}

// Component H: delayed-controls. A sensor control written for frame N often
// only takes effect several frames later (the pipeline depth between the
// control write and the frame it lands in); this tracks, per control, what
// value is actually active for a given frame so AGC/AWB measure against the
// settings that produced the stats they're looking at, not the settings that
// were just requested.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;

use crate::sensor::ControlId;

const RING_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, Default)]
struct Ring {
    slots: [Option<i64>; RING_SIZE],
    last_known: Option<i64>,
}

impl Ring {
    fn write(&mut self, index: u64, value: i64) {
        self.slots[(index % RING_SIZE as u64) as usize] = Some(value);
        self.last_known = Some(value);
    }

    /// Value effective at `index`: the slot itself if written, otherwise the
    /// most recently written value carried forward (a control holds its
    /// setting until explicitly changed).
    fn read(&self, index: u64) -> Option<i64> {
        self.slots[(index % RING_SIZE as u64) as usize].or(self.last_known)
    }
}

struct Inner {
    rings: HashMap<ControlId, Ring>,
    delays: HashMap<ControlId, u32>,
    write_count: u64,
    queue_count: u64,
    max_delay: u32,
    first_sequence: Option<u64>,
}

impl Inner {
    fn reset(&mut self) {
        self.rings.clear();
        self.write_count = 0;
        self.queue_count = 0;
        self.first_sequence = None;
    }
}

/// `Send + Sync` via an internal mutex: the orchestrator writes controls from
/// `on_fill_params` and reads them back from `on_stats_ready`, potentially
/// from different call sites sharing one orchestrator instance.
pub struct DelayedControls {
    inner: Mutex<Inner>,
}

impl DelayedControls {
    pub fn new(delays: HashMap<ControlId, u32>) -> Self {
        let max_delay = delays.values().copied().max().unwrap_or(0);
        DelayedControls {
            inner: Mutex::new(Inner {
                rings: HashMap::new(),
                delays,
                write_count: 0,
                queue_count: 0,
                max_delay,
                first_sequence: None,
            }),
        }
    }

    pub fn max_delay(&self) -> u32 {
        self.inner.lock().unwrap().max_delay
    }

    pub fn write_count(&self) -> u64 {
        self.inner.lock().unwrap().write_count
    }

    pub fn queue_count(&self) -> u64 {
        self.inner.lock().unwrap().queue_count
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().reset();
    }

    /// Queues one or more control writes for the frame about to be filled.
    /// Advances the write counter once per call, not once per control.
    pub fn push(&self, controls: &[(ControlId, i64)]) {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.write_count;
        for &(id, value) in controls {
            inner.rings.entry(id).or_default().write(index, value);
        }
        inner.write_count += 1;
        inner.queue_count = inner.write_count;
    }

    /// Value of `control` that was in effect on the sensor at capture-time
    /// sequence number `sequence`, i.e. the value the stats for that frame
    /// were actually measured against: `index = max(0, sequence -
    /// first_sequence + 1 - max_delay)`, where `first_sequence` is the
    /// sequence number of the first `frame_start` call. Returns `None` if no
    /// frame has started yet or the control has never been written.
    pub fn get(&self, control: ControlId, sequence: u64) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        let first_sequence = inner.first_sequence?;
        let raw_index = sequence as i64 - first_sequence as i64 + 1 - inner.max_delay as i64;
        let index = raw_index.max(0) as u64;
        inner.rings.get(&control).and_then(|r| r.read(index))
    }

    /// Called at the start of a new frame; latches the sequence number of
    /// the very first frame as the baseline `get` measures against, and
    /// warns (but otherwise tolerates) sequence numbers moving backwards.
    pub fn frame_start(&self, frame_sequence: u64) {
        let mut inner = self.inner.lock().unwrap();
        match inner.first_sequence {
            None => inner.first_sequence = Some(frame_sequence),
            Some(first) if frame_sequence < first => {
                warn!("delayed-controls: frame_start({}) precedes first sequence {}",
                      frame_sequence, first);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays() -> HashMap<ControlId, u32> {
        let mut m = HashMap::new();
        m.insert(ControlId::Exposure, 2);
        m.insert(ControlId::AnalogueGain, 1);
        m
    }

    #[test]
    fn value_lands_after_its_configured_delay() {
        let dc = DelayedControls::new(delays());
        dc.push(&[(ControlId::Exposure, 1000)]);
        dc.push(&[(ControlId::Exposure, 2000)]);
        dc.push(&[(ControlId::Exposure, 3000)]);
        dc.frame_start(10);
        // max_delay is 2, so get(q + max_delay - 1) reports the value pushed
        // at queue index q: get(10 + 2 - 1) == value pushed at index 0.
        assert_eq!(dc.get(ControlId::Exposure, 11), Some(1000));
        assert_eq!(dc.get(ControlId::Exposure, 12), Some(2000));
        assert_eq!(dc.get(ControlId::Exposure, 13), Some(3000));
    }

    #[test]
    fn unwritten_control_carries_forward_last_value() {
        let dc = DelayedControls::new(delays());
        dc.push(&[(ControlId::Exposure, 500), (ControlId::AnalogueGain, 4)]);
        dc.push(&[(ControlId::Exposure, 600)]);
        dc.push(&[(ControlId::Exposure, 700)]);
        dc.frame_start(10);
        // AnalogueGain has delay 1 and was only ever written once; it must
        // still report that value rather than None.
        assert_eq!(dc.get(ControlId::AnalogueGain, 11), Some(4));
    }

    #[test]
    fn reset_clears_all_state() {
        let dc = DelayedControls::new(delays());
        dc.push(&[(ControlId::Exposure, 100)]);
        dc.frame_start(10);
        dc.reset();
        assert_eq!(dc.write_count(), 0);
        assert_eq!(dc.get(ControlId::Exposure, 10), None);
    }

    #[test]
    fn max_delay_is_the_largest_configured_delay() {
        let dc = DelayedControls::new(delays());
        assert_eq!(dc.max_delay(), 2);
    }

    #[test]
    fn sequence_before_first_delay_window_reads_the_earliest_value() {
        let dc = DelayedControls::new(delays());
        dc.push(&[(ControlId::Exposure, 1000)]);
        dc.frame_start(10);
        // Any sequence whose computed index clamps to 0 reads the first
        // queued value, never None, even before the delay has elapsed.
        assert_eq!(dc.get(ControlId::Exposure, 10), Some(1000));
    }
}

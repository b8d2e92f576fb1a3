use crate::model::containers::{DEFAULT_BPM, TempoChange};

/// Elapsed seconds at every tick in `0..=max_tick` for a piecewise-constant tempo curve.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    times: Vec<f64>,
}

impl TempoMap {
    /// Build the mapping from time-ordered tempo breakpoints. A 120 BPM breakpoint is
    /// assumed at tick 0 when the curve does not start there.
    pub fn new(tempo_changes: &[TempoChange], ticks_per_beat: u16, max_tick: u64) -> Self {
        let mut breakpoints: Vec<(u64, f64)> = Vec::with_capacity(tempo_changes.len() + 1);
        if tempo_changes.first().is_none_or(|tc| tc.time > 0) {
            breakpoints.push((0, DEFAULT_BPM));
        }
        breakpoints.extend(tempo_changes.iter().map(|tc| (tc.time, tc.tempo)));

        let last = max_tick as usize;
        let mut times = vec![0.0f64; last + 1];
        let mut acc_time = 0.0f64;

        for (idx, &(start_tick, bpm)) in breakpoints.iter().enumerate() {
            let start = (start_tick as usize).min(last);
            let end = breakpoints
                .get(idx + 1)
                .map_or(last, |&(next, _)| (next as usize).min(last));
            if end < start {
                continue;
            }

            let seconds_per_tick = 60.0 / (bpm * ticks_per_beat as f64);
            for (offset, slot) in times[start..=end].iter_mut().enumerate() {
                *slot = acc_time + seconds_per_tick * offset as f64;
            }
            acc_time = times[end];
        }

        Self { times }
    }

    pub fn time_at_tick(&self, tick: u64) -> Option<f64> {
        self.times.get(tick as usize).copied()
    }

    /// The tick whose elapsed time is nearest to `seconds`; ties resolve to the lower tick.
    pub fn tick_for_time(&self, seconds: f64) -> u64 {
        let idx = self.times.partition_point(|&t| t < seconds);
        if idx == 0 {
            return 0;
        }
        if idx == self.times.len() {
            return (idx - 1) as u64;
        }

        let below = seconds - self.times[idx - 1];
        let above = self.times[idx] - seconds;
        if below <= above {
            (idx - 1) as u64
        } else {
            idx as u64
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

//! Trial delimiter: watch a start buffer, emit trial windows as delimiting
//! events arrive.

use tracing::info;

use contracts::{EventValue, Trial};
use neutral_zone::NeutralZone;

/// Rolling cursor over the start buffer, producing `(start, end)` windows.
///
/// State machine: before the first match, an implicit open trial runs from
/// the configured initial start time (default 0), so pre-experiment data is
/// not dropped. Each new match closes the open window and opens the next.
/// At end of stream, `last` closes the final window with an unknown end.
#[derive(Debug)]
pub struct TrialDelimiter {
    start_buffer: String,
    start_value: EventValue,
    start_value_index: usize,
    start_time: f64,
    trial_count: usize,
    trial_log_mod: usize,
}

impl TrialDelimiter {
    pub fn new(
        start_buffer: impl Into<String>,
        start_value: EventValue,
        start_value_index: usize,
        initial_start_time: f64,
    ) -> Self {
        Self {
            start_buffer: start_buffer.into(),
            start_value,
            start_value_index,
            start_time: initial_start_time,
            trial_count: 0,
            trial_log_mod: 50,
        }
    }

    pub fn start_buffer(&self) -> &str {
        &self.start_buffer
    }

    pub fn trial_count(&self) -> usize {
        self.trial_count
    }

    /// Check the start buffer for new start events, in the buffer's own
    /// clock, and emit one window per new match. `offset` converts the raw
    /// event times into the reference clock.
    pub fn next(&mut self, zone: &NeutralZone, offset: f64) -> Vec<(usize, Trial)> {
        let Some(buffer) = zone.get(&self.start_buffer) else {
            return Vec::new();
        };
        let mut windows = Vec::new();
        for next_start in
            buffer.times_of(&self.start_value, self.start_value_index, None, None)
        {
            if next_start <= self.start_time {
                continue;
            }
            let trial = Trial::new(self.start_time + offset, Some(next_start + offset));
            windows.push((self.trial_count, trial));
            self.start_time = next_start;
            self.trial_count += 1;
            if self.trial_count % self.trial_log_mod == 0 {
                info!(trials = self.trial_count, "delimited trials");
            }
        }
        windows
    }

    /// Close the final, open-ended window with whatever is left.
    pub fn last(&mut self, offset: f64) -> (usize, Trial) {
        let trial = Trial::new(self.start_time + offset, None);
        let number = self.trial_count;
        self.trial_count += 1;
        info!(trials = self.trial_count, "delimited trials (last one)");
        (number, trial)
    }

    /// Let the start buffer release data from before the given reference
    /// time, converted to its raw clock.
    pub fn discard_before(&self, zone: &mut NeutralZone, reference_time: f64, offset: f64) {
        if let Some(buffer) = zone.get_mut(&self.start_buffer) {
            buffer.discard_before(reference_time - offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BufferData, NumericEvents};
    use neutral_zone::Buffer;

    fn zone_with_starts(times: &[f64]) -> NeutralZone {
        let mut zone = NeutralZone::new();
        let mut buffer =
            Buffer::from_prototype(&BufferData::NumericEvents(NumericEvents::empty()));
        let rows: Vec<Vec<f64>> = times.iter().map(|t| vec![*t, 1010.0]).collect();
        buffer.append(BufferData::NumericEvents(NumericEvents::new(rows))).unwrap();
        zone.insert("delimiter", buffer).unwrap();
        zone
    }

    fn delimiter() -> TrialDelimiter {
        TrialDelimiter::new("delimiter", EventValue::Number(1010.0), 0, 0.0)
    }

    #[test]
    fn each_match_closes_one_window() {
        let zone = zone_with_starts(&[1.0, 2.0, 3.0]);
        let mut delimiter = delimiter();
        let windows = delimiter.next(&zone, 0.0);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].1.start_time, 0.0);
        assert_eq!(windows[0].1.end_time, Some(1.0));
        assert_eq!(windows[2].1.start_time, 2.0);
        assert_eq!(windows[2].1.end_time, Some(3.0));
        // No repeats on the next poll.
        assert!(delimiter.next(&zone, 0.0).is_empty());
    }

    #[test]
    fn last_window_is_open_ended() {
        let zone = zone_with_starts(&[1.0]);
        let mut delimiter = delimiter();
        let windows = delimiter.next(&zone, 0.0);
        assert_eq!(windows.len(), 1);
        let (number, trial) = delimiter.last(0.0);
        assert_eq!(number, 1);
        assert_eq!(trial.start_time, 1.0);
        assert_eq!(trial.end_time, None);
    }

    #[test]
    fn no_matches_yields_only_the_final_trial() {
        let zone = zone_with_starts(&[]);
        let mut delimiter = delimiter();
        assert!(delimiter.next(&zone, 0.0).is_empty());
        let (number, trial) = delimiter.last(0.0);
        assert_eq!(number, 0);
        assert_eq!(trial.start_time, 0.0);
        assert_eq!(trial.end_time, None);
    }

    #[test]
    fn offset_converts_to_reference_clock() {
        let zone = zone_with_starts(&[1.0, 2.0]);
        let mut delimiter = delimiter();
        let windows = delimiter.next(&zone, -0.25);
        assert_eq!(windows[0].1.start_time, -0.25);
        assert_eq!(windows[1].1.start_time, 0.75);
        assert_eq!(windows[1].1.end_time, Some(1.75));
    }
}

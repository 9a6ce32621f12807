//! Rule output logs and their compaction
//!
//! Every evaluation step produces one output per rule instance. Stored
//! verbatim that would grow without bound at one row per telemetry sample,
//! so the log squashes runs of equal state into single interval rows as it
//! appends. Rows stay in non-decreasing start order at all times.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Longest invalid-reason text kept on an output row
pub const MAX_OUTPUT_TEXT: usize = 500;

/// Why an output is invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidCategory {
    /// An input produced a non-finite or otherwise unusable value
    InvalidValue,
    /// A bound input has no samples at all
    MissingValue,
    /// Not enough samples in the window yet
    InsufficientData,
    /// Buffer does not span the required time range yet
    InsufficientRange,
}

impl InvalidCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidCategory::InvalidValue => "InvalidValue",
            InvalidCategory::MissingValue => "MissingValue",
            InvalidCategory::InsufficientData => "InsufficientData",
            InvalidCategory::InsufficientRange => "InsufficientRange",
        }
    }
}

/// One row of the output log covering `[start_time, end_time]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_valid: bool,
    pub faulted: bool,
    /// Reason text for invalid rows, truncated to [`MAX_OUTPUT_TEXT`]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<InvalidCategory>,
    /// Named variable values captured at evaluation time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<(String, f64)>,
}

impl OutputValue {
    pub fn valid(start: DateTime<Utc>, end: DateTime<Utc>, faulted: bool) -> Self {
        Self {
            start_time: start,
            end_time: end,
            is_valid: true,
            faulted,
            text: String::new(),
            category: None,
            variables: Vec::new(),
        }
    }

    pub fn invalid(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: InvalidCategory,
        text: impl Into<String>,
    ) -> Self {
        Self {
            start_time: start,
            end_time: end,
            is_valid: false,
            faulted: false,
            text: truncate_text(text.into()),
            category: Some(category),
            variables: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: Vec<(String, f64)>) -> Self {
        self.variables = variables;
        self
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Rows merge when validity, fault state and category all match
    fn same_state(&self, other: &OutputValue) -> bool {
        self.is_valid == other.is_valid
            && self.faulted == other.faulted
            && self.category == other.category
    }
}

fn truncate_text(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_TEXT {
        let mut cut = MAX_OUTPUT_TEXT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

/// Squashing append-only log of output rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputValues {
    points: Vec<OutputValue>,
    /// Fault occurrences ever recorded, surviving compaction and trimming
    pub faulted_count: usize,
    /// Start of the earliest faulted row ever seen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_faulted_time: Option<DateTime<Utc>>,
    /// Variable values from the most recent row that carried any
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub last_variables: HashMap<String, f64>,
    /// Names whose last-known value is copied into every new row even when
    /// the step that produced the row did not supply one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables_to_keep: Vec<String>,
}

impl OutputValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keeping(variables_to_keep: Vec<String>) -> Self {
        Self {
            variables_to_keep,
            ..Self::default()
        }
    }

    /// Record the evaluation outcome at a single instant. A repeat of the
    /// tail row's state extends that row's end to `now` no matter how much
    /// time has passed; a state change opens a new zero-width row at `now`.
    /// A `now` at or before existing rows replays history, pruning first.
    pub fn with_output(
        &mut self,
        now: DateTime<Utc>,
        is_valid: bool,
        faulted: bool,
        category: Option<InvalidCategory>,
        text: impl Into<String>,
        variables: Vec<(String, f64)>,
    ) {
        let row = OutputValue {
            start_time: now,
            end_time: now,
            is_valid,
            faulted,
            text: truncate_text(text.into()),
            category,
            variables,
        };

        self.prune_from(now);
        let row = self.retained(row);
        self.bookkeep(&row);

        let extends_tail = self.points.last().is_some_and(|last| last.same_state(&row));
        if extends_tail {
            if let Some(last) = self.points.last_mut() {
                last.end_time = now;
                if !row.variables.is_empty() {
                    last.variables = row.variables;
                }
                if !row.text.is_empty() {
                    last.text = row.text;
                }
            }
        } else {
            self.points.push(row);
        }
    }

    /// Insert a whole interval. An interval sharing the tail's state that
    /// overlaps it, or starts within one second of its end, collapses into
    /// the tail; anything further away stays a distinct row. A different
    /// state overwrites whatever of the tail it covers.
    pub fn add(&mut self, output: OutputValue) {
        fn merges(last: &OutputValue, output: &OutputValue) -> bool {
            last.same_state(output)
                && output.start_time <= last.end_time + Duration::seconds(1)
                && output.end_time + Duration::seconds(1) >= last.start_time
        }

        let output = self.retained(output);

        // drop superseded rows first so bookkeeping compares against the
        // row that actually ends up preceding the replayed interval
        while self
            .points
            .last()
            .is_some_and(|last| last.start_time >= output.start_time && !merges(last, &output))
        {
            self.points.pop();
        }
        self.bookkeep(&output);

        let merge_tail = self.points.last().is_some_and(|last| merges(last, &output));
        if merge_tail {
            if let Some(last) = self.points.last_mut() {
                last.start_time = last.start_time.min(output.start_time);
                last.end_time = last.end_time.max(output.end_time);
                if !output.variables.is_empty() {
                    last.variables = output.variables;
                }
                if !output.text.is_empty() {
                    last.text = output.text;
                }
            }
        } else {
            if let Some(last) = self.points.last_mut() {
                if last.end_time > output.start_time {
                    last.end_time = output.start_time;
                }
            }
            self.points.push(output);
        }
    }

    fn prune_from(&mut self, now: DateTime<Utc>) {
        while self.points.last().is_some_and(|last| last.start_time > now) {
            self.points.pop();
        }
        if let Some(last) = self.points.last_mut() {
            if last.end_time > now {
                last.end_time = now;
            }
        }
    }

    /// Fold kept last-known variables into a row's snapshot
    fn retained(&self, mut row: OutputValue) -> OutputValue {
        for name in &self.variables_to_keep {
            if !row.variables.iter().any(|(n, _)| n == name) {
                if let Some(value) = self.last_variables.get(name) {
                    row.variables.push((name.clone(), *value));
                }
            }
        }
        row
    }

    fn bookkeep(&mut self, row: &OutputValue) {
        // count fault transitions, not fault extensions
        if row.faulted && !self.points.last().is_some_and(|p| p.faulted) {
            self.faulted_count += 1;
            if self.first_faulted_time.is_none() {
                self.first_faulted_time = Some(row.start_time);
            }
        }
        for (name, value) in &row.variables {
            self.last_variables.insert(name.clone(), *value);
        }
    }

    pub fn points(&self) -> &[OutputValue] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&OutputValue> {
        self.points.last()
    }

    /// Start times never decrease along the log
    pub fn is_in_order(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[0].start_time <= w[1].start_time)
    }

    /// Currently faulted, judging by the tail row
    pub fn is_faulted(&self) -> bool {
        self.points.last().is_some_and(|p| p.faulted)
    }

    pub fn is_valid(&self) -> bool {
        self.points.last().is_some_and(|p| p.is_valid)
    }

    /// Drop rows that ended before `cutoff`, keeping the tail regardless.
    /// Fault bookkeeping is cumulative and unaffected.
    pub fn apply_limits(&mut self, cutoff: DateTime<Utc>) {
        let keep_from = self
            .points
            .iter()
            .position(|p| p.end_time >= cutoff)
            .unwrap_or_else(|| self.points.len().saturating_sub(1));
        if keep_from > 0 {
            self.points.drain(..keep_from);
        }
    }
}

/// One command line produced by a command rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutputValue {
    pub command_id: String,
    pub triggered: bool,
    pub value: f64,
    /// When the current trigger run began; survives untriggered updates
    pub trigger_start_time: DateTime<Utc>,
    pub trigger_end_time: DateTime<Utc>,
}

/// Latest command state per command id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputValuesCommand {
    commands: HashMap<String, CommandOutputValue>,
}

impl OutputValuesCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the state for one command. A rising edge (untriggered to
    /// triggered) restarts the trigger window; an untriggered update keeps
    /// the previous window bounds so the last run stays inspectable.
    pub fn with_output(
        &mut self,
        command_id: &str,
        triggered: bool,
        value: f64,
        now: DateTime<Utc>,
    ) {
        match self.commands.get_mut(command_id) {
            Some(existing) => {
                if triggered {
                    if !existing.triggered {
                        existing.trigger_start_time = now;
                    }
                    existing.trigger_end_time = now;
                    existing.value = value;
                }
                existing.triggered = triggered;
            }
            None => {
                self.commands.insert(
                    command_id.to_string(),
                    CommandOutputValue {
                        command_id: command_id.to_string(),
                        triggered,
                        value,
                        trigger_start_time: now,
                        trigger_end_time: now,
                    },
                );
            }
        }
    }

    pub fn get(&self, command_id: &str) -> Option<&CommandOutputValue> {
        self.commands.get(command_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandOutputValue> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn step_valid(log: &mut OutputValues, now: DateTime<Utc>, faulted: bool) {
        log.with_output(now, true, faulted, None, "", Vec::new());
    }

    #[test]
    fn repeated_state_extends_tail_row() {
        let mut log = OutputValues::new();
        for i in 0..5 {
            step_valid(&mut log, at(i * 10), false);
        }
        assert_eq!(log.len(), 1);
        assert_eq!(log.points()[0].start_time, at(0));
        assert_eq!(log.points()[0].end_time, at(40));
        assert!(log.is_in_order());
    }

    #[test]
    fn state_change_opens_new_row() {
        let mut log = OutputValues::new();
        step_valid(&mut log, at(0), false);
        step_valid(&mut log, at(10), false);
        step_valid(&mut log, at(20), true);
        step_valid(&mut log, at(30), true);
        step_valid(&mut log, at(40), false);
        assert_eq!(log.len(), 3);
        assert_eq!(log.points()[1].start_time, at(20));
        assert_eq!(log.points()[1].end_time, at(30));
        assert!(log.points()[1].faulted);
        assert!(log.is_in_order());
    }

    #[test]
    fn category_change_is_never_squashed() {
        let mut log = OutputValues::new();
        log.with_output(
            at(0),
            false,
            false,
            Some(InvalidCategory::MissingValue),
            "no data",
            Vec::new(),
        );
        log.with_output(
            at(10),
            false,
            false,
            Some(InvalidCategory::InsufficientData),
            "need more",
            Vec::new(),
        );
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn replayed_time_rewrites_history() {
        let mut log = OutputValues::new();
        step_valid(&mut log, at(0), false);
        step_valid(&mut log, at(10), false);
        step_valid(&mut log, at(20), true);
        step_valid(&mut log, at(30), true);
        // replay from t=10 with a different verdict
        step_valid(&mut log, at(10), false);
        step_valid(&mut log, at(30), false);
        assert_eq!(log.len(), 1);
        assert_eq!(log.points()[0].start_time, at(0));
        assert_eq!(log.points()[0].end_time, at(30));
        assert!(!log.is_faulted());
    }

    #[test]
    fn add_collapses_overlapping_same_state() {
        // offsets around a 10 second base interval
        for offset in -10..=11i64 {
            let mut log = OutputValues::new();
            log.add(OutputValue::valid(at(0), at(10), false));
            log.add(OutputValue::valid(at(offset), at(offset + 10), false));
            assert_eq!(log.len(), 1, "offset {} should collapse", offset);
            assert!(log.is_in_order());
        }
    }

    #[test]
    fn add_keeps_gapped_intervals_distinct() {
        let mut log = OutputValues::new();
        log.add(OutputValue::valid(at(0), at(10), false));
        log.add(OutputValue::valid(at(20), at(30), false));
        assert_eq!(log.len(), 2);
        assert!(log.is_in_order());
    }

    #[test]
    fn add_never_squashes_across_categories() {
        let mut log = OutputValues::new();
        log.add(OutputValue::valid(at(0), at(10), false));
        log.add(OutputValue::valid(at(10), at(20), true));
        assert_eq!(log.len(), 2);
        assert_eq!(log.points()[0].end_time, at(10));
    }

    #[test]
    fn replayed_fault_rejoining_a_run_counts_once() {
        let mut log = OutputValues::new();
        log.add(OutputValue::valid(at(0), at(10), true));
        log.add(OutputValue::valid(at(10), at(20), false));
        // replay from t=10 flips the verdict back; the non-faulted row is
        // superseded and the interval rejoins the first run
        log.add(OutputValue::valid(at(10), at(30), true));
        assert_eq!(log.len(), 1);
        assert_eq!(log.points()[0].start_time, at(0));
        assert_eq!(log.points()[0].end_time, at(30));
        assert_eq!(log.faulted_count, 1);
        assert!(log.is_in_order());
    }

    #[test]
    fn fault_transitions_counted_once_per_run() {
        let mut log = OutputValues::new();
        step_valid(&mut log, at(0), false);
        step_valid(&mut log, at(10), true);
        step_valid(&mut log, at(20), true);
        step_valid(&mut log, at(30), false);
        step_valid(&mut log, at(40), true);
        assert_eq!(log.faulted_count, 2);
        assert_eq!(log.first_faulted_time, Some(at(10)));
    }

    #[test]
    fn text_truncates_at_limit() {
        let long = "x".repeat(600);
        let row = OutputValue::invalid(at(0), at(10), InvalidCategory::InvalidValue, long);
        assert_eq!(row.text.len(), MAX_OUTPUT_TEXT);
    }

    #[test]
    fn kept_variables_carry_forward_into_new_rows() {
        let mut log = OutputValues::keeping(vec!["result".into()]);
        log.with_output(at(0), true, false, None, "", vec![("result".into(), 3.0)]);
        log.with_output(at(10), true, true, None, "", Vec::new());
        assert_eq!(log.last().unwrap().variables, vec![("result".into(), 3.0)]);
    }

    #[test]
    fn no_prior_variables_yields_empty_snapshot() {
        let mut log = OutputValues::keeping(vec!["result".into()]);
        log.with_output(
            at(0),
            false,
            false,
            Some(InvalidCategory::MissingValue),
            "no data",
            Vec::new(),
        );
        assert!(log.last().unwrap().variables.is_empty());
    }

    #[test]
    fn apply_limits_keeps_tail() {
        let mut log = OutputValues::new();
        log.add(OutputValue::valid(at(0), at(10), false));
        log.add(OutputValue::valid(at(10), at(20), true));
        log.add(OutputValue::valid(at(30), at(40), false));
        log.apply_limits(at(1000));
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().start_time, at(30));
    }

    #[test]
    fn untriggered_update_keeps_trigger_window() {
        let mut cmds = OutputValuesCommand::new();
        cmds.with_output("open-valve", true, 1.0, at(0));
        cmds.with_output("open-valve", true, 1.0, at(10));
        cmds.with_output("open-valve", false, 0.0, at(20));
        let cmd = cmds.get("open-valve").unwrap();
        assert!(!cmd.triggered);
        assert_eq!(cmd.trigger_start_time, at(0));
        assert_eq!(cmd.trigger_end_time, at(10));
    }

    #[test]
    fn rising_edge_restarts_trigger_window() {
        let mut cmds = OutputValuesCommand::new();
        cmds.with_output("open-valve", true, 1.0, at(0));
        cmds.with_output("open-valve", false, 0.0, at(10));
        cmds.with_output("open-valve", true, 2.0, at(20));
        let cmd = cmds.get("open-valve").unwrap();
        assert!(cmd.triggered);
        assert_eq!(cmd.trigger_start_time, at(20));
        assert_eq!(cmd.value, 2.0);
    }
}

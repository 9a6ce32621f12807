//! Per-instance evaluation state machine
//!
//! One [`ActorState`] per rule instance. The executor feeds it timestamped
//! samples in order; each `step` evaluates every bound parameter against
//! the latest known inputs and appends one interval to the output log.
//! Evaluation failures degrade to invalid intervals, never to a panic or
//! an error escaping the step.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use tracing::trace;
use twin_expr::{eval, Env, EvalError};
use twin_model::{
    CumulativeType, InstanceStatus, InvalidCategory, OutputValues, OutputValuesCommand,
    RuleInstance, RuleParameterBound, TimeSeriesBuffer, TimedValue,
};

/// Creation-time knobs for one actor
#[derive(Debug, Clone)]
pub struct ActorSettings {
    pub started: DateTime<Utc>,
    /// Steps before this much time has passed evaluate but record nothing
    pub settle_interval: Duration,
    /// Template: fault verdict requires the result buffer to span this long
    pub over_hours: Option<f64>,
    /// Template: fraction of the window that must be faulted, 0..=1
    pub percentage_of_time: Option<f64>,
    /// Names carried forward in output variable snapshots
    pub variables_to_keep: Vec<String>,
}

impl ActorSettings {
    pub fn starting(started: DateTime<Utc>) -> Self {
        Self {
            started,
            settle_interval: Duration::zero(),
            over_hours: None,
            percentage_of_time: None,
            variables_to_keep: Vec::new(),
        }
    }
}

/// Runtime state for one bound rule instance
#[derive(Debug)]
pub struct ActorState {
    pub id: String,
    pub rule_instance: RuleInstance,
    /// Input and result series, keyed by point id or parameter field id
    pub timed_values: FxHashMap<String, TimeSeriesBuffer>,
    pub outputs: OutputValues,
    pub output_commands: OutputValuesCommand,
    accumulators: FxHashMap<String, f64>,
    last_step: Option<DateTime<Utc>>,
    settings: ActorSettings,
}

impl ActorState {
    pub fn new(instance: RuleInstance, settings: ActorSettings) -> Self {
        Self {
            id: instance.id.clone(),
            rule_instance: instance,
            timed_values: FxHashMap::default(),
            outputs: OutputValues::keeping(settings.variables_to_keep.clone()),
            output_commands: OutputValuesCommand::new(),
            accumulators: FxHashMap::default(),
            last_step: None,
            settings,
        }
    }

    /// Invalid instances (cycles, parse failures) keep their actor so the
    /// caller can observe them, but the actor never evaluates.
    pub fn is_valid(&self) -> bool {
        self.rule_instance.status == InstanceStatus::Valid && !self.rule_instance.disabled
    }

    /// Record an input sample. Callers deliver samples in timestamp order.
    pub fn observe(&mut self, point_id: &str, sample: TimedValue) {
        self.timed_values
            .entry(point_id.to_string())
            .or_default()
            .add(sample);
    }

    /// The result-stream series for a parameter field id
    pub fn series(&self, field_id: &str) -> Option<&TimeSeriesBuffer> {
        self.timed_values.get(field_id)
    }

    /// Evaluate all parameters at `now` and append one output interval.
    pub fn step(&mut self, now: DateTime<Utc>) {
        if !self.is_valid() {
            return;
        }

        let mut env = Env::at(now);
        for pid in self.rule_instance.point_ids() {
            if let Some(last) = self.timed_values.get(pid).and_then(|b| b.last()) {
                env.assign_double(pid, last.value);
            }
        }

        let parameters: Vec<RuleParameterBound> = self.rule_instance.parameters_bound.clone();
        let mut result = 0.0;
        let mut snapshot: Vec<(String, f64)> = Vec::with_capacity(parameters.len());

        for param in &parameters {
            let value = match eval(&param.expression, &env) {
                Ok(v) => v,
                Err(EvalError::UnboundVariable(name)) => {
                    self.missing_output(now, &name);
                    return;
                }
                Err(err) => {
                    self.invalid_output(now, InvalidCategory::InvalidValue, err.to_string());
                    return;
                }
            };
            // booleans leave the actor as 0/1, never as text
            let Some(number) = value.as_f64() else {
                self.invalid_output(
                    now,
                    InvalidCategory::InvalidValue,
                    format!("Bad value for {}={} from {}", param.field_id, value, param.expression),
                );
                return;
            };
            let number = self.accumulate(param, number, now);

            env.assign_double(param.field_id.clone(), number);
            self.timed_values
                .entry(param.field_id.clone())
                .or_default()
                .add(TimedValue::new(now, number));
            snapshot.push((param.field_id.clone(), number));
            result = number;
        }

        if let Some(category) = self.window_shortfall(&parameters, now) {
            let text = match category {
                InvalidCategory::InsufficientData => "not enough samples in window".to_string(),
                _ => "buffer does not span the required range yet".to_string(),
            };
            self.invalid_output(now, category, text);
            return;
        }

        // scores are best-effort: a failing score skips this step only
        let scores: Vec<RuleParameterBound> = self.rule_instance.impact_scores_bound.clone();
        for score in &scores {
            match eval(&score.expression, &env).ok().and_then(|v| v.as_f64()) {
                Some(value) => {
                    let value = self.accumulate(score, value, now);
                    self.timed_values
                        .entry(score.field_id.clone())
                        .or_default()
                        .add(TimedValue::new(now, value));
                    snapshot.push((score.field_id.clone(), value));
                }
                None => trace!(actor = %self.id, score = %score.field_id, "impact score skipped"),
            }
        }

        let faulted = self.verdict(&parameters, result, now);
        self.valid_output(now, faulted, snapshot, result);
    }

    fn accumulate(&mut self, param: &RuleParameterBound, value: f64, now: DateTime<Utc>) -> f64 {
        if param.cumulative_setting == CumulativeType::Simple {
            return value;
        }
        let elapsed = self
            .last_step
            .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        let delta = match param.cumulative_setting {
            CumulativeType::Simple => value,
            CumulativeType::Accumulate => value,
            CumulativeType::AccumulateTimeSeconds => value * elapsed,
            CumulativeType::AccumulateTimeMinutes => value * elapsed / 60.0,
            CumulativeType::AccumulateTimeHours => value * elapsed / 3600.0,
        };
        let total = self.accumulators.entry(param.field_id.clone()).or_insert(0.0);
        *total += delta;
        *total
    }

    /// Template window checks against the result series
    fn window_shortfall(
        &self,
        parameters: &[RuleParameterBound],
        _now: DateTime<Utc>,
    ) -> Option<InvalidCategory> {
        let hours = self.settings.over_hours?;
        let field = parameters.last()?.field_id.as_str();
        let buffer = self.timed_values.get(field)?;
        if buffer.len() < 2 {
            return Some(InvalidCategory::InsufficientData);
        }
        let needed = Duration::milliseconds((hours * 3_600_000.0) as i64);
        if buffer.range().is_some_and(|r| r < needed) {
            return Some(InvalidCategory::InsufficientRange);
        }
        None
    }

    fn verdict(&self, parameters: &[RuleParameterBound], result: f64, now: DateTime<Utc>) -> bool {
        let instant = result != 0.0;
        let (Some(hours), Some(pct)) = (self.settings.over_hours, self.settings.percentage_of_time)
        else {
            return instant;
        };
        let Some(field) = parameters.last().map(|p| p.field_id.as_str()) else {
            return instant;
        };
        let Some(buffer) = self.timed_values.get(field) else {
            return instant;
        };
        let window = Duration::milliseconds((hours * 3_600_000.0) as i64);
        let mut total = 0usize;
        let mut faulted = 0usize;
        for sample in buffer.window(now - window, now) {
            total += 1;
            if sample.value != 0.0 {
                faulted += 1;
            }
        }
        total > 0 && faulted as f64 / total as f64 >= pct
    }

    fn settled(&self, now: DateTime<Utc>) -> bool {
        now - self.settings.started >= self.settings.settle_interval
    }

    fn valid_output(
        &mut self,
        now: DateTime<Utc>,
        faulted: bool,
        snapshot: Vec<(String, f64)>,
        result: f64,
    ) {
        let settled = self.settled(now);
        self.last_step = Some(now);
        if !settled {
            return;
        }
        trace!(actor = %self.id, faulted, result, "valid step");
        self.outputs.with_output(now, true, faulted, None, "", snapshot);
        self.output_commands.with_output(&self.id, faulted, result, now);
    }

    fn invalid_output(&mut self, now: DateTime<Utc>, category: InvalidCategory, text: String) {
        let settled = self.settled(now);
        self.last_step = Some(now);
        if !settled {
            return;
        }
        trace!(actor = %self.id, %text, "invalid step");
        self.outputs
            .with_output(now, false, false, Some(category), text, Vec::new());
    }

    fn missing_output(&mut self, now: DateTime<Utc>, name: &str) {
        let settled = self.settled(now);
        self.last_step = Some(now);
        if !settled {
            return;
        }
        self.outputs.with_output(
            now,
            false,
            false,
            Some(InvalidCategory::MissingValue),
            format!("no value for {}", name),
            Vec::new(),
        );
    }

    /// Trim input and result buffers to retention limits
    pub fn apply_limits(&mut self, max_count: usize, max_age: Duration, now: DateTime<Utc>) {
        for buffer in self.timed_values.values_mut() {
            buffer.apply_limits(max_count, max_age, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use twin_expr::parse;
    use twin_model::RuleParameterBound;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn bound(field_id: &str, expr: &str, points: &[&str]) -> RuleParameterBound {
        RuleParameterBound {
            name: field_id.to_string(),
            field_id: field_id.to_string(),
            expression: parse(expr).unwrap(),
            cumulative_setting: CumulativeType::Simple,
            point_ids: points.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn actor(parameters: Vec<RuleParameterBound>) -> ActorState {
        let instance = RuleInstance {
            id: "rule1_ahu-1".into(),
            rule_id: "rule1".into(),
            twin_id: "ahu-1".into(),
            template_id: "any-fault".into(),
            parameters_bound: parameters,
            impact_scores_bound: Vec::new(),
            status: InstanceStatus::Valid,
            disabled: false,
        };
        ActorState::new(instance, ActorSettings::starting(at(0)))
    }

    #[test]
    fn boolean_result_surfaces_as_zero_or_one() {
        let mut a = actor(vec![bound("result", "(sensor1 = sensor2)", &["sensor1", "sensor2"])]);
        for i in 0..4 {
            a.observe("sensor1", TimedValue::new(at(i * 10), 5.0));
            a.observe("sensor2", TimedValue::new(at(i * 10), if i % 2 == 0 { 5.0 } else { 6.0 }));
            a.step(at(i * 10));
        }
        let values: Vec<f64> = a.series("result").unwrap().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn nan_division_becomes_invalid_interval() {
        let mut a = actor(vec![bound("result", "a / b", &["a", "b"])]);
        a.observe("a", TimedValue::new(at(0), 0.0));
        a.observe("b", TimedValue::new(at(0), 0.0));
        a.step(at(0));
        a.observe("a", TimedValue::new(at(10), 4.0));
        a.observe("b", TimedValue::new(at(10), 2.0));
        a.step(at(10));

        let rows = a.outputs.points();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].is_valid);
        assert!(rows[0].text.starts_with("Bad value for result=NaN from"));
        assert!(rows[1].is_valid);
        assert_eq!(a.series("result").unwrap().last().unwrap().value, 2.0);
    }

    #[test]
    fn duplicate_reference_doubles_the_reading() {
        let mut a = actor(vec![bound("result", "sensor1 + sensor1", &["sensor1", "sensor1"])]);
        a.observe("sensor1", TimedValue::new(at(0), 7.0));
        a.step(at(0));
        assert_eq!(a.series("result").unwrap().last().unwrap().value, 14.0);
    }

    #[test]
    fn missing_input_yields_missing_category() {
        let mut a = actor(vec![bound("result", "sensor1 + 1", &["sensor1"])]);
        a.step(at(0));
        let row = a.outputs.last().unwrap();
        assert_eq!(row.category, Some(InvalidCategory::MissingValue));
    }

    #[test]
    fn accumulate_retains_running_state() {
        let mut a = actor(vec![RuleParameterBound {
            cumulative_setting: CumulativeType::Accumulate,
            ..bound("total", "sensor1", &["sensor1"])
        }]);
        for i in 0..3 {
            a.observe("sensor1", TimedValue::new(at(i * 10), 2.0));
            a.step(at(i * 10));
        }
        assert_eq!(a.series("total").unwrap().last().unwrap().value, 6.0);
    }

    #[test]
    fn time_weighted_accumulate_integrates_over_elapsed_seconds() {
        let mut a = actor(vec![RuleParameterBound {
            cumulative_setting: CumulativeType::AccumulateTimeSeconds,
            ..bound("energy", "sensor1", &["sensor1"])
        }]);
        // first step has no elapsed time, so it contributes nothing
        a.observe("sensor1", TimedValue::new(at(0), 2.0));
        a.step(at(0));
        assert_eq!(a.series("energy").unwrap().last().unwrap().value, 0.0);

        a.observe("sensor1", TimedValue::new(at(10), 2.0));
        a.step(at(10));
        assert_eq!(a.series("energy").unwrap().last().unwrap().value, 20.0);

        // 20 + 3 * 30
        a.observe("sensor1", TimedValue::new(at(40), 3.0));
        a.step(at(40));
        assert_eq!(a.series("energy").unwrap().last().unwrap().value, 110.0);
    }

    #[test]
    fn time_weighted_accumulate_scales_per_unit() {
        let mut a = actor(vec![RuleParameterBound {
            cumulative_setting: CumulativeType::AccumulateTimeHours,
            ..bound("runtime", "sensor1", &["sensor1"])
        }]);
        a.observe("sensor1", TimedValue::new(at(0), 1.0));
        a.step(at(0));
        a.observe("sensor1", TimedValue::new(at(1800), 1.0));
        a.step(at(1800));
        assert_eq!(a.series("runtime").unwrap().last().unwrap().value, 0.5);
    }

    #[test]
    fn later_parameters_see_earlier_results() {
        let mut a = actor(vec![
            bound("s1", "sensor1 + 1", &["sensor1"]),
            bound("result", "([s1] > 10)", &[]),
        ]);
        a.observe("sensor1", TimedValue::new(at(0), 3.0));
        a.step(at(0));
        a.observe("sensor1", TimedValue::new(at(10), 15.0));
        a.step(at(10));
        let results: Vec<f64> = a.series("result").unwrap().iter().map(|p| p.value).collect();
        assert_eq!(results, vec![0.0, 1.0]);
        assert!(a.outputs.last().unwrap().faulted);
    }

    #[test]
    fn invalid_instance_never_evaluates() {
        let mut a = actor(vec![bound("result", "sensor1", &["sensor1"])]);
        a.rule_instance.status = InstanceStatus::CircularDependency;
        a.observe("sensor1", TimedValue::new(at(0), 1.0));
        a.step(at(0));
        assert!(!a.is_valid());
        assert!(a.outputs.is_empty());
        assert!(a.series("result").is_none());
    }

    #[test]
    fn impact_scores_ride_along_without_failing_the_step() {
        let mut a = actor(vec![bound("result", "(sensor1 > 10)", &["sensor1"])]);
        a.rule_instance.impact_scores_bound = vec![
            bound("cost", "sensor1 * 0.5", &["sensor1"]),
            // unbound leaf, the score is skipped while the step succeeds
            bound("comfort", "nosuch * 2", &[]),
        ];
        a.observe("sensor1", TimedValue::new(at(0), 20.0));
        a.step(at(0));

        assert_eq!(a.series("cost").unwrap().last().unwrap().value, 10.0);
        assert!(a.series("comfort").is_none());
        let row = a.outputs.last().unwrap();
        assert!(row.is_valid);
        assert!(row.variables.iter().any(|(n, v)| n == "cost" && *v == 10.0));
    }

    #[test]
    fn command_log_tracks_trigger_windows() {
        let mut a = actor(vec![bound("result", "(sensor1 > 10)", &["sensor1"])]);
        for (i, v) in [(0, 20.0), (1, 20.0), (2, 5.0)] {
            a.observe("sensor1", TimedValue::new(at(i * 10), v));
            a.step(at(i * 10));
        }
        let cmd = a.output_commands.get("rule1_ahu-1").unwrap();
        assert!(!cmd.triggered);
        assert_eq!(cmd.trigger_start_time, at(0));
        assert_eq!(cmd.trigger_end_time, at(10));
    }
}

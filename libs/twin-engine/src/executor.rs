//! Batch execution across actors
//!
//! Actors share no mutable state, so within one dependency stage they run
//! concurrently on the runtime. Calculated-point actors run first, staged
//! by dependency depth; the series they derive feed later stages and the
//! rule actors that run last. All graph and series lookups inside a pass
//! are reads of immutable snapshots.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use twin_model::{Insight, Rule, TimedValue, TEMPLATE_CALCULATED_POINT};

use crate::actor::{ActorSettings, ActorState};
use crate::binder::Generation;
use crate::config::EngineSettings;

/// Input samples for one pass, keyed by point id
pub type Batch = FxHashMap<String, Vec<TimedValue>>;

type SeriesMap = FxHashMap<String, Arc<Vec<TimedValue>>>;

/// What a pass did, for logging and assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub actors_run: usize,
    pub steps: usize,
    pub skipped_invalid: usize,
}

/// Holds actor state across passes and drives batch evaluation
pub struct RulesEngine {
    settings: EngineSettings,
    actors: DashMap<String, ActorState>,
}

impl RulesEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            actors: DashMap::new(),
        }
    }

    /// Create actors for every instance in the generation. Existing actors
    /// keep their state; activation never resets a running actor.
    pub fn activate(&self, generation: &Generation, rules: &[Rule], started: DateTime<Utc>) {
        for instance in &generation.instances {
            if self.actors.contains_key(&instance.id) {
                continue;
            }
            let rule = rules.iter().find(|r| r.id == instance.rule_id);
            let mut settings = ActorSettings::starting(started);
            settings.settle_interval = self.settings.settle_interval();
            settings.variables_to_keep = instance
                .parameters_bound
                .iter()
                .map(|p| p.field_id.clone())
                .collect();
            if let Some(rule) = rule {
                settings.over_hours = rule.element_value("over-how-many-hours");
                settings.percentage_of_time = rule
                    .element_value("percentage-of-time")
                    .map(|p| if p > 1.0 { p / 100.0 } else { p });
            }
            self.actors
                .insert(instance.id.clone(), ActorState::new(instance.clone(), settings));
        }
        info!(actors = self.actors.len(), "actors activated");
    }

    pub fn actor(
        &self,
        id: &str,
    ) -> Option<dashmap::mapref::one::Ref<'_, String, ActorState>> {
        self.actors.get(id)
    }

    /// Run one batch of samples through every actor, calculated points
    /// before the rules that read them.
    pub async fn execute_rules(
        &self,
        generation: &Generation,
        inputs: Batch,
    ) -> ExecutionSummary {
        let mut series: SeriesMap = inputs
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect();
        let mut summary = ExecutionSummary::default();

        let mut stages: Vec<Vec<String>> = generation.order.stages.clone();
        // cyclic points belong to no stage; visit them so they are counted
        let mut cyclic: Vec<String> = generation.order.cyclic.iter().cloned().collect();
        cyclic.sort_unstable();
        if !cyclic.is_empty() {
            stages.push(cyclic);
        }
        stages.push(
            generation
                .instances
                .iter()
                .filter(|i| i.template_id != TEMPLATE_CALCULATED_POINT)
                .map(|i| i.id.clone())
                .collect(),
        );

        for stage in stages {
            let mut tasks: JoinSet<(ActorState, usize, Option<(String, Vec<TimedValue>)>)> =
                JoinSet::new();
            for id in stage {
                let Some((_, actor)) = self.actors.remove(&id) else {
                    continue;
                };
                if !actor.is_valid() {
                    summary.skipped_invalid += 1;
                    self.actors.insert(id, actor);
                    continue;
                }
                let series = Arc::new(series.clone());
                let max_count = self.settings.max_buffer_count;
                let max_age = self.settings.max_buffer_age();
                tasks.spawn(async move {
                    run_actor_batch(actor, &series, max_count, max_age)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((actor, steps, derived)) => {
                        summary.actors_run += 1;
                        summary.steps += steps;
                        if let Some((point_id, values)) = derived {
                            series.insert(point_id, Arc::new(values));
                        }
                        self.actors.insert(actor.id.clone(), actor);
                    }
                    Err(err) => {
                        error!(%err, "actor task failed");
                    }
                }
            }
        }

        debug!(
            actors = summary.actors_run,
            steps = summary.steps,
            skipped = summary.skipped_invalid,
            "batch executed"
        );
        summary
    }

    /// Derive insight records from every actor's output log
    pub fn insights(&self, rules: &[Rule]) -> Vec<Insight> {
        let mut out = Vec::new();
        for actor in self.actors.iter() {
            let rule = rules.iter().find(|r| r.id == actor.rule_instance.rule_id);
            let description = rule.map(|r| r.description.as_str()).unwrap_or("");
            let recommendations = rule.map(|r| r.recommendations.as_slice()).unwrap_or(&[]);
            out.push(Insight::from_output(
                actor.id.clone(),
                &actor.outputs,
                description,
                recommendations,
            ));
        }
        out.sort_by(|a, b| a.rule_instance_id.cmp(&b.rule_instance_id));
        out
    }
}

/// Feed every sample the actor's points have in this batch, stepping the
/// actor once per distinct timestamp. Returns the derived result series
/// for calculated-point actors.
fn run_actor_batch(
    mut actor: ActorState,
    series: &SeriesMap,
    max_count: usize,
    max_age: chrono::Duration,
) -> (ActorState, usize, Option<(String, Vec<TimedValue>)>) {
    let mut point_ids: Vec<&str> = actor.rule_instance.point_ids().collect();
    point_ids.sort_unstable();
    point_ids.dedup();

    let mut events: Vec<(DateTime<Utc>, String, f64)> = Vec::new();
    for pid in point_ids {
        if let Some(samples) = series.get(pid) {
            for sample in samples.iter() {
                events.push((sample.timestamp, pid.to_string(), sample.value));
            }
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0));

    let mut steps = 0usize;
    let mut last: Option<DateTime<Utc>> = None;
    let mut i = 0;
    while i < events.len() {
        let ts = events[i].0;
        while i < events.len() && events[i].0 == ts {
            let (_, pid, value) = &events[i];
            actor.observe(pid, TimedValue::new(ts, *value));
            i += 1;
        }
        actor.step(ts);
        steps += 1;
        last = Some(ts);
    }

    if let Some(now) = last {
        actor.apply_limits(max_count, max_age, now);
    }

    let derived = if actor.rule_instance.template_id == TEMPLATE_CALCULATED_POINT {
        actor
            .series("result")
            .map(|buf| (actor.rule_instance.twin_id.clone(), buf.iter().copied().collect()))
    } else {
        None
    };

    (actor, steps, derived)
}

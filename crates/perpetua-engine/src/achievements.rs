//! Achievement tracking, completion, and reward replay.
//!
//! Achievements complete when they are eligible (unlock condition) and their
//! tracked value meets the target formula (evaluated at `level = completion
//! count`). `oneShot` achievements complete once; `repeatable` ones re-arm
//! after `resetWindow` steps and scale their reward by the completion index.
//!
//! Rewards are not applied here: completions push into a [`RewardOutbox`]
//! the coordinator drains, which keeps this manager free of references to
//! the store or other managers. Persistent side effects (flags, automations,
//! granted upgrades) are replayed deterministically by
//! [`AchievementTracker::rebuild_derived_rewards`], ordered by
//! `(last_completed_step, definition index)`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use perpetua_core::condition::ConditionEvaluator;
use perpetua_core::formula::{FormulaContext, FormulaVariables};
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::{AchievementReward, AchievementTrack, ProgressMode};

use crate::context::EvalSnapshot;
use crate::coordinator::TickFault;

/// Mutable per-achievement state.
#[derive(Debug, Clone)]
pub struct AchievementState {
    pub completions: u32,
    pub last_completed_step: Option<u64>,
    /// Earliest step a repeatable achievement may complete again.
    pub next_repeatable_at_step: u64,
    pub is_visible: bool,
    /// Last observed track value (for progress UIs).
    pub progress_value: f64,
}

/// A completion recorded during one update.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedAchievement {
    pub id: String,
    pub completion_index: u32,
}

/// Rewards queued by completions, drained by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct RewardOutbox {
    /// `(resource_id, amount)` grants, already reward-scaled.
    pub resource_grants: Vec<(String, f64)>,
    pub upgrade_grants: Vec<String>,
    pub automation_unlocks: Vec<String>,
    pub flag_grants: Vec<(String, bool)>,
    pub events: Vec<String>,
}

impl RewardOutbox {
    pub fn is_empty(&self) -> bool {
        self.resource_grants.is_empty()
            && self.upgrade_grants.is_empty()
            && self.automation_unlocks.is_empty()
            && self.flag_grants.is_empty()
            && self.events.is_empty()
    }
}

/// Persistent side effects replayed from completion history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedRewards {
    pub flags: BTreeMap<String, bool>,
    pub automations: BTreeSet<String>,
    pub granted_upgrades: BTreeSet<String>,
}

/// Owns achievement runtime state.
pub struct AchievementTracker {
    pack: Arc<NormalizedContentPack>,
    states: Vec<AchievementState>,
    evaluator: ConditionEvaluator,
    derived: DerivedRewards,
}

impl AchievementTracker {
    pub fn new(pack: Arc<NormalizedContentPack>, evaluator: ConditionEvaluator) -> Self {
        let states = pack
            .achievements
            .iter()
            .map(|achievement| AchievementState {
                completions: 0,
                last_completed_step: None,
                next_repeatable_at_step: 0,
                is_visible: achievement.visibility_condition.is_none(),
                progress_value: 0.0,
            })
            .collect();
        Self {
            pack,
            states,
            evaluator,
            derived: DerivedRewards::default(),
        }
    }

    pub fn achievement_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, id: &str) -> Option<&AchievementState> {
        self.pack
            .lookup
            .achievements
            .get(id)
            .map(|&i| &self.states[i])
    }

    /// Flag value from completed achievements' derived rewards.
    pub fn get_flag_value(&self, flag_id: &str) -> Option<bool> {
        self.derived.flags.get(flag_id).copied()
    }

    pub fn derived(&self) -> &DerivedRewards {
        &self.derived
    }

    /// Replay persistent rewards from completion history, ordered by
    /// `(last_completed_step, definition index)`.
    pub fn rebuild_derived_rewards(&mut self) {
        let mut completed: Vec<(u64, usize)> = self
            .states
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.last_completed_step.map(|step| (step, i)))
            .collect();
        completed.sort_unstable();

        let mut derived = DerivedRewards::default();
        for (_, i) in completed {
            let achievement = &self.pack.achievements[i];
            match &achievement.reward {
                Some(AchievementReward::GrantFlag { flag_id, value }) => {
                    derived.flags.insert(flag_id.clone(), *value);
                }
                Some(AchievementReward::UnlockAutomation { automation_id }) => {
                    derived.automations.insert(automation_id.clone());
                }
                Some(AchievementReward::GrantUpgrade { upgrade_id }) => {
                    derived.granted_upgrades.insert(upgrade_id.clone());
                }
                _ => {}
            }
        }
        self.derived = derived;
    }

    /// Evaluate every achievement for this step. Completions push their
    /// rewards into `outbox`; returns the completions in definition order.
    pub fn update_for_step(
        &mut self,
        step: u64,
        snapshot: &EvalSnapshot,
        outbox: &mut RewardOutbox,
        faults: &mut Vec<TickFault>,
    ) -> Vec<CompletedAchievement> {
        let mut completed = Vec::new();

        for (i, achievement) in self.pack.achievements.iter().enumerate() {
            let state = &mut self.states[i];

            if !state.is_visible {
                if let Some(condition) = &achievement.visibility_condition {
                    match self.evaluator.evaluate(condition, snapshot) {
                        Ok(true) => state.is_visible = true,
                        Ok(false) => {}
                        Err(error) => {
                            faults.push(TickFault::new("achievements", error.to_string()))
                        }
                    }
                }
            }

            // Completion caps.
            let repeat_policy = achievement.progress.repeatable.as_ref();
            match achievement.progress.mode {
                ProgressMode::OneShot => {
                    if state.completions > 0 {
                        continue;
                    }
                }
                ProgressMode::Repeatable => {
                    if step < state.next_repeatable_at_step {
                        continue;
                    }
                    if let Some(max) = repeat_policy.and_then(|p| p.max_repeats) {
                        if state.completions >= max {
                            continue;
                        }
                    }
                }
            }

            // Eligibility.
            if let Some(condition) = &achievement.unlock_condition {
                match self.evaluator.evaluate(condition, snapshot) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) => {
                        faults.push(TickFault::new("achievements", error.to_string()));
                        continue;
                    }
                }
            }

            // Target check at level = completions.
            let value = track_value_of(&achievement.track, snapshot);
            state.progress_value = value;
            let target = match achievement
                .progress
                .target
                .evaluate(&FormulaContext::at_level(state.completions as f64))
            {
                Ok(target) => target,
                Err(error) => {
                    faults.push(TickFault::new("achievements", error.to_string()));
                    continue;
                }
            };
            if value < target {
                continue;
            }

            // Complete.
            let completion_index = state.completions;
            state.completions += 1;
            state.last_completed_step = Some(step);
            if achievement.progress.mode == ProgressMode::Repeatable {
                let reset_window = repeat_policy.map(|p| p.reset_window).unwrap_or(0);
                state.next_repeatable_at_step = step + reset_window.max(1);
            }

            // Reward scaling over the completion index.
            let scale = match repeat_policy.and_then(|p| p.reward_scaling.as_ref()) {
                Some(formula) => {
                    match formula.evaluate(&FormulaContext::at_level(completion_index as f64)) {
                        Ok(scale) => scale,
                        Err(error) => {
                            faults.push(TickFault::new("achievements", error.to_string()));
                            1.0
                        }
                    }
                }
                None => 1.0,
            };

            if let Some(reward) = &achievement.reward {
                let variables = FormulaVariables {
                    level: completion_index as f64,
                    time: snapshot.time_seconds,
                    delta_time: snapshot.delta_seconds,
                };
                let ctx = FormulaContext::new(variables, snapshot);
                match reward {
                    AchievementReward::GrantResource {
                        resource_id,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => outbox
                            .resource_grants
                            .push((resource_id.clone(), value * scale)),
                        Err(error) => {
                            faults.push(TickFault::new("achievements", error.to_string()))
                        }
                    },
                    AchievementReward::GrantUpgrade { upgrade_id } => {
                        outbox.upgrade_grants.push(upgrade_id.clone());
                    }
                    AchievementReward::UnlockAutomation { automation_id } => {
                        outbox.automation_unlocks.push(automation_id.clone());
                    }
                    AchievementReward::GrantFlag { flag_id, value } => {
                        outbox.flag_grants.push((flag_id.clone(), *value));
                    }
                    AchievementReward::EmitEvent { event_id } => {
                        outbox.events.push(event_id.clone());
                    }
                }
            }
            // Unlock events always fire, reward or not.
            outbox.events.extend(achievement.on_unlock_events.iter().cloned());

            tracing::debug!(
                achievement = achievement.id,
                completion = completion_index + 1,
                "achievement completed"
            );
            completed.push(CompletedAchievement {
                id: achievement.id.clone(),
                completion_index,
            });
        }

        if !completed.is_empty() {
            self.rebuild_derived_rewards();
        }
        completed
    }
}

/// Read an achievement's tracked value from the snapshot.
fn track_value_of(track: &AchievementTrack, snapshot: &EvalSnapshot) -> f64 {
    match track {
        AchievementTrack::Resource { resource_id } => snapshot
            .resource_amounts
            .get(resource_id)
            .copied()
            .unwrap_or(0.0),
        AchievementTrack::GeneratorLevel { generator_id } => snapshot
            .generator_levels
            .get(generator_id)
            .copied()
            .unwrap_or(0) as f64,
        AchievementTrack::GeneratorCount { generator_id } => match generator_id {
            Some(id) => snapshot.generator_levels.get(id).copied().unwrap_or(0) as f64,
            None => snapshot.generator_levels.values().map(|&l| l as f64).sum(),
        },
        AchievementTrack::UpgradeOwned { upgrade_id } => snapshot
            .upgrade_purchases
            .get(upgrade_id)
            .copied()
            .unwrap_or(0) as f64,
        AchievementTrack::Flag { flag_id } => {
            if snapshot.flags.get(flag_id).copied().unwrap_or(false) {
                1.0
            } else {
                0.0
            }
        }
        AchievementTrack::Script { script_id } => {
            let passed = snapshot
                .scripts
                .as_ref()
                .and_then(|s| s.evaluate(script_id))
                .unwrap_or(false);
            if passed {
                1.0
            } else {
                0.0
            }
        }
        AchievementTrack::CustomMetric { metric_id } => {
            snapshot.metric_value(metric_id).unwrap_or(0.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

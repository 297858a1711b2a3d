use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::VecDeque;

/// Cap on remembered goals; damping and repetition checks only ever look at
/// the most recent entries.
pub const HISTORY_CAP: usize = 20;
/// How many recent goals the damping and repetition rules examine.
const RECENCY_WINDOW: usize = 3;

const DEEP_DIVE_CHANCE: f64 = 0.5;
const VETTING_CHANCE: f64 = 0.3;

/// One cycle's chosen action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Goal {
    SelfReflection,
    DeepDive,
    VetPotentialPartner,
    NurtureEngagement,
    ExpandReach,
    BrowseFollowingFeed,
    CuriosityDrivenDiscovery,
    MonitorCoreSubjects,
}

impl Goal {
    pub fn as_str(self) -> &'static str {
        match self {
            Goal::SelfReflection => "self_reflection",
            Goal::DeepDive => "deep_dive",
            Goal::VetPotentialPartner => "vet_potential_partner",
            Goal::NurtureEngagement => "nurture_engagement",
            Goal::ExpandReach => "expand_reach",
            Goal::BrowseFollowingFeed => "browse_following_feed",
            Goal::CuriosityDrivenDiscovery => "curiosity_driven_discovery",
            Goal::MonitorCoreSubjects => "monitor_core_subjects",
        }
    }
}

/// Background goals and their base weights for the final ladder tier.
const BACKGROUND_GOALS: [(Goal, f64); 3] = [
    (Goal::BrowseFollowingFeed, 0.5),
    (Goal::CuriosityDrivenDiscovery, 0.3),
    (Goal::MonitorCoreSubjects, 0.2),
];

/// Store-derived facts the decision ladder consumes. Gathered once per cycle
/// so the ladder itself stays pure and testable.
#[derive(Debug, Clone, Default)]
pub struct StoreSignals {
    pub reflection_overdue: bool,
    pub has_deep_dive_candidate: bool,
    pub has_discovered_partner: bool,
    pub mentions_check_due: bool,
    pub vetting_capped: bool,
    pub last_post_time: Option<DateTime<Utc>>,
}

/// First half of the decision: the tiers that need no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreMentionsDecision {
    Decided(Goal),
    /// No early tier fired; the mentions probe should run before the
    /// remaining tiers are evaluated.
    CheckMentions,
    /// Mentions check not due; skip straight to the later tiers.
    SkipMentions,
}

/// Owns the rolling goal history and the randomness for probability gates.
/// Never shared across threads; the loop drives it single-threaded.
pub struct GoalPlanner {
    history: VecDeque<Goal>,
    rng: StdRng,
    post_cooldown: Duration,
}

impl GoalPlanner {
    pub fn new(rng: StdRng, post_cooldown: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAP),
            rng,
            post_cooldown,
        }
    }

    /// Evaluate the ladder tiers that precede the mentions probe. The probe
    /// itself engages as a side effect, so the caller runs it between the two
    /// decision phases.
    pub fn decide_pre_mentions(&mut self, signals: &StoreSignals) -> PreMentionsDecision {
        if signals.reflection_overdue {
            return PreMentionsDecision::Decided(Goal::SelfReflection);
        }
        if signals.has_deep_dive_candidate && self.rng.gen::<f64>() < DEEP_DIVE_CHANCE {
            return PreMentionsDecision::Decided(Goal::DeepDive);
        }
        if signals.has_discovered_partner
            && !signals.vetting_capped
            && self.rng.gen::<f64>() < VETTING_CHANCE
        {
            return PreMentionsDecision::Decided(Goal::VetPotentialPartner);
        }
        if signals.mentions_check_due {
            PreMentionsDecision::CheckMentions
        } else {
            PreMentionsDecision::SkipMentions
        }
    }

    /// Evaluate the remaining tiers once the mentions probe has (or has not)
    /// consumed the cycle.
    pub fn decide_post_mentions(&mut self, signals: &StoreSignals, mention_engaged: bool) -> Goal {
        if mention_engaged {
            return Goal::NurtureEngagement;
        }

        let cooldown_elapsed = match signals.last_post_time {
            None => true,
            Some(last) => Utc::now() - last > self.post_cooldown,
        };
        if cooldown_elapsed && !self.recent_goals().contains(&Goal::ExpandReach) {
            return Goal::ExpandReach;
        }

        self.weighted_background_choice()
    }

    fn recent_goals(&self) -> Vec<Goal> {
        self.history
            .iter()
            .rev()
            .take(RECENCY_WINDOW)
            .copied()
            .collect()
    }

    /// Weighted choice among background goals, each weight divided by 4 per
    /// occurrence in the recent window.
    fn weighted_background_choice(&mut self) -> Goal {
        let recent = self.recent_goals();
        let weights: Vec<(Goal, f64)> = BACKGROUND_GOALS
            .iter()
            .map(|(goal, base)| {
                let occurrences = recent.iter().filter(|g| *g == goal).count() as u32;
                (*goal, base / 4f64.powi(occurrences as i32))
            })
            .collect();

        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        let mut roll = self.rng.gen::<f64>() * total;
        for (goal, weight) in &weights {
            if roll < *weight {
                return *goal;
            }
            roll -= weight;
        }
        // Float residue lands on the last entry
        BACKGROUND_GOALS[BACKGROUND_GOALS.len() - 1].0
    }

    /// Append an executed goal, dropping the oldest past the cap
    pub fn record(&mut self, goal: Goal) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(goal);
    }

    pub fn history(&self) -> impl Iterator<Item = &Goal> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn planner_with_seed(seed: u64) -> GoalPlanner {
        GoalPlanner::new(StdRng::seed_from_u64(seed), Duration::minutes(240))
    }

    #[test]
    fn overdue_reflection_always_wins() {
        // Every other tier is eligible too; reflection must still win for
        // any random stream.
        let signals = StoreSignals {
            reflection_overdue: true,
            has_deep_dive_candidate: true,
            has_discovered_partner: true,
            mentions_check_due: true,
            vetting_capped: false,
            last_post_time: None,
        };
        for seed in 0..50 {
            let mut planner = planner_with_seed(seed);
            assert_eq!(
                planner.decide_pre_mentions(&signals),
                PreMentionsDecision::Decided(Goal::SelfReflection)
            );
        }
    }

    #[test]
    fn vetting_cap_suppresses_the_vetting_tier() {
        let signals = StoreSignals {
            has_discovered_partner: true,
            vetting_capped: true,
            ..Default::default()
        };
        for seed in 0..50 {
            let mut planner = planner_with_seed(seed);
            assert_ne!(
                planner.decide_pre_mentions(&signals),
                PreMentionsDecision::Decided(Goal::VetPotentialPartner)
            );
        }
    }

    #[test]
    fn engaged_mention_becomes_nurture_engagement() {
        let mut planner = planner_with_seed(7);
        let signals = StoreSignals {
            last_post_time: Some(Utc::now()),
            ..Default::default()
        };
        assert_eq!(
            planner.decide_post_mentions(&signals, true),
            Goal::NurtureEngagement
        );
    }

    #[test]
    fn expand_reach_requires_cooldown_and_novelty() {
        let stale_post = StoreSignals {
            last_post_time: Some(Utc::now() - Duration::hours(10)),
            ..Default::default()
        };

        let mut planner = planner_with_seed(1);
        assert_eq!(
            planner.decide_post_mentions(&stale_post, false),
            Goal::ExpandReach
        );

        // Recent ExpandReach in the window suppresses the tier
        planner.record(Goal::ExpandReach);
        assert_ne!(
            planner.decide_post_mentions(&stale_post, false),
            Goal::ExpandReach
        );

        // A fresh post suppresses it through the cooldown instead
        let fresh_post = StoreSignals {
            last_post_time: Some(Utc::now()),
            ..Default::default()
        };
        let mut rested = planner_with_seed(1);
        assert_ne!(
            rested.decide_post_mentions(&fresh_post, false),
            Goal::ExpandReach
        );
    }

    #[test]
    fn recency_damping_divides_weight_by_four_per_occurrence() {
        // With BrowseFollowingFeed filling the whole recent window its weight
        // drops from 0.5 to 0.5/64; the sampled share over many trials must
        // sit near the damped expectation, far below the base rate.
        let mut planner = planner_with_seed(42);
        let fresh_post = StoreSignals {
            last_post_time: Some(Utc::now()),
            ..Default::default()
        };
        for _ in 0..3 {
            planner.record(Goal::BrowseFollowingFeed);
        }

        let mut counts: HashMap<Goal, u32> = HashMap::new();
        let trials = 20_000;
        for _ in 0..trials {
            let goal = planner.decide_post_mentions(&fresh_post, false);
            *counts.entry(goal).or_insert(0) += 1;
        }

        let damped = 0.5 / 64.0;
        let expected = damped / (damped + 0.3 + 0.2);
        let observed =
            *counts.get(&Goal::BrowseFollowingFeed).unwrap_or(&0) as f64 / trials as f64;
        assert!(
            (observed - expected).abs() < 0.01,
            "observed {} vs expected {}",
            observed,
            expected
        );
        // Undamped goals keep their relative proportions
        let browse = *counts.get(&Goal::CuriosityDrivenDiscovery).unwrap_or(&0) as f64;
        let monitor = *counts.get(&Goal::MonitorCoreSubjects).unwrap_or(&0) as f64;
        assert!((browse / monitor - 1.5).abs() < 0.15);
    }

    #[test]
    fn history_is_bounded() {
        let mut planner = planner_with_seed(3);
        for _ in 0..(HISTORY_CAP + 15) {
            planner.record(Goal::MonitorCoreSubjects);
        }
        assert_eq!(planner.history().count(), HISTORY_CAP);
    }

    #[test]
    fn mentions_tier_only_fires_when_due() {
        let mut planner = planner_with_seed(9);
        let due = StoreSignals {
            mentions_check_due: true,
            ..Default::default()
        };
        assert_eq!(
            planner.decide_pre_mentions(&due),
            PreMentionsDecision::CheckMentions
        );

        let not_due = StoreSignals::default();
        assert_eq!(
            planner.decide_pre_mentions(&not_due),
            PreMentionsDecision::SkipMentions
        );
    }
}

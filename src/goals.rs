use crate::calc::StatisticsMap;
use crate::model::{ExamConfig, StudentRecord, SubjectSchema};
use serde::Serialize;

const PROTECT_MASTERY: f64 = 0.85;
const REPAIR_MASTERY: f64 = 0.6;
const REPAIR_PRESSURE: f64 = 0.5;
const PUSH_PRESSURE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdvisoryLabel {
    ProtectStrength,
    HighLeveragePush,
    FoundationalRepair,
    SteadyGain,
}

impl AdvisoryLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            AdvisoryLabel::ProtectStrength => "protect strength",
            AdvisoryLabel::HighLeveragePush => "high-leverage push",
            AdvisoryLabel::FoundationalRepair => "foundational repair",
            AdvisoryLabel::SteadyGain => "steady gain",
        }
    }

    /// `pressure` is gain/room, `mastery` is current/ceiling.
    pub fn classify(pressure: f64, mastery: f64) -> Self {
        if mastery >= PROTECT_MASTERY {
            AdvisoryLabel::ProtectStrength
        } else if pressure >= REPAIR_PRESSURE && mastery < REPAIR_MASTERY {
            AdvisoryLabel::FoundationalRepair
        } else if pressure >= PUSH_PRESSURE {
            AdvisoryLabel::HighLeveragePush
        } else {
            AdvisoryLabel::SteadyGain
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAllocation {
    pub subject: String,
    pub current: f64,
    pub target: f64,
    pub gain: f64,
    pub room: f64,
    pub ceiling: f64,
    pub weight: f64,
    pub advisory_label: AdvisoryLabel,
    pub advisory_text: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPlan {
    pub student_id: String,
    pub current_total: f64,
    pub target_total: f64,
    pub deficit: f64,
    pub allocated: f64,
    /// Deficit not covered because shares were clamped to room and never redistributed.
    pub unallocated: f64,
    pub goal_met: bool,
    pub subjects: Vec<SubjectAllocation>,
}

/// Splits the gap to `target_total` across subjects by `room × difficulty`.
///
/// A share larger than a subject's room is clamped to the room and the excess
/// is dropped, so the plan can fall short of the target.
pub fn allocate_target(
    student: &StudentRecord,
    target_total: f64,
    schema: &SubjectSchema,
    config: &ExamConfig,
    stats: &StatisticsMap,
) -> AllocationPlan {
    let current_total = student.total_score.unwrap_or(0.0);
    let mut plan = AllocationPlan {
        student_id: student.id.clone(),
        current_total,
        target_total,
        deficit: 0.0,
        allocated: 0.0,
        unallocated: 0.0,
        goal_met: true,
        subjects: Vec::new(),
    };
    if target_total <= current_total {
        return plan;
    }
    let deficit = target_total - current_total;
    plan.deficit = deficit;
    plan.goal_met = false;

    struct Candidate<'a> {
        subject: &'a str,
        current: f64,
        ceiling: f64,
        room: f64,
        weight: f64,
    }
    let candidates: Vec<Candidate<'_>> = schema
        .iter()
        .filter_map(|s| {
            let current = student.score(s)?;
            let group = stats.get(s)?;
            let cfg = config.subject(s)?;
            let ceiling = cfg.full_score.min(group.max);
            let room = (ceiling - current).max(0.0);
            let difficulty = if cfg.full_score > 0.0 {
                group.average / cfg.full_score
            } else {
                0.0
            };
            Some(Candidate {
                subject: s,
                current,
                ceiling,
                room,
                weight: room * difficulty,
            })
        })
        .collect();

    let weight_sum: f64 = candidates.iter().map(|c| c.weight).sum();
    plan.subjects = candidates
        .into_iter()
        .map(|c| {
            let share = if weight_sum > 0.0 {
                deficit * c.weight / weight_sum
            } else {
                0.0
            };
            let gain = share.min(c.room).max(0.0);
            let pressure = if c.room > 0.0 { gain / c.room } else { 0.0 };
            let mastery = if c.ceiling > 0.0 { c.current / c.ceiling } else { 1.0 };
            let label = AdvisoryLabel::classify(pressure, mastery);
            SubjectAllocation {
                subject: c.subject.to_string(),
                current: c.current,
                target: c.current + gain,
                gain,
                room: c.room,
                ceiling: c.ceiling,
                weight: c.weight,
                advisory_label: label,
                advisory_text: label.as_str(),
            }
        })
        .collect();
    plan.allocated = plan.subjects.iter().map(|s| s.gain).sum();
    plan.unallocated = (deficit - plan.allocated).max(0.0);
    plan
}

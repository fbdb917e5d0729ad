use crate::utils::memory_monitor::MemorySnapshot;

/// Memory situation the degradation decision is made against.
#[derive(Debug, Clone, Copy)]
pub struct Pressure {
    pub used_mb: f64,
    pub ceiling_mb: f64,
    pub headroom_mb: f64,
}

impl Pressure {
    pub fn from_snapshot(snapshot: &MemorySnapshot, ceiling_mb: f64, headroom_mb: f64) -> Self {
        Self {
            used_mb: snapshot.used_mb,
            ceiling_mb,
            headroom_mb,
        }
    }

    pub fn is_near_ceiling(&self) -> bool {
        self.used_mb >= self.ceiling_mb - self.headroom_mb
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DegradationPolicy {
    pub question_cost_mb: f64,
    pub max_context_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradationPlan {
    /// Number of leading questions to keep.
    pub keep: usize,
    pub context_chars: usize,
    pub degraded: bool,
}

/// Decides how much of a batch of `question_count` questions to run.
///
/// Without pressure the batch and context are untouched. Near the ceiling,
/// questions are dropped from the tail until the projected usage
/// (`used + keep * question_cost`) fits under the ceiling, never below one,
/// and the context budget is halved.
pub fn degrade(question_count: usize, pressure: Pressure, policy: &DegradationPolicy) -> DegradationPlan {
    if question_count == 0 || !pressure.is_near_ceiling() {
        return DegradationPlan {
            keep: question_count,
            context_chars: policy.max_context_chars,
            degraded: false,
        };
    }

    let available = (pressure.ceiling_mb - pressure.used_mb).max(0.0);
    let affordable = if policy.question_cost_mb > 0.0 {
        (available / policy.question_cost_mb).floor() as usize
    } else {
        question_count
    };

    DegradationPlan {
        keep: affordable.clamp(1, question_count),
        context_chars: policy.max_context_chars / 2,
        degraded: true,
    }
}

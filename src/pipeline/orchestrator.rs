use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::pipeline::degrade::{degrade, DegradationPolicy, Pressure};
use crate::utils::answer_service::{AnswerService, ServiceError};
use crate::utils::content_guard::cut_context;
use crate::utils::memory_monitor::MemoryMonitor;

/// Prefix of the sentinel string placed in a slot whose question failed.
pub const FAILED_ANSWER_PREFIX: &str = "Error processing this question:";

/// Outcome for a single question, positionally matched to it.
#[derive(Debug)]
pub enum AnswerSlot {
    Answered(String),
    Failed(ServiceError),
}

impl AnswerSlot {
    pub fn is_failed(&self) -> bool {
        matches!(self, AnswerSlot::Failed(_))
    }

    pub fn into_text(self) -> String {
        match self {
            AnswerSlot::Answered(text) => text,
            AnswerSlot::Failed(err) => format!("{} {}", FAILED_ANSWER_PREFIX, err),
        }
    }
}

/// Answers for the leading `answers.len()` questions of a submitted batch.
#[derive(Debug)]
pub struct AnswerSet {
    pub answers: Vec<AnswerSlot>,
    pub submitted: usize,
    /// Set when memory pressure reduced the batch or its context.
    pub resource_ceiling_reached: bool,
}

impl AnswerSet {
    pub fn failed_count(&self) -> usize {
        self.answers.iter().filter(|slot| slot.is_failed()).count()
    }

    pub fn dropped_count(&self) -> usize {
        self.submitted - self.answers.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub headroom_mb: f64,
    pub llm_timeout: Duration,
    pub policy: DegradationPolicy,
}

/// Runs a question batch against the answer service one question at a time.
pub struct AnswerOrchestrator<'a> {
    service: &'a dyn AnswerService,
    monitor: &'a dyn MemoryMonitor,
    settings: OrchestratorSettings,
}

impl<'a> AnswerOrchestrator<'a> {
    pub fn new(
        service: &'a dyn AnswerService,
        monitor: &'a dyn MemoryMonitor,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            service,
            monitor,
            settings,
        }
    }

    fn pressure(&self) -> Pressure {
        let snapshot = self.monitor.snapshot();
        Pressure::from_snapshot(&snapshot, self.monitor.ceiling_mb(), self.settings.headroom_mb)
    }

    pub async fn answer(&self, document_text: &str, questions: &[String]) -> AnswerSet {
        let started = Instant::now();
        let submitted = questions.len();

        let plan = degrade(submitted, self.pressure(), &self.settings.policy);
        let mut ceiling_reached = plan.degraded;
        let mut retained = plan.keep;
        if plan.degraded {
            warn!(
                target: "orchestrator",
                submitted,
                retained,
                context_chars = plan.context_chars,
                "Memory near ceiling; degrading question batch"
            );
        }

        let mut context_chars = plan.context_chars;
        let mut context = cut_context(document_text, context_chars);
        let mut answers = Vec::with_capacity(retained);

        for (i, question) in questions.iter().enumerate() {
            if i >= retained {
                break;
            }
            // The first call is covered by the planning reading above.
            if i > 0 {
                let pressure = self.pressure();
                if pressure.is_near_ceiling() {
                    let remaining = degrade(retained - i, pressure, &self.settings.policy);
                    retained = i + remaining.keep;
                    ceiling_reached = true;
                    if remaining.context_chars < context_chars {
                        context_chars = remaining.context_chars;
                        context = cut_context(document_text, context_chars);
                    }
                    warn!(
                        target: "orchestrator",
                        question = i + 1,
                        used_mb = pressure.used_mb,
                        retained,
                        context_chars,
                        "Memory near ceiling mid-batch; dropping trailing questions"
                    );
                }
            }

            info!(target: "orchestrator", "Processing question {}/{}", i + 1, retained);
            let slot = match tokio::time::timeout(
                self.settings.llm_timeout,
                self.service.answer(question, &context),
            )
            .await
            {
                Ok(Ok(text)) => AnswerSlot::Answered(text),
                Ok(Err(err)) => {
                    warn!(target: "orchestrator", question = i + 1, "Answer service failed: {}", err);
                    AnswerSlot::Failed(err)
                }
                Err(_) => {
                    warn!(target: "orchestrator", question = i + 1, timeout = ?self.settings.llm_timeout, "Answer service timed out");
                    AnswerSlot::Failed(ServiceError::Timeout(self.settings.llm_timeout))
                }
            };
            answers.push(slot);
        }

        // Reclaim checkpoint: the context copy is the largest buffer this stage owns.
        drop(context);
        let after = self.monitor.snapshot();
        let set = AnswerSet {
            answers,
            submitted,
            resource_ceiling_reached: ceiling_reached,
        };
        info!(
            target: "orchestrator",
            answered = set.answers.len(),
            failed = set.failed_count(),
            dropped = set.dropped_count(),
            used_mb = after.used_mb,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Question batch finished"
        );
        set
    }
}

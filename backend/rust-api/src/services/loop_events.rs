//! Observability boundary of the learning-loop engine.
//!
//! The engine reports what happened as discrete `LoopEvent`s; what gets
//! logged or counted is up to the sink it was given.

use std::sync::Mutex;

use crate::metrics::{
    GENERATION_FAILURES_TOTAL, LEARNING_LOOP_EVENTS_TOTAL, PRACTICE_QUESTIONS_GENERATED_TOTAL,
    PRACTICE_SUBMISSIONS_TOTAL,
};
use crate::models::Accuracy;
use crate::services::question_generator::GenerationErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    LoopStarted {
        loop_id: String,
        student_id: String,
        test_id: String,
        reset: bool,
        tombstoned: u64,
    },
    RoundGenerated {
        loop_id: String,
        source_mistakes: usize,
        expected: usize,
        generated: usize,
    },
    GenerationFailed {
        loop_id: String,
        source_id: String,
        kind: GenerationErrorKind,
        message: String,
    },
    SubmissionGraded {
        loop_id: String,
        attempt_number: u32,
        correct: u32,
        wrong: u32,
        accuracy: Accuracy,
        mastered: bool,
    },
    MasteryAchieved {
        loop_id: String,
        attempt_number: u32,
        accuracy: Accuracy,
    },
    LoopEnded {
        loop_id: String,
    },
}

impl LoopEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::LoopStarted { reset: false, .. } => "loop_started",
            LoopEvent::LoopStarted { reset: true, .. } => "loop_reset",
            LoopEvent::RoundGenerated { .. } => "round_generated",
            LoopEvent::GenerationFailed { .. } => "generation_failed",
            LoopEvent::SubmissionGraded { .. } => "submission_graded",
            LoopEvent::MasteryAchieved { .. } => "mastery_achieved",
            LoopEvent::LoopEnded { .. } => "loop_ended",
        }
    }
}

pub trait LoopEventSink: Send + Sync {
    fn emit(&self, event: LoopEvent);
}

/// Default sink: structured `tracing` records plus prometheus counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl LoopEventSink for TracingEventSink {
    fn emit(&self, event: LoopEvent) {
        LEARNING_LOOP_EVENTS_TOTAL
            .with_label_values(&[event.name()])
            .inc();

        match &event {
            LoopEvent::LoopStarted {
                loop_id,
                student_id,
                test_id,
                reset,
                tombstoned,
            } => {
                tracing::info!(
                    loop_id = %loop_id,
                    student_id = %student_id,
                    test_id = %test_id,
                    reset,
                    tombstoned,
                    "Learning loop armed"
                );
            }
            LoopEvent::RoundGenerated {
                loop_id,
                source_mistakes,
                expected,
                generated,
            } => {
                PRACTICE_QUESTIONS_GENERATED_TOTAL.inc_by(*generated as u64);
                if generated < expected {
                    tracing::warn!(
                        loop_id = %loop_id,
                        source_mistakes,
                        expected,
                        generated,
                        "Practice round generated with shortfall"
                    );
                } else {
                    tracing::info!(
                        loop_id = %loop_id,
                        source_mistakes,
                        generated,
                        "Practice round generated"
                    );
                }
            }
            LoopEvent::GenerationFailed {
                loop_id,
                source_id,
                kind,
                message,
            } => {
                GENERATION_FAILURES_TOTAL
                    .with_label_values(&[kind.as_str()])
                    .inc();
                tracing::warn!(
                    loop_id = %loop_id,
                    source_id = %source_id,
                    kind = %kind,
                    "Skipping source mistake: {}",
                    message
                );
            }
            LoopEvent::SubmissionGraded {
                loop_id,
                attempt_number,
                correct,
                wrong,
                accuracy,
                mastered,
            } => {
                PRACTICE_SUBMISSIONS_TOTAL
                    .with_label_values(&[if *mastered { "true" } else { "false" }])
                    .inc();
                tracing::info!(
                    loop_id = %loop_id,
                    attempt_number,
                    correct,
                    wrong,
                    accuracy = %accuracy,
                    "Practice round graded"
                );
            }
            LoopEvent::MasteryAchieved {
                loop_id,
                attempt_number,
                accuracy,
            } => {
                tracing::info!(
                    loop_id = %loop_id,
                    attempt_number,
                    accuracy = %accuracy,
                    "Mastery achieved"
                );
            }
            LoopEvent::LoopEnded { loop_id } => {
                tracing::info!(loop_id = %loop_id, "Learning loop ended");
            }
        }
    }
}

/// Keeps every event in memory. Used by tests to assert on what the engine reported.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LoopEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoopEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(LoopEvent::name).collect()
    }
}

impl LoopEventSink for RecordingEventSink {
    fn emit(&self, event: LoopEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

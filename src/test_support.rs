use std::sync::Mutex;
use std::time::Duration;

use crate::error::CollaboratorError;
use crate::generation::Generator;
use crate::model::{Chunk, Page};
use crate::retry::RetryPolicy;
use crate::semantic::{Embedder, LocalHashEmbedder, SemanticModelConfig};

pub const HANDBOOK_OBJECTIVE: &str = "The objective of this handbook is to support guidance staff. It describes the guidance process, the roles of tutor teachers and student counsellors, and the services available to students during their studies.";
pub const HANDBOOK_STUDY_PLAN: &str = "Each student prepares a personal study plan together with a tutor teacher during the first semester. The plan is reviewed annually and updated whenever the student changes their study path or schedule.";
pub const CAMPUS_PARKING: &str = "Parking permits for the campus garage are issued by the facilities office. Permits are valid for one academic year and must be displayed on the dashboard of the vehicle at all times.";

/// Four paragraphs that together stay just under the default chunk bound.
pub const HANDBOOK_PAGE_THREE: &str = "The objective of this handbook is to support guidance staff. It describes the guidance process, the roles of tutor teachers and student counsellors, and the services available to students during their studies.\n\n\
     Guidance is a continuous process that begins when a student is admitted and continues until graduation. Every student has a named tutor teacher who meets them at least twice per semester.\n\n\
     Student counsellors help with questions about study skills, motivation and wellbeing. They also coordinate with the study psychologist and the health services when a student needs more support.\n\n\
     The handbook is updated every academic year by the guidance team. Comments and suggestions can be sent to the head of student services.";
pub const CAMPUS_GUIDE_PAGE_TWO: &str = "Parking permits for the campus garage are issued by the facilities office. Permits are valid for one academic year and must be displayed on the dashboard of the vehicle at all times.\n\n\
     Bicycle racks are located next to the main entrance and behind the library building. Lost keys and other found items can be collected from the reception desk on weekdays between nine and four.";

pub fn page(doc_id: &str, page_number: u32, text: &str) -> Page {
    Page {
        doc_id: doc_id.to_string(),
        title: "Student Guidance Handbook".to_string(),
        page_number,
        source: format!("{doc_id}.pdf"),
        text: text.to_string(),
        char_count: text.chars().count(),
    }
}

pub fn chunk(doc_id: &str, page_number: u32, char_start: usize, text: &str) -> Chunk {
    let char_count = text.chars().count();
    Chunk {
        chunk_id: Chunk::chunk_id_for(doc_id, page_number, char_start),
        doc_id: doc_id.to_string(),
        title: format!("{doc_id} title"),
        page_number,
        char_start,
        char_end: char_start + char_count,
        text: text.to_string(),
        char_count,
        oversized: false,
    }
}

/// Plain prose well above the triviality threshold.
pub fn prose(topic: &str, seed: usize) -> String {
    format!(
        "Section {seed} describes how {topic} is organised for students and staff. \
         It explains the responsibilities of each role and the services that are \
         available during the academic year."
    )
}

pub fn instant_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

/// Local embedder that fails on any text containing `needle`.
pub struct FailingEmbedder {
    pub inner: LocalHashEmbedder,
    pub needle: &'static str,
    pub error: CollaboratorError,
}

impl FailingEmbedder {
    pub fn on(needle: &'static str) -> Self {
        Self {
            inner: LocalHashEmbedder::default(),
            needle,
            error: CollaboratorError::Fatal("embedding rejected".to_string()),
        }
    }
}

impl Embedder for FailingEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        self.inner.model()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        if text.contains(self.needle) {
            return Err(self.error.clone());
        }
        self.inner.embed(text)
    }
}

/// Returns canned replies and records every prompt it was given.
pub struct FixedGenerator {
    replies: Mutex<Vec<Result<String, CollaboratorError>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FixedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self::with_replies(vec![Ok(reply.to_string())])
    }

    /// Replies are consumed in order; the last one repeats.
    pub fn with_replies(replies: Vec<Result<String, CollaboratorError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|prompts| prompts.len()).unwrap_or(0)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .ok()
            .and_then(|prompts| prompts.last().cloned())
    }
}

impl Generator for FixedGenerator {
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| CollaboratorError::Fatal("poisoned".to_string()))?;
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies
                .first()
                .cloned()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }
}

//! The message pipeline: budget the transcript, assemble context, call the
//! model, parse, and route the outcome to a reply, an inline webhook, or a
//! background job.
//!
//! Per-session mutexes keep at most one message in flight per conversation;
//! concurrent sessions never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use merchat_core::config::AppConfig;
use merchat_core::{
    ActionOutcome, BackgroundJob, CompanyId, ConversationContext, ConversationMeta,
    ConversationTurn, Intent, JobId, MappingError, ParseError, ResponseParser, SessionId,
    TokenBudgeter, UserId, WebhookMapper, WebhookPayload,
};

use crate::collaborators::{ConversationStore, ModelProvider, UpstreamError, WebhookSink};
use crate::context::ContextAssembler;
use crate::jobs::{JobError, JobManager};
use crate::prompt::build_system_prompt;

pub const ORDER_EXTRACTION_JOB: &str = "order.extraction";

const MODEL_UNAVAILABLE_REPLY: &str =
    "I could not process your message right now. Please try again in a moment.";
const REPHRASE_REPLY: &str =
    "Sorry, I did not quite get that. Could you rephrase your request?";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Job(#[from] JobError),
}

impl AgentError {
    /// Bounded, user-safe text; internal detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Upstream(_) => MODEL_UNAVAILABLE_REPLY,
            Self::Parse(_) => REPHRASE_REPLY,
            Self::Mapping(_) => {
                "I could not register that request. Please review the details and try again."
            }
            Self::Job(_) => {
                "I could not start processing that request. Please try again in a moment."
            }
        }
    }
}

/// Everything one handled message produced.
#[derive(Clone, Debug)]
pub struct MessageOutcome {
    pub reply: String,
    pub intent: Option<Intent>,
    pub action: Option<WebhookPayload>,
    pub job: Option<BackgroundJob>,
}

impl MessageOutcome {
    fn reply_only(reply: impl Into<String>, intent: Option<Intent>) -> Self {
        Self { reply: reply.into(), intent, action: None, job: None }
    }
}

pub struct Orchestrator {
    conversations: Arc<dyn ConversationStore>,
    model: Arc<dyn ModelProvider>,
    assembler: ContextAssembler,
    sink: Arc<dyn WebhookSink>,
    jobs: Arc<JobManager>,
    budgeter: TokenBudgeter,
    parser: ResponseParser,
    mapper: WebhookMapper,
    config: AppConfig,
    session_locks: SessionLocks,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        conversations: Arc<dyn ConversationStore>,
        model: Arc<dyn ModelProvider>,
        assembler: ContextAssembler,
        sink: Arc<dyn WebhookSink>,
        jobs: Arc<JobManager>,
    ) -> Self {
        let budgeter = TokenBudgeter::from_config(&config.budget);
        Self {
            conversations,
            model,
            assembler,
            sink,
            jobs,
            budgeter,
            parser: ResponseParser::new(),
            mapper: WebhookMapper::new(),
            config,
            session_locks: SessionLocks::default(),
        }
    }

    pub async fn handle_message(
        &self,
        company_id: CompanyId,
        session_id: SessionId,
        user_id: UserId,
        message: &str,
    ) -> Result<MessageOutcome, AgentError> {
        let session_lock = self.session_locks.acquire(&session_id);
        let _in_flight = session_lock.lock().await;

        info!(
            event_name = "message.received",
            session_id = %session_id.0,
            company_id = %company_id.0,
            user_id = %user_id.0,
            "handling customer message"
        );

        let history = self.conversations.history(&session_id).await?;
        let context = ConversationContext {
            company_id,
            session_id,
            history,
            new_turn: ConversationTurn::user(message),
        };

        let budgeted = self.budgeter.budget(
            &context.history,
            context.new_turn.clone(),
            self.config.budget.max_tokens,
            self.config.budget.reserved_tokens,
        );

        let assembled =
            self.assembler.assemble(&context.company_id, &context.new_turn.content).await;
        let prompt = build_system_prompt(&assembled);

        let raw = match self.call_model(&prompt, &budgeted).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "model.unavailable",
                    session_id = %context.session_id.0,
                    error = %error,
                    "model call failed after retry; answering with fallback"
                );
                return Ok(MessageOutcome::reply_only(MODEL_UNAVAILABLE_REPLY, None));
            }
        };

        let parsed = match self.parser.parse(&raw) {
            Ok(parsed) => parsed,
            Err(error) => {
                error!(
                    event_name = "parse.failed",
                    session_id = %context.session_id.0,
                    error = %error,
                    raw_output = %raw,
                    "model output did not parse; asking the customer to rephrase"
                );
                return Ok(MessageOutcome::reply_only(REPHRASE_REPLY, None));
            }
        };

        // Only a parseable exchange becomes part of the transcript.
        self.append_turns(
            &context.session_id,
            &[context.new_turn.clone(), ConversationTurn::assistant(&parsed.final_answer)],
        )
        .await;

        let outcome = match parsed.action {
            ActionOutcome::None | ActionOutcome::Incomplete { .. } => {
                MessageOutcome::reply_only(parsed.final_answer, Some(parsed.intent))
            }
            ActionOutcome::Ready(data) => {
                let meta = ConversationMeta {
                    conversation_id: context.session_id.0.clone(),
                    company_id: context.company_id.0.clone(),
                    channel: self.config.webhook.channel.clone(),
                };
                let payload = self.mapper.map(&data, &meta)?;

                if data.intent() == Intent::PlaceOrder {
                    let job = self.start_order_job(&user_id, payload.clone()).await;
                    MessageOutcome {
                        reply: parsed.final_answer,
                        intent: Some(parsed.intent),
                        action: Some(payload),
                        job: Some(job),
                    }
                } else {
                    self.sink.dispatch(&payload).await?;
                    MessageOutcome {
                        reply: parsed.final_answer,
                        intent: Some(parsed.intent),
                        action: Some(payload),
                        job: None,
                    }
                }
            }
        };

        info!(
            event_name = "message.answered",
            session_id = %context.session_id.0,
            intent = outcome.intent.map(|intent| intent.as_str()).unwrap_or("NONE"),
            dispatched = outcome.action.is_some(),
            job_started = outcome.job.is_some(),
            "message handled"
        );
        Ok(outcome)
    }

    pub async fn poll_job(&self, job_id: &JobId) -> Result<BackgroundJob, AgentError> {
        Ok(self.jobs.poll(job_id).await?)
    }

    async fn call_model(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, UpstreamError> {
        let attempts = 1 + self.config.llm.max_retries;
        let mut last_error = UpstreamError::Timeout { source_name: "model" };

        for attempt in 1..=attempts {
            let call = timeout(
                Duration::from_secs(self.config.llm.timeout_secs),
                self.model.generate(prompt, history),
            );
            match call.await {
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(error)) => last_error = error,
                Err(_) => last_error = UpstreamError::Timeout { source_name: "model" },
            }
            if attempt < attempts {
                warn!(
                    event_name = "model.retry",
                    attempt,
                    error = %last_error,
                    "model call failed; retrying immediately"
                );
            }
        }
        Err(last_error)
    }

    /// Transcript writes are best-effort: the customer already has an answer
    /// by the time the store misbehaves.
    async fn append_turns(&self, session_id: &SessionId, turns: &[ConversationTurn]) {
        if let Err(error) = self.conversations.append(session_id, turns).await {
            warn!(
                event_name = "conversation.append_failed",
                session_id = %session_id.0,
                error = %error,
                "could not persist transcript turns"
            );
        }
    }

    /// Order creation runs as a background job: the reply goes out at once
    /// and the dispatch result lands on the polled job record.
    async fn start_order_job(&self, owner: &UserId, payload: WebhookPayload) -> BackgroundJob {
        let job = self.jobs.create(ORDER_EXTRACTION_JOB, &owner.0).await;
        let manager = Arc::clone(&self.jobs);
        let sink = Arc::clone(&self.sink);
        let job_id = job.job_id.clone();

        tokio::spawn(async move {
            let run = manager
                .run(&job_id, move |progress| async move {
                    progress.set(25).await?;
                    sink.dispatch(&payload).await?;
                    progress.set(90).await?;
                    Ok(json!({ "event": payload.event, "dispatched": true }))
                })
                .await;
            if let Err(error) = run {
                error!(
                    event_name = "jobs.run_failed",
                    job_id = %job_id,
                    error = %error,
                    "background job could not be driven to completion"
                );
            }
        });

        job
    }

}

/// One guard per session, bounding messages to one in flight each. The map
/// must not grow with every session ever seen, so entries nobody holds
/// anymore are pruned on the next acquisition.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn acquire(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // An entry only the map still references belongs to a finished request.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(session_id.clone()).or_default())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

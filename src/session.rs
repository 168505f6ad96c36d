//! Session orchestration: the chat turn flow, session finalize, the
//! feedback/reconciliation cycle, and the asynchronous portrait
//! regeneration that merges back through the same single-writer path.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::gateway::LlmGateway;
use crate::language::Language;
use crate::models::{ActionTask, ChatMessage, TaskStatus, TaskUsefulness};
use crate::portrait::UserPortrait;
use crate::quota::DailyQuota;
use crate::reconcile::{reconcile, SessionFeedback, SessionHighlights};
use crate::store::PortraitStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session in progress (user dismissed without saving).
    Idle,
    /// Accepting messages.
    Active,
    /// Waiting for the finalize call; input disabled.
    Finalizing,
    /// Summary and task sheet shown, waiting for user feedback.
    AwaitingFeedback,
    /// Feedback merged; a new session can start.
    Reconciled,
}

/// What `confirm_summary` hands back besides the mutated controller state.
pub struct ConfirmOutcome {
    pub highlights: SessionHighlights,
    /// Tasks resolved this cycle; not stored, the caller may keep its own
    /// history.
    pub resolved: Vec<ActionTask>,
    /// The secondary regeneration task. Completion (success or failure)
    /// never affects the already-committed synchronous result.
    pub regeneration: JoinHandle<()>,
}

fn welcome_message(language: Language) -> &'static str {
    match language {
        Language::Ukrainian => "Привіт! Як ти почуваєшся?",
        Language::English => "Hi! How are you feeling?",
    }
}

fn quota_message(language: Language) -> &'static str {
    match language {
        Language::Ukrainian => "Денний ліміт повідомлень вичерпано. Спробуй завтра.",
        Language::English => "Daily message limit reached. Please try again tomorrow.",
    }
}

fn request_error_message(language: Language) -> &'static str {
    match language {
        Language::Ukrainian => "Вибач, сталася помилка запиту до моделі.",
        Language::English => "Sorry, the request to the model failed.",
    }
}

fn finalize_error_message(language: Language) -> &'static str {
    match language {
        Language::Ukrainian => "Не вдалось згенерувати підсумок цього разу.",
        Language::English => "Couldn't generate a summary this time.",
    }
}

/// Drives one journaling session at a time.
///
/// Dependencies are injected, never ambient. The portrait lives behind a
/// mutex shared with the regeneration task; every read-modify-write goes
/// through that lock. `&mut self` on the async methods already rules out
/// overlapping sends from one controller.
pub struct SessionController {
    gateway: Arc<dyn LlmGateway>,
    store: Arc<dyn PortraitStore>,
    quota: DailyQuota,
    app_language: Language,
    portrait: Arc<Mutex<UserPortrait>>,
    state: SessionState,
    messages: Vec<ChatMessage>,
    session_summary: String,
    suggested_tasks: Vec<ActionTask>,
    last_highlights: SessionHighlights,
}

impl SessionController {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        store: Arc<dyn PortraitStore>,
        config: &AppConfig,
    ) -> Self {
        let portrait = store.load_portrait();
        let suggested_tasks = store.load_pending_tasks();
        let quota = DailyQuota::new(Arc::clone(&store), config.daily_call_limit);
        let mut controller = Self {
            gateway,
            store,
            quota,
            app_language: Language::from_tag(&config.app_language),
            portrait: Arc::new(Mutex::new(portrait)),
            state: SessionState::Idle,
            messages: Vec::new(),
            session_summary: String::new(),
            suggested_tasks,
            last_highlights: SessionHighlights::default(),
        };
        controller.start_new_session();
        controller
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn session_summary(&self) -> &str {
        &self.session_summary
    }

    pub fn suggested_tasks(&self) -> &[ActionTask] {
        &self.suggested_tasks
    }

    pub fn last_highlights(&self) -> &SessionHighlights {
        &self.last_highlights
    }

    pub fn portrait(&self) -> UserPortrait {
        self.lock_portrait().clone()
    }

    fn lock_portrait(&self) -> std::sync::MutexGuard<'_, UserPortrait> {
        self.portrait
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start_new_session(&mut self) {
        self.messages.clear();
        self.session_summary.clear();
        self.messages
            .push(ChatMessage::assistant(welcome_message(self.app_language)));
        self.state = SessionState::Active;
    }

    /// One chat turn. Quota refusals and gateway failures surface as
    /// assistant messages; persisted state is never touched on error.
    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if self.state != SessionState::Active {
            anyhow::bail!("session is not accepting messages (state {:?})", self.state);
        }

        if !self.quota.can_consume(1) {
            self.messages
                .push(ChatMessage::assistant(quota_message(self.app_language)));
            return Ok(());
        }

        self.messages.push(ChatMessage::user(text));
        let portrait = self.portrait();

        match self
            .gateway
            .send_message(text, &self.messages, &portrait)
            .await
        {
            Ok(reply) => {
                self.messages.push(reply);
                self.quota.consume(1);
            }
            Err(error) => {
                tracing::warn!("Chat turn failed: {}", error);
                self.messages.push(ChatMessage::assistant(
                    request_error_message(self.app_language),
                ));
            }
        }
        Ok(())
    }

    /// Finalize the session: ask the model for a summary and suggested
    /// tasks, then wait for feedback. On failure the sheet still opens
    /// with a fallback text and no tasks; stored pending tasks are left
    /// untouched.
    pub async fn end_session(&mut self) -> Result<()> {
        if self.state != SessionState::Active {
            anyhow::bail!("no active session to finalize (state {:?})", self.state);
        }
        self.state = SessionState::Finalizing;
        let portrait = self.portrait();

        match self
            .gateway
            .finalize_session(&self.messages, &portrait)
            .await
        {
            Ok(outcome) => {
                self.session_summary = outcome.summary;
                self.suggested_tasks = outcome.tasks;
            }
            Err(error) => {
                tracing::warn!("Session finalize failed: {}", error);
                self.session_summary = finalize_error_message(self.app_language).to_string();
                self.suggested_tasks = Vec::new();
            }
        }
        self.state = SessionState::AwaitingFeedback;
        Ok(())
    }

    /// The user confirmed (and possibly edited) the summary and rated the
    /// tasks. Runs the synchronous reconciliation, persists, then fires
    /// the regeneration task whose result is merged back later.
    pub fn confirm_summary(&mut self, mut feedback: SessionFeedback) -> Result<ConfirmOutcome> {
        if self.state != SessionState::AwaitingFeedback {
            anyhow::bail!("no summary awaiting confirmation (state {:?})", self.state);
        }
        feedback.language = self.app_language;

        let pending_before = self.store.load_pending_tasks();
        let result = {
            // Single lock scope covers read, merge, and write.
            let mut portrait = self.lock_portrait();
            let result = reconcile(&portrait, pending_before, &feedback, &self.session_summary);
            *portrait = result.portrait.clone();
            result
        };

        self.store.save_portrait(&result.portrait)?;
        self.store.save_pending_tasks(&result.pending)?;
        self.last_highlights = result.highlights.clone();
        self.suggested_tasks.clear();
        self.state = SessionState::Reconciled;

        let regeneration = self.spawn_regeneration(feedback);

        Ok(ConfirmOutcome {
            highlights: result.highlights,
            resolved: result.resolved,
            regeneration,
        })
    }

    /// Best-effort secondary pass: ask the model to re-derive the portrait
    /// from the transcript and merge its answer in as another delta.
    /// Failures are logged and swallowed.
    fn spawn_regeneration(&self, feedback: SessionFeedback) -> JoinHandle<()> {
        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let portrait_cell = Arc::clone(&self.portrait);
        let transcript = self.messages.clone();

        tokio::spawn(async move {
            let snapshot = portrait_cell
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            let last_summary = snapshot.summary.clone();

            let delta = match gateway
                .regenerate_portrait(
                    &transcript,
                    &snapshot,
                    &last_summary,
                    &feedback.flags,
                    &feedback.task_feedback,
                )
                .await
            {
                Ok(delta) => delta,
                Err(error) => {
                    tracing::warn!("Portrait regeneration failed, keeping portrait: {}", error);
                    return;
                }
            };

            // Merge against whatever the current state is by now; the
            // merge is additive and bounded, so last-writer-wins is safe.
            let updated = {
                let mut portrait = portrait_cell
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                portrait.merge(&delta);
                portrait.clone()
            };
            if let Err(error) = store.save_portrait(&updated) {
                tracing::warn!("Failed to persist regenerated portrait: {}", error);
            }
        })
    }

    /// Dismiss the summary sheet without saving. No merge happens, but the
    /// suggestions shown this session are discarded.
    pub fn dismiss_summary(&mut self) {
        if self.state != SessionState::AwaitingFeedback {
            return;
        }
        self.suggested_tasks.clear();
        self.session_summary.clear();
        self.state = SessionState::Idle;
    }

    /// Wipe the portrait and start over.
    pub fn clear_portrait(&mut self) -> Result<()> {
        self.store.clear_portrait()?;
        *self.lock_portrait() = UserPortrait::empty();
        self.start_new_session();
        Ok(())
    }

    // Pending-task helpers used by the task list surface.

    pub fn add_manual_task(&self, title: &str, details: Option<String>) -> Result<ActionTask> {
        let mut task = ActionTask::new(title, details);
        task.status = TaskStatus::Pending;
        let mut tasks = self.store.load_pending_tasks();
        tasks.push(task.clone());
        self.store.save_pending_tasks(&tasks)?;
        Ok(task)
    }

    pub fn update_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        usefulness: TaskUsefulness,
    ) -> Result<()> {
        let mut tasks = self.store.load_pending_tasks();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
            task.status = status;
            task.usefulness = usefulness;
        }
        let open: Vec<ActionTask> = tasks.into_iter().filter(|t| t.status.is_open()).collect();
        self.store.save_pending_tasks(&open)?;
        Ok(())
    }

    pub fn delete_task(&self, id: Uuid) -> Result<()> {
        let tasks: Vec<ActionTask> = self
            .store
            .load_pending_tasks()
            .into_iter()
            .filter(|t| t.id != id)
            .collect();
        self.store.save_pending_tasks(&tasks)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;
    use crate::outcome::SessionOutcome;
    use crate::portrait::PortraitDelta;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Gateway with scripted behaviour for controller tests.
    #[derive(Default)]
    struct ScriptedGateway {
        fail_chat: AtomicBool,
        fail_finalize: AtomicBool,
        fail_regenerate: AtomicBool,
        chat_calls: AtomicUsize,
        regenerate_calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn send_message(
            &self,
            text: &str,
            _history: &[ChatMessage],
            _portrait: &UserPortrait,
        ) -> Result<ChatMessage> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_chat.load(Ordering::SeqCst) {
                anyhow::bail!("scripted chat failure");
            }
            Ok(ChatMessage::assistant(format!("echo: {text}")))
        }

        async fn finalize_session(
            &self,
            _history: &[ChatMessage],
            _portrait: &UserPortrait,
        ) -> Result<SessionOutcome> {
            if self.fail_finalize.load(Ordering::SeqCst) {
                anyhow::bail!("scripted finalize failure");
            }
            Ok(SessionOutcome {
                summary: "You sounded calmer today.".to_string(),
                tasks: vec![ActionTask::new("Breathing exercise", None)],
            })
        }

        async fn regenerate_portrait(
            &self,
            _history: &[ChatMessage],
            _old_portrait: &UserPortrait,
            _last_summary: &str,
            _flags: &[String],
            _task_feedback: &[ActionTask],
        ) -> Result<PortraitDelta> {
            self.regenerate_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_regenerate.load(Ordering::SeqCst) {
                anyhow::bail!("scripted regeneration failure");
            }
            Ok(PortraitDelta {
                summary: None,
                new_strategies: vec!["Коротка прогулянка".to_string()],
                weight_updates: HashMap::from([("walking".to_string(), 0.9)]),
                focus_areas: vec!["sleep".to_string()],
            })
        }

        fn stream_chat(&self, _history: &[ChatMessage], _fast_mode: bool) -> crate::gateway::ChatStream {
            unimplemented!("not exercised by controller tests")
        }
    }

    fn controller_with(
        gateway: Arc<ScriptedGateway>,
        limit: u32,
    ) -> SessionController {
        let store = Arc::new(SqliteStore::in_memory().expect("store"));
        let config = AppConfig {
            daily_call_limit: limit,
            app_language: "en".to_string(),
            ..Default::default()
        };
        SessionController::new(gateway, store, &config)
    }

    async fn bring_to_feedback(controller: &mut SessionController) {
        controller.send_message("rough day").await.expect("send");
        controller.end_session().await.expect("finalize");
        assert_eq!(controller.state(), SessionState::AwaitingFeedback);
    }

    #[tokio::test]
    async fn chat_turn_appends_user_and_assistant_messages() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = controller_with(Arc::clone(&gateway), 10);

        controller.send_message("hello").await.expect("send");

        let messages = controller.messages();
        // welcome + user + reply
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[2].text, "echo: hello");
    }

    #[tokio::test]
    async fn exhausted_quota_blocks_the_gateway_call() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = controller_with(Arc::clone(&gateway), 1);

        controller.send_message("one").await.expect("send");
        controller.send_message("two").await.expect("send");

        assert_eq!(gateway.chat_calls.load(Ordering::SeqCst), 1);
        let last = controller.messages().last().expect("message");
        assert!(last.text.contains("Daily message limit"));
    }

    #[tokio::test]
    async fn chat_failure_surfaces_fallback_and_keeps_session_active() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.fail_chat.store(true, Ordering::SeqCst);
        let mut controller = controller_with(Arc::clone(&gateway), 10);

        controller.send_message("hello").await.expect("send");

        assert_eq!(controller.state(), SessionState::Active);
        let last = controller.messages().last().expect("message");
        assert!(last.text.contains("request to the model failed"));
    }

    #[tokio::test]
    async fn finalize_failure_opens_sheet_with_fallback_summary() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.fail_finalize.store(true, Ordering::SeqCst);
        let mut controller = controller_with(Arc::clone(&gateway), 10);

        controller.send_message("rough day").await.expect("send");
        controller.end_session().await.expect("finalize");

        assert_eq!(controller.state(), SessionState::AwaitingFeedback);
        assert!(controller.session_summary().contains("Couldn't generate"));
        assert!(controller.suggested_tasks().is_empty());
    }

    #[tokio::test]
    async fn confirm_merges_persists_and_regenerates() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = controller_with(Arc::clone(&gateway), 10);
        bring_to_feedback(&mut controller).await;

        let mut rated = controller.suggested_tasks()[0].clone();
        rated.status = TaskStatus::Done;
        rated.usefulness = TaskUsefulness::High;

        let outcome = controller
            .confirm_summary(SessionFeedback {
                task_feedback: vec![rated],
                thumbs_up: Some(true),
                ..Default::default()
            })
            .expect("confirm");

        assert_eq!(controller.state(), SessionState::Reconciled);
        assert!(outcome.highlights.summary_updated);
        assert_eq!(outcome.resolved.len(), 1);

        // Synchronous result is committed before regeneration lands.
        let portrait = controller.portrait();
        assert_eq!(portrait.task_stats.completed, 1);
        assert_eq!(portrait.task_stats.usefulness_high, 1);
        assert!(portrait.summary.contains("calmer"));

        outcome.regeneration.await.expect("regeneration task");
        let portrait = controller.portrait();
        assert!(portrait
            .helpful_strategies
            .contains(&"Коротка прогулянка".to_string()));
        assert_eq!(portrait.focus_areas, vec!["sleep".to_string()]);
        assert_eq!(gateway.regenerate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn regeneration_failure_is_swallowed() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.fail_regenerate.store(true, Ordering::SeqCst);
        let mut controller = controller_with(Arc::clone(&gateway), 10);
        bring_to_feedback(&mut controller).await;

        let outcome = controller
            .confirm_summary(SessionFeedback::default())
            .expect("confirm");
        let synchronous = controller.portrait();

        outcome.regeneration.await.expect("regeneration task");

        // Nothing changed beyond the committed synchronous merge.
        let after = controller.portrait();
        assert_eq!(after.summary, synchronous.summary);
        assert_eq!(after.helpful_strategies, synchronous.helpful_strategies);
    }

    #[tokio::test]
    async fn dismiss_discards_suggestions_without_merging() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = controller_with(Arc::clone(&gateway), 10);
        bring_to_feedback(&mut controller).await;

        let before = controller.portrait();
        controller.dismiss_summary();

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.suggested_tasks().is_empty());
        let after = controller.portrait();
        assert_eq!(after.summary, before.summary);
        assert_eq!(after.task_stats, before.task_stats);
    }

    #[tokio::test]
    async fn clear_portrait_resets_everything() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = controller_with(Arc::clone(&gateway), 10);
        bring_to_feedback(&mut controller).await;
        let outcome = controller
            .confirm_summary(SessionFeedback::default())
            .expect("confirm");
        outcome.regeneration.await.expect("regeneration task");

        controller.clear_portrait().expect("clear");

        let portrait = controller.portrait();
        assert!(portrait.summary.is_empty());
        assert!(portrait.helpful_strategies.is_empty());
        assert_eq!(controller.state(), SessionState::Active);
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn manual_task_management_round_trips() {
        let gateway = Arc::new(ScriptedGateway::default());
        let controller = controller_with(Arc::clone(&gateway), 10);

        let task = controller
            .add_manual_task("Evening walk", Some("15 minutes".to_string()))
            .expect("add");
        controller
            .update_task(task.id, TaskStatus::Done, TaskUsefulness::Medium)
            .expect("update");

        // Done tasks leave the pending list.
        let other = controller.add_manual_task("Journaling", None).expect("add");
        controller.delete_task(other.id).expect("delete");
        // both are gone now: one resolved, one deleted
        let gateway_store_view = controller.store.load_pending_tasks();
        assert!(gateway_store_view.is_empty());
    }
}

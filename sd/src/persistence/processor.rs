//! RequestProcessor - actor that owns the writable Store
//!
//! Every request from every agent goes through one bounded channel and is
//! applied in dequeue order by a single task. That task is the only holder
//! of the database write handle, and keeps the in-memory [`StoryQueue`] in
//! step with every story write it commits.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use storystore::{
    AgentContext, AgentPlan, AgentRequest, AgentResponse, ArchitectState, CoderState, PmState, RequestSelector,
    SessionStatus, Spec, StatusUpdate, Store, StoreResult, Story, StoryDependency, StoryFilter, StoryStatus,
};

use super::messages::{Operation, PersistenceError, PersistenceResult, Reply, Request};
use crate::queue::StoryQueue;

/// Owns the Store for one session and applies requests in FIFO order
pub struct RequestProcessor {
    store: Store,
    session_id: String,
    queue: StoryQueue,
    rx: mpsc::Receiver<Request>,
}

impl RequestProcessor {
    /// Spawn the processor task
    ///
    /// The join handle yields the Store back once the processor stops,
    /// either on `EndSession`/`Shutdown` or when every handle is dropped.
    pub fn spawn(
        store: Store,
        session_id: impl Into<String>,
        queue: StoryQueue,
        channel_capacity: usize,
        query_timeout: Duration,
    ) -> (PersistenceHandle, JoinHandle<Store>) {
        let session_id = session_id.into();
        debug!(%session_id, channel_capacity, "RequestProcessor::spawn: called");
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));

        let processor = Self {
            store,
            session_id: session_id.clone(),
            queue,
            rx,
        };
        let join = tokio::spawn(processor.run());

        info!(%session_id, "RequestProcessor spawned");
        (
            PersistenceHandle {
                tx,
                session_id,
                query_timeout,
            },
            join,
        )
    }

    async fn run(mut self) -> Store {
        debug!(session_id = %self.session_id, "RequestProcessor started");

        while let Some(request) = self.rx.recv().await {
            if !self.handle(request) {
                break;
            }
        }

        debug!(session_id = %self.session_id, "RequestProcessor stopped");
        self.store
    }

    /// Apply one request; false stops the loop
    fn handle(&mut self, request: Request) -> bool {
        let operation = request.operation();
        debug!(%operation, "RequestProcessor: request");
        let session_id = self.session_id.as_str();
        let store = &mut self.store;
        let queue = &mut self.queue;

        match request {
            Request::UpsertSpec { spec, reply } => {
                finish_write(operation, reply, store.upsert_spec(session_id, &spec));
            }
            Request::MarkSpecProcessed { spec_id, reply } => {
                finish_write(operation, reply, store.mark_spec_processed(session_id, &spec_id));
            }
            Request::UpsertStory { story, reply } => {
                let result = store.upsert_story(session_id, &story);
                if result.is_ok() {
                    sync_queue(store, queue, session_id, [story.id.as_str()]);
                }
                finish_write(operation, reply, result);
            }
            Request::UpdateStoryStatus { update, reply } => {
                let result = store.update_story_status(session_id, &update);
                if result.is_ok() {
                    sync_queue(store, queue, session_id, [update.story_id.as_str()]);
                }
                finish_write(operation, reply, result);
            }
            Request::AddStoryDependency { dependency, reply } => {
                let result = store.add_story_dependency(session_id, &dependency);
                if result.is_ok() {
                    sync_queue(store, queue, session_id, [dependency.story_id.as_str()]);
                    queue.warn_on_cycles();
                }
                finish_write(operation, reply, result);
            }
            Request::RemoveStoryDependency { dependency, reply } => {
                let result = store.remove_story_dependency(session_id, &dependency);
                if result.is_ok() {
                    sync_queue(store, queue, session_id, [dependency.story_id.as_str()]);
                }
                finish_write(operation, reply, result);
            }
            Request::BatchUpsertStoriesWithDependencies {
                stories,
                dependencies,
                reply,
            } => {
                let result = store.batch_upsert_stories_with_dependencies(session_id, &stories, &dependencies);
                if result.is_ok() {
                    sync_queue(store, queue, session_id, stories.iter().map(|s| s.id.as_str()));
                    queue.warn_on_cycles();
                }
                finish_write(operation, reply, result);
            }
            Request::UpsertAgentRequest { request, reply } => {
                finish_write(operation, reply, store.upsert_agent_request(session_id, &request));
            }
            Request::UpsertAgentResponse { response, reply } => {
                finish_write(operation, reply, store.upsert_agent_response(session_id, &response));
            }
            Request::UpsertAgentPlan { plan, reply } => {
                finish_write(operation, reply, store.upsert_agent_plan(session_id, &plan));
            }
            Request::UpsertCoderState { state, reply } => {
                finish_write(operation, reply, store.upsert_coder_state(session_id, &state));
            }
            Request::UpsertArchitectState { state, reply } => {
                finish_write(operation, reply, store.upsert_architect_state(session_id, &state));
            }
            Request::UpsertPmState { state, reply } => {
                finish_write(operation, reply, store.upsert_pm_state(session_id, &state));
            }
            Request::UpsertAgentContext { context, reply } => {
                finish_write(operation, reply, store.upsert_agent_context(session_id, &context));
            }

            Request::QueryPendingStories { reply } => {
                answer(operation, reply, || store.query_pending_stories(session_id));
            }
            Request::QueryReadyStories { reply } => {
                answer(operation, reply, || Ok(queue.ready().into_iter().cloned().collect()));
            }
            Request::QueryStories { filter, reply } => {
                answer(operation, reply, || store.query_stories(session_id, &filter));
            }
            Request::QueryStory { story_id, reply } => {
                answer(operation, reply, || store.get_story(session_id, &story_id));
            }
            Request::QueryIncompleteStories { reply } => {
                answer(operation, reply, || store.get_incomplete_stories_for_session(session_id));
            }
            Request::QueryStoryDependencies { story_id, reply } => {
                answer(operation, reply, || store.get_story_dependencies(session_id, &story_id));
            }
            Request::QueryStatusCounts { reply } => {
                answer(operation, reply, || store.story_status_counts(session_id));
            }
            Request::QueryCoderState { agent_id, reply } => {
                answer(operation, reply, || store.get_coder_state(session_id, &agent_id));
            }
            Request::QueryArchitectState { reply } => {
                answer(operation, reply, || store.get_architect_state(session_id));
            }
            Request::QueryPmState { reply } => {
                answer(operation, reply, || store.get_pm_state(session_id));
            }
            Request::QueryAgentContext {
                agent_id,
                context_type,
                reply,
            } => {
                answer(operation, reply, || {
                    store.get_agent_context(session_id, &agent_id, &context_type)
                });
            }
            Request::QueryAgentRequest { request_id, reply } => {
                answer(operation, reply, || store.get_agent_request(session_id, &request_id));
            }
            Request::QueryAgentRequests { selector, reply } => {
                answer(operation, reply, || store.list_agent_requests(session_id, &selector));
            }
            Request::QueryUnansweredRequests { reply } => {
                answer(operation, reply, || store.get_unanswered_agent_requests(session_id));
            }
            Request::QueryResponsesForRequest { request_id, reply } => {
                answer(operation, reply, || store.get_responses_for_request(session_id, &request_id));
            }
            Request::QueryAgentPlans { story_id, reply } => {
                answer(operation, reply, || store.get_agent_plans_for_story(session_id, &story_id));
            }

            Request::EndSession { status, reply } => {
                info!(%session_id, %status, "Ending session");
                finish_write(operation, reply, store.set_session_status(session_id, status));
                return false;
            }
            Request::Shutdown => {
                info!(%session_id, "RequestProcessor shutting down");
                return false;
            }
        }
        true
    }
}

/// Mirror committed story rows into the scheduling queue
fn sync_queue<'a>(
    store: &Store,
    queue: &mut StoryQueue,
    session_id: &str,
    story_ids: impl IntoIterator<Item = &'a str>,
) {
    for story_id in story_ids {
        match store.get_story(session_id, story_id) {
            Ok(story) => queue.insert(story),
            Err(e) => warn!(%story_id, error = %e, "Failed to refresh queued story"),
        }
    }
}

/// Deliver a write result, or log it when nobody asked
fn finish_write<T>(operation: Operation, reply: Option<Reply<T>>, result: StoreResult<T>) {
    match reply {
        Some(reply) => {
            let _ = reply.send(result.map_err(PersistenceError::from));
        }
        None => {
            if let Err(e) = result {
                error!(%operation, error = %e, "Fire-and-forget write failed");
            }
        }
    }
}

/// Run a query unless its caller has already gone away
fn answer<T>(operation: Operation, reply: Reply<T>, query: impl FnOnce() -> StoreResult<T>) {
    if reply.is_closed() {
        debug!(%operation, "Skipping query; caller no longer waiting");
        return;
    }
    let _ = reply.send(query().map_err(PersistenceError::from));
}

/// Handle for submitting requests to the RequestProcessor
///
/// Cheap to clone; every agent gets its own copy.
#[derive(Clone, Debug)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<Request>,
    session_id: String,
    query_timeout: Duration,
}

impl PersistenceHandle {
    /// Session this handle writes into
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Enqueue a request; waits only while the channel is full
    pub async fn submit(&self, request: Request) -> PersistenceResult<()> {
        self.tx.send(request).await.map_err(|_| PersistenceError::ChannelClosed)
    }

    /// Send a request built around a fresh reply channel and wait for the
    /// answer, bounded by the query timeout
    ///
    /// On timeout (or if this future is dropped) the receiver goes away and
    /// the processor skips the request if it has not started it yet.
    pub async fn call<T>(&self, operation: Operation, build: impl FnOnce(Reply<T>) -> Request) -> PersistenceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let round_trip = async {
            self.submit(build(reply_tx)).await?;
            reply_rx.await.map_err(|_| PersistenceError::ChannelClosed)?
        };
        tokio::time::timeout(self.query_timeout, round_trip)
            .await
            .map_err(|_| PersistenceError::Timeout { operation })?
    }

    // === Fire-and-forget writes ===

    pub async fn upsert_spec(&self, spec: Spec) -> PersistenceResult<()> {
        debug!(spec_id = %spec.id, "upsert_spec: called");
        self.submit(Request::UpsertSpec { spec, reply: None }).await
    }

    pub async fn mark_spec_processed(&self, spec_id: &str) -> PersistenceResult<()> {
        debug!(%spec_id, "mark_spec_processed: called");
        self.submit(Request::MarkSpecProcessed {
            spec_id: spec_id.to_string(),
            reply: None,
        })
        .await
    }

    pub async fn upsert_story(&self, story: Story) -> PersistenceResult<()> {
        debug!(story_id = %story.id, "upsert_story: called");
        self.submit(Request::UpsertStory { story, reply: None }).await
    }

    pub async fn update_story_status(&self, update: StatusUpdate) -> PersistenceResult<()> {
        debug!(story_id = %update.story_id, status = %update.status, "update_story_status: called");
        self.submit(Request::UpdateStoryStatus { update, reply: None }).await
    }

    pub async fn add_story_dependency(&self, dependency: StoryDependency) -> PersistenceResult<()> {
        debug!(story_id = %dependency.story_id, depends_on = %dependency.depends_on, "add_story_dependency: called");
        self.submit(Request::AddStoryDependency {
            dependency,
            reply: None,
        })
        .await
    }

    pub async fn remove_story_dependency(&self, dependency: StoryDependency) -> PersistenceResult<()> {
        debug!(story_id = %dependency.story_id, depends_on = %dependency.depends_on, "remove_story_dependency: called");
        self.submit(Request::RemoveStoryDependency {
            dependency,
            reply: None,
        })
        .await
    }

    pub async fn upsert_agent_request(&self, request: AgentRequest) -> PersistenceResult<()> {
        debug!(id = %request.id, "upsert_agent_request: called");
        self.submit(Request::UpsertAgentRequest { request, reply: None }).await
    }

    pub async fn upsert_agent_response(&self, response: AgentResponse) -> PersistenceResult<()> {
        debug!(id = %response.id, "upsert_agent_response: called");
        self.submit(Request::UpsertAgentResponse { response, reply: None })
            .await
    }

    pub async fn upsert_agent_plan(&self, plan: AgentPlan) -> PersistenceResult<()> {
        debug!(id = %plan.id, "upsert_agent_plan: called");
        self.submit(Request::UpsertAgentPlan { plan, reply: None }).await
    }

    pub async fn checkpoint_coder(&self, state: CoderState) -> PersistenceResult<()> {
        debug!(agent_id = %state.agent_id, "checkpoint_coder: called");
        self.submit(Request::UpsertCoderState { state, reply: None }).await
    }

    pub async fn checkpoint_architect(&self, state: ArchitectState) -> PersistenceResult<()> {
        debug!("checkpoint_architect: called");
        self.submit(Request::UpsertArchitectState { state, reply: None })
            .await
    }

    pub async fn checkpoint_pm(&self, state: PmState) -> PersistenceResult<()> {
        debug!("checkpoint_pm: called");
        self.submit(Request::UpsertPmState { state, reply: None }).await
    }

    pub async fn save_agent_context(&self, context: AgentContext) -> PersistenceResult<()> {
        debug!(agent_id = %context.agent_id, context_type = %context.context_type, "save_agent_context: called");
        self.submit(Request::UpsertAgentContext { context, reply: None })
            .await
    }

    // === Acknowledged writes ===

    /// Write a planned story graph atomically and wait for the outcome
    pub async fn batch_upsert_stories_with_dependencies(
        &self,
        stories: Vec<Story>,
        dependencies: Vec<StoryDependency>,
    ) -> PersistenceResult<()> {
        debug!(
            stories = stories.len(),
            dependencies = dependencies.len(),
            "batch_upsert_stories_with_dependencies: called"
        );
        self.call(Operation::BatchUpsertStoriesWithDependencies, |reply| {
            Request::BatchUpsertStoriesWithDependencies {
                stories,
                dependencies,
                reply: Some(reply),
            }
        })
        .await
    }

    /// Status update that reports failure (e.g. unknown story)
    pub async fn update_story_status_acked(&self, update: StatusUpdate) -> PersistenceResult<()> {
        debug!(story_id = %update.story_id, status = %update.status, "update_story_status_acked: called");
        self.call(Operation::UpdateStoryStatus, |reply| Request::UpdateStoryStatus {
            update,
            reply: Some(reply),
        })
        .await
    }

    // === Queries ===

    pub async fn query_pending_stories(&self) -> PersistenceResult<Vec<Story>> {
        debug!("query_pending_stories: called");
        self.call(Operation::QueryPendingStories, |reply| Request::QueryPendingStories { reply })
            .await
    }

    /// Ready stories as the in-memory queue sees them
    ///
    /// Same set and order as [`Self::query_pending_stories`], served
    /// without a database round trip.
    pub async fn ready_stories(&self) -> PersistenceResult<Vec<Story>> {
        debug!("ready_stories: called");
        self.call(Operation::QueryReadyStories, |reply| Request::QueryReadyStories { reply })
            .await
    }

    pub async fn query_stories(&self, filter: StoryFilter) -> PersistenceResult<Vec<Story>> {
        debug!(?filter, "query_stories: called");
        self.call(Operation::QueryStories, |reply| Request::QueryStories { filter, reply })
            .await
    }

    pub async fn get_story(&self, story_id: &str) -> PersistenceResult<Story> {
        debug!(%story_id, "get_story: called");
        self.call(Operation::QueryStory, |reply| Request::QueryStory {
            story_id: story_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_incomplete_stories(&self) -> PersistenceResult<Vec<Story>> {
        debug!("get_incomplete_stories: called");
        self.call(Operation::QueryIncompleteStories, |reply| Request::QueryIncompleteStories {
            reply,
        })
        .await
    }

    pub async fn get_story_dependencies(&self, story_id: &str) -> PersistenceResult<Vec<String>> {
        debug!(%story_id, "get_story_dependencies: called");
        self.call(Operation::QueryStoryDependencies, |reply| Request::QueryStoryDependencies {
            story_id: story_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn story_status_counts(&self) -> PersistenceResult<Vec<(StoryStatus, usize)>> {
        debug!("story_status_counts: called");
        self.call(Operation::QueryStatusCounts, |reply| Request::QueryStatusCounts { reply })
            .await
    }

    pub async fn get_coder_state(&self, agent_id: &str) -> PersistenceResult<Option<CoderState>> {
        debug!(%agent_id, "get_coder_state: called");
        self.call(Operation::QueryCoderState, |reply| Request::QueryCoderState {
            agent_id: agent_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_architect_state(&self) -> PersistenceResult<Option<ArchitectState>> {
        debug!("get_architect_state: called");
        self.call(Operation::QueryArchitectState, |reply| Request::QueryArchitectState { reply })
            .await
    }

    pub async fn get_pm_state(&self) -> PersistenceResult<Option<PmState>> {
        debug!("get_pm_state: called");
        self.call(Operation::QueryPmState, |reply| Request::QueryPmState { reply })
            .await
    }

    pub async fn get_agent_context(&self, agent_id: &str, context_type: &str) -> PersistenceResult<Option<AgentContext>> {
        debug!(%agent_id, %context_type, "get_agent_context: called");
        self.call(Operation::QueryAgentContext, |reply| Request::QueryAgentContext {
            agent_id: agent_id.to_string(),
            context_type: context_type.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_agent_request(&self, request_id: &str) -> PersistenceResult<AgentRequest> {
        debug!(%request_id, "get_agent_request: called");
        self.call(Operation::QueryAgentRequest, |reply| Request::QueryAgentRequest {
            request_id: request_id.to_string(),
            reply,
        })
        .await
    }

    /// Requests by correlation id, story or recipient, oldest first
    pub async fn list_agent_requests(&self, selector: RequestSelector) -> PersistenceResult<Vec<AgentRequest>> {
        debug!(?selector, "list_agent_requests: called");
        self.call(Operation::QueryAgentRequests, |reply| Request::QueryAgentRequests { selector, reply })
            .await
    }

    pub async fn get_unanswered_requests(&self) -> PersistenceResult<Vec<AgentRequest>> {
        debug!("get_unanswered_requests: called");
        self.call(Operation::QueryUnansweredRequests, |reply| Request::QueryUnansweredRequests {
            reply,
        })
        .await
    }

    pub async fn get_responses_for_request(&self, request_id: &str) -> PersistenceResult<Vec<AgentResponse>> {
        debug!(%request_id, "get_responses_for_request: called");
        self.call(Operation::QueryResponsesForRequest, |reply| Request::QueryResponsesForRequest {
            request_id: request_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_agent_plans(&self, story_id: &str) -> PersistenceResult<Vec<AgentPlan>> {
        debug!(%story_id, "get_agent_plans: called");
        self.call(Operation::QueryAgentPlans, |reply| Request::QueryAgentPlans {
            story_id: story_id.to_string(),
            reply,
        })
        .await
    }

    // === Lifecycle ===

    /// Record the final session status and stop the processor
    ///
    /// Requests queued before this one are applied first.
    pub async fn end_session(&self, status: SessionStatus) -> PersistenceResult<()> {
        debug!(%status, "end_session: called");
        self.call(Operation::EndSession, |reply| Request::EndSession {
            status,
            reply: Some(reply),
        })
        .await
    }

    /// Graceful stop: `completed` when no story is outstanding, else `shutdown`
    pub async fn finish(&self) -> PersistenceResult<SessionStatus> {
        debug!("finish: called");
        let outstanding = self
            .story_status_counts()
            .await?
            .into_iter()
            .any(|(status, count)| count > 0 && !status.is_terminal());
        let status = if outstanding {
            SessionStatus::Shutdown
        } else {
            SessionStatus::Completed
        };
        self.end_session(status).await?;
        Ok(status)
    }

    /// Stop the processor without changing the session row
    pub async fn shutdown(&self) -> PersistenceResult<()> {
        debug!("shutdown: called");
        self.submit(Request::Shutdown).await
    }
}

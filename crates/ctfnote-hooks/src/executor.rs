use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ctfnote_core::{CtfId, ProfileId, TaskId};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::pipeline::{HookEvent, Mutation, MutationHook};

#[derive(Debug, Default)]
struct EffectCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EffectStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub pending: u64,
}

/// The row a mutation's effects touch. Effects on the same row run in
/// commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EffectKey {
    Task(TaskId),
    Ctf(CtfId),
    Invitation(CtfId, ProfileId),
}

impl EffectKey {
    fn for_event(event: &HookEvent) -> Option<Self> {
        match &event.mutation {
            Mutation::CreateTask(_) => event.committed_task().map(|task| Self::Task(task.id)),
            Mutation::UpdateTask { id, .. } | Mutation::DeleteTask { id } => Some(Self::Task(*id)),
            Mutation::StartWorkingOn { task_id } | Mutation::StopWorkingOn { task_id } => {
                Some(Self::Task(*task_id))
            }
            Mutation::UpdateCtf { id, .. } => Some(Self::Ctf(*id)),
            Mutation::CreateInvitation(invitation) | Mutation::DeleteInvitation(invitation) => Some(
                Self::Invitation(invitation.ctf_id, invitation.profile_id),
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Inflight {
    tasks: JoinSet<()>,
    /// Completion signal of the latest effect task per row.
    chains: HashMap<EffectKey, watch::Receiver<bool>>,
}

/// Best-effort runner for hook side effects.
///
/// PostCommit hooks of one mutation run in order inside a single spawned
/// task. A task whose row already has effects in flight first waits for
/// them; nothing queues in front of the spawn, so there is no backpressure.
/// Failures are logged and counted, never returned.
#[derive(Debug, Default)]
pub struct EffectExecutor {
    inflight: Mutex<Inflight>,
    counters: Arc<EffectCounters>,
}

impl EffectExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits a hook in the caller's task.
    pub async fn run_inline(&self, hook: &dyn MutationHook, event: &HookEvent) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        run_effect(&self.counters, hook, event).await;
    }

    pub async fn submit(&self, event: Arc<HookEvent>, hooks: Vec<Arc<dyn MutationHook>>) {
        self.counters
            .submitted
            .fetch_add(hooks.len() as u64, Ordering::Relaxed);
        let counters = self.counters.clone();
        let mut inflight = self.inflight.lock().await;
        while let Some(joined) = inflight.tasks.try_join_next() {
            log_join_failure(joined);
        }
        // a closed sender means that run is over as well
        inflight
            .chains
            .retain(|_, done| !*done.borrow() && done.has_changed().is_ok());

        let (finished, previous) = match EffectKey::for_event(&event) {
            Some(key) => {
                let (finished, done) = watch::channel(false);
                (Some(finished), inflight.chains.insert(key, done))
            }
            None => (None, None),
        };
        inflight.tasks.spawn(async move {
            if let Some(mut previous) = previous {
                let _ = previous.wait_for(|done| *done).await;
            }
            for hook in hooks {
                run_effect(&counters, hook.as_ref(), &event).await;
            }
            if let Some(finished) = finished {
                let _ = finished.send(true);
            }
        });
    }

    /// Waits for every submitted effect to finish.
    pub async fn settle(&self) {
        let mut inflight = self.inflight.lock().await;
        while let Some(joined) = inflight.tasks.join_next().await {
            log_join_failure(joined);
        }
        inflight.chains.clear();
    }

    pub fn stats(&self) -> EffectStats {
        let submitted = self.counters.submitted.load(Ordering::Relaxed);
        let succeeded = self.counters.succeeded.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        EffectStats {
            submitted,
            succeeded,
            failed,
            pending: submitted.saturating_sub(succeeded + failed),
        }
    }
}

async fn run_effect(counters: &EffectCounters, hook: &dyn MutationHook, event: &HookEvent) {
    match hook.run(event).await {
        Ok(()) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        Err(error) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                effect = hook.label(),
                mutation = event.name().as_str(),
                %error,
                "discord side effect failed"
            );
        }
    }
}

fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        tracing::warn!(%error, "side effect task aborted");
    }
}

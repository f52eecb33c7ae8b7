use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ctfnote_archive::{
    ArchiveOutcome, ArchivePublisher, ArchiveState, ArchiveWorkflow, DocumentService, PublishError,
};
use ctfnote_core::{CtfStore, LinkKind, WorkspaceLinks};
use ctfnote_discord::{InMemoryWorkspace, LinkedLocator, RecordingSurface, Workspace};
use ctfnote_hooks::{
    DiscordSync, DiscordSyncConfig, DiscordSyncHooks, EffectExecutor, HookRegistry, Mutation,
    MutationContext, MutationName, MutationOutcome, MutationPipeline,
};
use ctfnote_store::SqliteCtfStore;
use serde_json::json;
use tempfile::TempDir;

#[derive(Default)]
struct CapturingPads {
    documents: Mutex<Vec<(String, String)>>,
}

impl CapturingPads {
    fn documents(&self) -> Vec<(String, String)> {
        self.documents
            .lock()
            .expect("documents lock")
            .clone()
    }
}

#[async_trait]
impl DocumentService for CapturingPads {
    fn max_document_chars(&self) -> usize {
        100_000
    }

    async fn create_document(&self, title: &str, content: &str) -> Result<String, PublishError> {
        let mut documents = self.documents.lock().expect("documents lock");
        documents.push((title.to_string(), content.to_string()));
        Ok(format!("https://pad.example/{}", documents.len()))
    }
}

struct Service {
    _dir: TempDir,
    store: Arc<SqliteCtfStore>,
    workspace: Arc<InMemoryWorkspace>,
    pipeline: MutationPipeline,
    workflow: ArchiveWorkflow,
    pads: Arc<CapturingPads>,
}

impl Service {
    fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            Arc::new(SqliteCtfStore::new(dir.path().join("ctfnote.sqlite")).expect("store"));
        let workspace = Arc::new(InMemoryWorkspace::new());
        let locator = LinkedLocator::new(workspace.clone(), store.clone());
        let hooks = DiscordSyncHooks::new(DiscordSync::new(
            store.clone(),
            locator.clone(),
            DiscordSyncConfig::default(),
        ));
        let pipeline = MutationPipeline::new(
            store.clone(),
            HookRegistry::build(&[&hooks]),
            Arc::new(EffectExecutor::new()),
        );
        let pads = Arc::new(CapturingPads::default());
        let workflow =
            ArchiveWorkflow::new(store.clone(), locator, ArchivePublisher::new(pads.clone()));
        Self {
            _dir: dir,
            store,
            workspace,
            pipeline,
            workflow,
            pads,
        }
    }

    async fn mutate(
        &self,
        name: MutationName,
        input: serde_json::Value,
        user: i64,
    ) -> MutationOutcome {
        let mutation = Mutation::from_input(name, input).expect("decode mutation");
        let outcome = self
            .pipeline
            .execute(mutation, MutationContext::for_user(user))
            .await
            .expect("mutation commits");
        self.pipeline.executor().settle().await;
        outcome
    }
}

#[tokio::test]
async fn integration_ctf_lifecycle_is_mirrored_and_archived() {
    let service = Service::start();
    let ctf = service.store.create_ctf("HTB").await.expect("ctf");
    let alice = service
        .store
        .create_profile("alice", Some("4242"))
        .await
        .expect("profile");
    let category = service.workspace.add_category("HTB");
    let talk = service
        .workspace
        .add_text_channel("challenges-talk", None, Some(&category.id));
    let role = service.workspace.add_role("HTB");

    service
        .mutate(
            MutationName::CreateInvitation,
            json!({ "invitation": { "ctfId": ctf.id, "profileId": alice.id } }),
            alice.id,
        )
        .await;
    assert_eq!(service.workspace.member_roles("4242"), vec![role.id.clone()]);

    let MutationOutcome::Task(task) = service
        .mutate(
            MutationName::CreateTask,
            json!({ "ctfId": ctf.id, "title": "web 1", "description": "" }),
            alice.id,
        )
        .await
    else {
        panic!("createTask should return the task");
    };
    assert_eq!(
        service.workspace.messages_sent_to(&talk.id),
        vec!["New task created: web 1".to_string()]
    );
    let channel_id = service
        .store
        .link(LinkKind::TaskChannel, task.id)
        .await
        .expect("link")
        .expect("task channel link persisted");
    let channel = service.workspace.channel(&channel_id).expect("channel");
    assert_eq!(channel.name, "web 1");
    assert_eq!(channel.parent_id.as_deref(), Some(category.id.as_str()));

    service
        .mutate(
            MutationName::StartWorkingOn,
            json!({ "taskId": task.id }),
            alice.id,
        )
        .await;
    service
        .mutate(
            MutationName::UpdateTask,
            json!({ "id": task.id, "patch": { "flag": "HTB{done}" } }),
            alice.id,
        )
        .await;
    assert_eq!(
        service.workspace.messages_sent_to(&channel_id),
        vec![
            "alice is working on this task!".to_string(),
            "web 1 is solved!".to_string(),
        ]
    );
    assert_eq!(
        service.workspace.channel(&channel_id).expect("channel").name,
        "solved-web 1"
    );

    service
        .mutate(
            MutationName::UpdateCtf,
            json!({ "id": ctf.id, "patch": { "title": "HTB 2024" } }),
            alice.id,
        )
        .await;
    assert_eq!(
        service.workspace.channel(&category.id).expect("category").name,
        "HTB 2024"
    );
    assert_eq!(
        service.workspace.role(&role.id).expect("role").name,
        "HTB 2024"
    );

    let at = Utc
        .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .expect("timestamp");
    service
        .workspace
        .push_message(&channel_id, "alice", at, "the flag was in robots.txt");

    let surface = RecordingSurface::new();
    let state = service.workflow.start(&surface).await.expect("start");
    assert_eq!(
        state,
        ArchiveState::AwaitingSelection {
            candidates: vec!["HTB 2024".to_string()]
        }
    );
    let button = surface.last().expect("view").buttons[0].custom_id.clone();
    let state = service
        .workflow
        .select(&surface, &button)
        .await
        .expect("select");
    let ArchiveState::Done(ArchiveOutcome::Archived { task: archived, .. }) = state else {
        panic!("unexpected archive state: {state:?}");
    };
    assert_eq!(archived.title, "HTB 2024 Discord archive");
    assert_eq!(archived.pad_url, "https://pad.example/1");

    let documents = service.pads.documents();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].1.starts_with("# HTB 2024 Discord archive\n\n"));
    assert!(documents[0].1.contains("## solved-web 1"));
    assert!(documents[0].1.contains("the flag was in robots.txt"));

    let titles: Vec<String> = service
        .store
        .tasks_for_ctf(ctf.id)
        .await
        .expect("tasks")
        .into_iter()
        .map(|task| task.title)
        .collect();
    assert!(titles.contains(&"HTB 2024 Discord archive".to_string()));
    let channels_before = service.workspace.channels().await.expect("channels").len();
    assert_eq!(channels_before, 3, "recording the archive opens no channel");

    service
        .mutate(
            MutationName::DeleteInvitation,
            json!({ "ctfId": ctf.id, "profileId": alice.id }),
            alice.id,
        )
        .await;
    assert!(service.workspace.member_roles("4242").is_empty());
    assert!(service
        .store
        .invitations_for_ctf(ctf.id)
        .await
        .expect("invitations")
        .is_empty());
}

#[tokio::test]
async fn integration_discord_outage_never_fails_mutations() {
    let service = Service::start();
    let ctf = service.store.create_ctf("DEFCON").await.expect("ctf");
    service.workspace.add_category("DEFCON");
    service.workspace.fail_mutations(true);

    let outcome = service
        .mutate(
            MutationName::CreateTask,
            json!({ "ctfId": ctf.id, "title": "pwn 1" }),
            1,
        )
        .await;
    let MutationOutcome::Task(task) = outcome else {
        panic!("createTask should return the task");
    };
    assert_eq!(service.store.task(task.id).await.expect("task").title, "pwn 1");

    let stats = service.pipeline.executor().stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);

    service.workspace.fail_mutations(false);
    service
        .mutate(MutationName::DeleteTask, json!({ "id": task.id }), 1)
        .await;
    assert!(service.store.task(task.id).await.is_err());
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::transport_helpers::compare_snowflakes;
use crate::workspace::{
    ChannelEdit, ChannelKind, NewChannel, Workspace, WorkspaceChannel, WorkspaceError,
    WorkspaceMessage, WorkspaceResult, WorkspaceRole,
};

/// Largest history page Discord returns.
const MAX_HISTORY_PAGE: usize = 100;

#[derive(Debug, Default)]
struct FakeGuild {
    next_id: u64,
    channels: Vec<WorkspaceChannel>,
    roles: Vec<WorkspaceRole>,
    history: BTreeMap<String, Vec<WorkspaceMessage>>,
    sent: BTreeMap<String, Vec<String>>,
    member_roles: BTreeMap<String, BTreeSet<String>>,
    fail_mutations: bool,
    fail_reads: bool,
    history_requests: usize,
}

impl FakeGuild {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        (1_000 + self.next_id).to_string()
    }

    fn check_writable(&self, operation: &str) -> WorkspaceResult<()> {
        if self.fail_mutations {
            return Err(WorkspaceError::Unavailable(format!(
                "{operation} rejected by fake guild"
            )));
        }
        Ok(())
    }

    fn check_readable(&self, operation: &str) -> WorkspaceResult<()> {
        if self.fail_reads {
            return Err(WorkspaceError::Unavailable(format!(
                "{operation} rejected by fake guild"
            )));
        }
        Ok(())
    }
}

/// In-process guild used by tests and dry runs. Ids are allocated from a
/// counter so they sort like snowflakes.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    guild: Mutex<FakeGuild>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeGuild> {
        self.guild
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_category(&self, name: &str) -> WorkspaceChannel {
        let mut guild = self.lock();
        let channel = WorkspaceChannel {
            id: guild.allocate_id(),
            kind: ChannelKind::Category,
            name: name.to_string(),
            topic: None,
            parent_id: None,
        };
        guild.channels.push(channel.clone());
        channel
    }

    pub fn add_text_channel(
        &self,
        name: &str,
        topic: Option<&str>,
        parent_id: Option<&str>,
    ) -> WorkspaceChannel {
        let mut guild = self.lock();
        let channel = WorkspaceChannel {
            id: guild.allocate_id(),
            kind: ChannelKind::Text,
            name: name.to_string(),
            topic: topic.map(str::to_string),
            parent_id: parent_id.map(str::to_string),
        };
        guild.channels.push(channel.clone());
        channel
    }

    pub fn add_role(&self, name: &str) -> WorkspaceRole {
        let mut guild = self.lock();
        let role = WorkspaceRole {
            id: guild.allocate_id(),
            name: name.to_string(),
        };
        guild.roles.push(role.clone());
        role
    }

    /// Appends a message to a channel's history and returns its id.
    pub fn push_message(
        &self,
        channel_id: &str,
        author: &str,
        timestamp: DateTime<Utc>,
        content: &str,
    ) -> String {
        let mut guild = self.lock();
        let id = guild.allocate_id();
        guild
            .history
            .entry(channel_id.to_string())
            .or_default()
            .push(WorkspaceMessage {
                id: id.clone(),
                author: author.to_string(),
                timestamp,
                content: content.to_string(),
                attachments: Vec::new(),
            });
        id
    }

    pub fn channel(&self, channel_id: &str) -> Option<WorkspaceChannel> {
        self.lock()
            .channels
            .iter()
            .find(|channel| channel.id == channel_id)
            .cloned()
    }

    pub fn role(&self, role_id: &str) -> Option<WorkspaceRole> {
        self.lock().roles.iter().find(|role| role.id == role_id).cloned()
    }

    /// Messages posted through [`Workspace::send_message`], in send order.
    pub fn messages_sent_to(&self, channel_id: &str) -> Vec<String> {
        self.lock()
            .sent
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn member_roles(&self, member_id: &str) -> Vec<String> {
        self.lock()
            .member_roles
            .get(member_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes every side-effecting call fail until switched back.
    pub fn fail_mutations(&self, fail: bool) {
        self.lock().fail_mutations = fail;
    }

    /// Makes channel, role and history reads fail until switched back.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn history_requests(&self) -> usize {
        self.lock().history_requests
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn channels(&self) -> WorkspaceResult<Vec<WorkspaceChannel>> {
        let guild = self.lock();
        guild.check_readable("list channels")?;
        Ok(guild.channels.clone())
    }

    async fn roles(&self) -> WorkspaceResult<Vec<WorkspaceRole>> {
        let guild = self.lock();
        guild.check_readable("list roles")?;
        Ok(guild.roles.clone())
    }

    async fn create_channel(&self, channel: NewChannel) -> WorkspaceResult<WorkspaceChannel> {
        let mut guild = self.lock();
        guild.check_writable("create channel")?;
        if let Some(parent_id) = &channel.parent_id {
            if !guild
                .channels
                .iter()
                .any(|existing| existing.id == *parent_id && existing.is_category())
            {
                return Err(WorkspaceError::UnknownObject(parent_id.clone()));
            }
        }
        let created = WorkspaceChannel {
            id: guild.allocate_id(),
            kind: channel.kind,
            name: channel.name,
            topic: channel.topic,
            parent_id: channel.parent_id,
        };
        guild.channels.push(created.clone());
        Ok(created)
    }

    async fn edit_channel(
        &self,
        channel_id: &str,
        edit: ChannelEdit,
    ) -> WorkspaceResult<WorkspaceChannel> {
        let mut guild = self.lock();
        guild.check_writable("edit channel")?;
        let channel = guild
            .channels
            .iter_mut()
            .find(|channel| channel.id == channel_id)
            .ok_or_else(|| WorkspaceError::UnknownObject(channel_id.to_string()))?;
        edit.apply(channel);
        Ok(channel.clone())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> WorkspaceResult<()> {
        let mut guild = self.lock();
        guild.check_writable("send message")?;
        if !guild.channels.iter().any(|channel| channel.id == channel_id) {
            return Err(WorkspaceError::UnknownObject(channel_id.to_string()));
        }
        guild
            .sent
            .entry(channel_id.to_string())
            .or_default()
            .push(content.to_string());
        Ok(())
    }

    async fn rename_role(&self, role_id: &str, name: &str) -> WorkspaceResult<()> {
        let mut guild = self.lock();
        guild.check_writable("rename role")?;
        let role = guild
            .roles
            .iter_mut()
            .find(|role| role.id == role_id)
            .ok_or_else(|| WorkspaceError::UnknownObject(role_id.to_string()))?;
        role.name = name.to_string();
        Ok(())
    }

    async fn add_member_role(&self, member_id: &str, role_id: &str) -> WorkspaceResult<()> {
        let mut guild = self.lock();
        guild.check_writable("add member role")?;
        guild
            .member_roles
            .entry(member_id.to_string())
            .or_default()
            .insert(role_id.to_string());
        Ok(())
    }

    async fn remove_member_role(&self, member_id: &str, role_id: &str) -> WorkspaceResult<()> {
        let mut guild = self.lock();
        guild.check_writable("remove member role")?;
        if let Some(roles) = guild.member_roles.get_mut(member_id) {
            roles.remove(role_id);
        }
        Ok(())
    }

    async fn messages_after(
        &self,
        channel_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> WorkspaceResult<Vec<WorkspaceMessage>> {
        let mut guild = self.lock();
        guild.check_readable("read history")?;
        guild.history_requests += 1;
        let mut history = guild.history.get(channel_id).cloned().unwrap_or_default();
        history.sort_by(|left, right| compare_snowflakes(&left.id, &right.id));
        Ok(history
            .into_iter()
            .filter(|message| match after {
                Some(cursor) => compare_snowflakes(&message.id, cursor).is_gt(),
                None => true,
            })
            .take(limit.clamp(1, MAX_HISTORY_PAGE))
            .collect())
    }
}

use chrono::{DateTime, SecondsFormat, Utc};
use ctfnote_discord::{Workspace, WorkspaceChannel, WorkspaceMessage, WorkspaceResult};
use serde::Serialize;

/// Discord serves at most this many messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One exported message, tagged with the channel it was posted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub channel_id: String,
    pub channel: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub attachments: Vec<String>,
}

impl RenderedMessage {
    fn from_workspace(channel: &WorkspaceChannel, message: WorkspaceMessage) -> Self {
        Self {
            channel_id: channel.id.clone(),
            channel: channel.name.clone(),
            author: message.author,
            timestamp: message.timestamp,
            content: message.content,
            attachments: message.attachments,
        }
    }

    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Collects the history of every text channel under `categories`.
///
/// Categories are visited in the given order and channels in workspace
/// order; each channel's messages are oldest first and never interleave with
/// another channel's. `page_size` is clamped to what Discord serves; a
/// page shorter than requested ends a channel's history.
pub async fn export_messages(
    workspace: &dyn Workspace,
    categories: &[WorkspaceChannel],
    page_size: usize,
) -> WorkspaceResult<Vec<RenderedMessage>> {
    let page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
    let channels = workspace.channels().await?;
    let mut exported = Vec::new();
    for category in categories {
        for channel in channels.iter().filter(|channel| {
            channel.is_text() && channel.parent_id.as_deref() == Some(category.id.as_str())
        }) {
            let history = channel_history(workspace, &channel.id, page_size).await?;
            tracing::debug!(
                channel_id = %channel.id,
                channel = %channel.name,
                messages = history.len(),
                "exported channel history"
            );
            exported.extend(
                history
                    .into_iter()
                    .map(|message| RenderedMessage::from_workspace(channel, message)),
            );
        }
    }
    Ok(exported)
}

async fn channel_history(
    workspace: &dyn Workspace,
    channel_id: &str,
    page_size: usize,
) -> WorkspaceResult<Vec<WorkspaceMessage>> {
    let mut history: Vec<WorkspaceMessage> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = workspace
            .messages_after(channel_id, cursor.as_deref(), page_size)
            .await?;
        let page_len = page.len();
        if let Some(last) = page.last() {
            cursor = Some(last.id.clone());
        }
        history.extend(page);
        if page_len < page_size {
            break;
        }
    }
    history.sort_by(|left, right| {
        left.timestamp
            .cmp(&right.timestamp)
            .then_with(|| snowflake_order(&left.id, &right.id))
    });
    Ok(history)
}

fn snowflake_order(left: &str, right: &str) -> std::cmp::Ordering {
    match (left.parse::<u128>(), right.parse::<u128>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use ctfnote_discord::InMemoryWorkspace;

    use super::*;

    #[tokio::test]
    async fn functional_six_channels_export_in_category_then_channel_order() {
        let workspace = InMemoryWorkspace::new();
        let first = workspace.add_category("HTB");
        let second = workspace.add_category("HTB");
        workspace.add_category("DEFCON");
        let base = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("base");

        let mut channels = Vec::new();
        for (index, parent) in [&first, &first, &first, &second, &second, &second]
            .into_iter()
            .enumerate()
        {
            let name = format!("task-{index}");
            channels.push(workspace.add_text_channel(&name, Some(&name), Some(&parent.id)));
        }
        // later channels get older messages so ordering cannot come from timestamps
        for (index, channel) in channels.iter().enumerate() {
            let start = base - Duration::hours(index as i64);
            for minute in 0..3 {
                workspace.push_message(
                    &channel.id,
                    "alice",
                    start + Duration::minutes(minute),
                    &format!("{}-{minute}", channel.name),
                );
            }
        }

        let exported = export_messages(&workspace, &[first, second], 2)
            .await
            .expect("export");

        assert_eq!(exported.len(), 18);
        let expected: Vec<String> = (0..6)
            .flat_map(|index| (0..3).map(move |minute| format!("task-{index}-{minute}")))
            .collect();
        let actual: Vec<String> = exported.iter().map(|m| m.content.clone()).collect();
        assert_eq!(actual, expected);
        assert!(exported
            .windows(2)
            .filter(|pair| pair[0].channel == pair[1].channel)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[tokio::test]
    async fn unit_paging_stops_on_short_page() {
        let workspace = InMemoryWorkspace::new();
        let category = workspace.add_category("HTB");
        let channel = workspace.add_text_channel("web", Some("web"), Some(&category.id));
        let at = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("ts");
        for index in 0..5 {
            workspace.push_message(&channel.id, "bob", at, &index.to_string());
        }

        let exported = export_messages(&workspace, &[category], 2)
            .await
            .expect("export");
        assert_eq!(exported.len(), 5);
        assert_eq!(workspace.history_requests(), 3);
        assert_eq!(exported[0].timestamp_iso(), "2024-03-01T12:00:00.000Z");
    }

    #[tokio::test]
    async fn unit_channels_outside_categories_are_ignored() {
        let workspace = InMemoryWorkspace::new();
        let category = workspace.add_category("HTB");
        let stray = workspace.add_text_channel("general", None, None);
        let at = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("ts");
        workspace.push_message(&stray.id, "carol", at, "hello");

        assert!(export_messages(&workspace, &[category], 10)
            .await
            .expect("export")
            .is_empty());
    }

    #[tokio::test]
    async fn regression_oversized_page_requests_are_clamped() {
        let workspace = InMemoryWorkspace::new();
        let category = workspace.add_category("HTB");
        let channel = workspace.add_text_channel("web", Some("web"), Some(&category.id));
        let at = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("ts");
        for index in 0..150 {
            workspace.push_message(&channel.id, "bob", at, &index.to_string());
        }

        let exported = export_messages(&workspace, &[category], 500)
            .await
            .expect("export");
        assert_eq!(exported.len(), 150);
        assert_eq!(workspace.history_requests(), 2);
        assert_eq!(exported[0].channel_id, channel.id);
    }
}

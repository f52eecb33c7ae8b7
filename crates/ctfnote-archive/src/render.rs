use crate::exporter::RenderedMessage;

/// Renders one markdown block per message. The first block of every channel
/// opens with a `## <channel>` heading; channels sharing a name still get a
/// section each.
pub fn render_blocks(messages: &[RenderedMessage]) -> Vec<String> {
    let mut blocks = Vec::with_capacity(messages.len());
    let mut current_channel: Option<&str> = None;
    for message in messages {
        let mut block = String::new();
        if current_channel != Some(message.channel_id.as_str()) {
            block.push_str(&format!("## {}\n\n", message.channel));
            current_channel = Some(message.channel_id.as_str());
        }
        block.push_str(&format!(
            "**{}** ({})\n\n",
            message.author,
            message.timestamp_iso()
        ));
        if !message.content.is_empty() {
            block.push_str(&message.content);
            block.push_str("\n\n");
        }
        for url in &message.attachments {
            block.push_str(&format!("[attachment]({url})\n\n"));
        }
        blocks.push(block);
    }
    blocks
}

pub fn document_heading(title: &str) -> String {
    format!("# {title}\n\n")
}

pub fn char_len(value: &str) -> usize {
    value.chars().count()
}

/// Greedily packs blocks into bodies of at most `budget` characters. Blocks
/// stay whole when they fit; a larger one is cut at line boundaries (lines
/// longer than the budget at character boundaries) and its header stays on
/// the first piece. Concatenating the bodies gives back the blocks.
pub fn pack_blocks(blocks: &[String], budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut bodies = Vec::new();
    let mut current = String::new();
    let mut current_len = 0_usize;
    for block in blocks.iter().flat_map(|block| split_block(block, budget)) {
        let block_len = char_len(&block);
        if !current.is_empty() && current_len + block_len > budget {
            bodies.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(&block);
        current_len += block_len;
    }
    if !current.is_empty() || bodies.is_empty() {
        bodies.push(current);
    }
    bodies
}

fn split_block(block: &str, budget: usize) -> Vec<String> {
    if char_len(block) <= budget {
        return vec![block.to_string()];
    }
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut piece_len = 0_usize;
    for line in block.split_inclusive('\n') {
        let line_len = char_len(line);
        if piece_len + line_len > budget && !piece.is_empty() {
            pieces.push(std::mem::take(&mut piece));
            piece_len = 0;
        }
        if line_len <= budget {
            piece.push_str(line);
            piece_len += line_len;
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(budget) {
            let chunk: String = chunk.iter().collect();
            if chunk.chars().count() == budget {
                pieces.push(chunk);
            } else {
                piece_len = chunk.chars().count();
                piece = chunk;
            }
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn message(channel: &str, content: &str) -> RenderedMessage {
        RenderedMessage {
            channel_id: format!("id-{channel}"),
            channel: channel.to_string(),
            author: "alice".to_string(),
            timestamp: Utc
                .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
                .single()
                .expect("ts"),
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn unit_channel_heading_only_on_first_block() {
        let mut with_attachment = message("web", "");
        with_attachment.attachments = vec!["https://cdn.example/x.png".to_string()];
        let blocks = render_blocks(&[
            message("web", "hi"),
            with_attachment,
            message("pwn", "yo"),
        ]);
        assert!(blocks[0].starts_with("## web\n\n**alice** (2024-03-01T12:00:00.000Z)"));
        assert_eq!(
            blocks[1],
            "**alice** (2024-03-01T12:00:00.000Z)\n\n[attachment](https://cdn.example/x.png)\n\n"
        );
        assert!(blocks[2].starts_with("## pwn\n\n"));
    }

    #[test]
    fn unit_packing_respects_budget_and_cuts_oversized_blocks() {
        let blocks = vec![
            "a".repeat(4),
            "b".repeat(4),
            "c".repeat(15),
            "d".repeat(3),
        ];
        let bodies = pack_blocks(&blocks, 10);
        assert_eq!(
            bodies,
            vec![
                "aaaabbbb".to_string(),
                "c".repeat(10),
                "cccccddd".to_string()
            ]
        );
    }

    #[test]
    fn regression_oversized_message_is_cut_at_lines_with_header_first() {
        let content = (0..40)
            .map(|line| format!("line {line:02} {}", "z".repeat(12)))
            .collect::<Vec<_>>()
            .join("\n");
        let blocks = render_blocks(&[message("web", &content)]);
        let bodies = pack_blocks(&blocks, 120);

        assert!(bodies.len() > 1);
        assert!(bodies.iter().all(|body| char_len(body) <= 120));
        assert!(bodies[0].starts_with("## web\n\n**alice** (2024-03-01T12:00:00.000Z)"));
        assert!(bodies[1].starts_with("line "));
        assert_eq!(bodies.concat(), blocks.concat());
    }

    #[test]
    fn regression_same_named_channels_get_separate_sections() {
        let mut first = message("challenges-talk", "one");
        first.channel_id = "10".to_string();
        let mut second = message("challenges-talk", "two");
        second.channel_id = "11".to_string();
        let blocks = render_blocks(&[first, second]);
        assert!(blocks[0].starts_with("## challenges-talk\n\n"));
        assert!(blocks[1].starts_with("## challenges-talk\n\n"));
    }

    #[test]
    fn unit_empty_archive_still_yields_one_body() {
        assert_eq!(pack_blocks(&[], 10), vec![String::new()]);
    }
}

//! Message-ordering invariant (§4.3.1): tool messages must immediately
//! follow the assistant message that issued their tool call, in the order
//! the calls were issued. Idempotent — running it twice is a no-op.

use super::{Conversation, Message};

pub fn normalize_message_order(conversation: &mut Conversation) {
    let messages = std::mem::take(&mut conversation.messages);
    let mut assistant_positions: Vec<(usize, Vec<String>)> = Vec::new();
    for (idx, message) in messages.iter().enumerate() {
        if let Message::Assistant { tool_calls, .. } = message {
            if !tool_calls.is_empty() {
                assistant_positions.push((idx, tool_calls.iter().map(|tc| tc.id.clone()).collect()));
            }
        }
    }

    // Bucket tool messages by the assistant call-id that issued them.
    let mut tool_by_id: std::collections::HashMap<String, Message> = std::collections::HashMap::new();
    let mut rest: Vec<(usize, Message)> = Vec::new();
    for (idx, message) in messages.into_iter().enumerate() {
        if let Some(id) = message.tool_call_id() {
            tool_by_id.insert(id.to_string(), message);
        } else {
            rest.push((idx, message));
        }
    }

    let mut out = Vec::with_capacity(rest.len() + tool_by_id.len());
    let mut rest = rest.into_iter().peekable();
    let mut consumed_through: usize = 0;

    for (assistant_idx, call_ids) in &assistant_positions {
        while let Some((idx, _)) = rest.peek() {
            if *idx <= *assistant_idx {
                let (_, message) = rest.next().unwrap();
                out.push(message);
                consumed_through = *idx;
            } else {
                break;
            }
        }
        let _ = consumed_through;
        for id in call_ids {
            if let Some(tool_message) = tool_by_id.remove(id) {
                out.push(tool_message);
            }
        }
    }
    for (_, message) in rest {
        out.push(message);
    }
    // Any tool message whose assistant was dropped (shouldn't happen under
    // the conversation's own invariants) is appended rather than lost.
    for (_, message) in tool_by_id {
        out.push(message);
    }

    conversation.messages = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ToolCallFunction, ToolCallRequest};

    fn tool_call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            function: ToolCallFunction {
                name: "read_file".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    #[test]
    fn reorders_out_of_order_tool_messages() {
        let mut conv = Conversation::new();
        conv.push(Message::Assistant {
            content: String::new(),
            tool_calls: vec![tool_call("a"), tool_call("b")],
        });
        // Pushed out of order, and with an unrelated user message spliced in.
        conv.push(Message::Tool {
            tool_call_id: "b".to_string(),
            content: "b result".to_string(),
        });
        conv.push(Message::User("unrelated".to_string()));
        conv.push(Message::Tool {
            tool_call_id: "a".to_string(),
            content: "a result".to_string(),
        });

        normalize_message_order(&mut conv);

        let ids: Vec<Option<&str>> = conv.messages.iter().map(|m| m.tool_call_id()).collect();
        assert_eq!(ids[1], Some("a"));
        assert_eq!(ids[2], Some("b"));
        assert!(matches!(conv.messages[3], Message::User(_)));
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut conv = Conversation::new();
        conv.push(Message::Assistant {
            content: String::new(),
            tool_calls: vec![tool_call("x")],
        });
        conv.push(Message::Tool {
            tool_call_id: "x".to_string(),
            content: "ok".to_string(),
        });
        normalize_message_order(&mut conv);
        let once = format!("{:?}", conv.messages);
        normalize_message_order(&mut conv);
        let twice = format!("{:?}", conv.messages);
        assert_eq!(once, twice);
    }
}

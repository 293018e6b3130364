//! Response normalization.
//!
//! Engines return either a bare string or a list of typed blocks.
//! Everything downstream (streaming, history, the protocol monitor)
//! consumes the normalized forms produced here. Pure functions, no
//! state.

use pmm_domain::message::{ContentPart, ResponseContent, ToolCall};

/// Extract the displayable text from a response.
///
/// Plain text passes through unchanged. For block content, text block
/// payloads are concatenated in order; non-text blocks are skipped and
/// never stringified into the output.
pub fn extract_text(content: &ResponseContent) -> String {
    match content {
        ResponseContent::PlainText(t) => t.clone(),
        ResponseContent::Blocks(blocks) => {
            let mut out = String::new();
            for block in blocks {
                if let ContentPart::Text { text } = block {
                    out.push_str(text);
                }
            }
            out
        }
    }
}

/// Extract tool invocation requests from a response, in block order.
pub fn extract_tool_requests(content: &ResponseContent) -> Vec<ToolCall> {
    match content {
        ResponseContent::PlainText(_) => Vec::new(),
        ResponseContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect(),
    }
}

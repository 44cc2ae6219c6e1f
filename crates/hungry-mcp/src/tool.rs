//! Reading tool and resource results.

use serde_json::Value;

use crate::error::McpError;

/// Text of a `tools/call` result.
///
/// A plain string is used as is; a `content` array contributes its `text`
/// entries joined by newlines; anything else is rendered as compact JSON.
/// A result flagged `isError: true` becomes [`McpError::ToolFailed`].
pub fn tool_text(result: &Value) -> Result<String, McpError> {
    let text = match result {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => match map.get("content").and_then(Value::as_array) {
            Some(content) => join_text(content, "text"),
            None => result.to_string(),
        },
        other => other.to_string(),
    };

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(McpError::ToolFailed(text));
    }
    Ok(text)
}

/// Text of a `resources/read` result (`contents[].text`).
pub fn resource_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("contents").and_then(Value::as_array) {
            Some(contents) => join_text(contents, "text"),
            None => result.to_string(),
        },
        other => other.to_string(),
    }
}

fn join_text(items: &[Value], key: &str) -> String {
    items
        .iter()
        .filter_map(|item| item.get(key).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_array() {
        let result = json!({
            "content": [
                { "type": "text", "text": "Found 2 taco restaurants" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "1. Discada" }
            ]
        });
        assert_eq!(tool_text(&result).unwrap(), "Found 2 taco restaurants\n1. Discada");
    }

    #[test]
    fn test_plain_string_and_other_shapes() {
        assert_eq!(tool_text(&json!("Order started")).unwrap(), "Order started");
        assert_eq!(tool_text(&json!({"count": 3})).unwrap(), r#"{"count":3}"#);
        assert_eq!(tool_text(&Value::Null).unwrap(), "");
    }

    #[test]
    fn test_is_error_flag() {
        let result = json!({
            "content": [{ "type": "text", "text": "Restaurant not found" }],
            "isError": true
        });
        match tool_text(&result) {
            Err(McpError::ToolFailed(msg)) => assert_eq!(msg, "Restaurant not found"),
            other => panic!("Expected tool failure, got {:?}", other),
        }
    }

    #[test]
    fn test_resource_contents() {
        let result = json!({
            "contents": [{ "uri": "resource://search_results/abc", "text": "3 menus found" }]
        });
        assert_eq!(resource_text(&result), "3 menus found");
    }
}

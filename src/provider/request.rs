use serde_json::{Map, Value, json};
use tracing::warn;

use crate::types::{ContentPart, Message, Role, SamplingOptions};

/// Converts a conversation into the `messages` array sent to OpenAI-compatible endpoints.
///
/// A non-empty system prompt becomes a leading system message. Images are attached only to the
/// final message and only when it is a user turn; otherwise they are dropped.
pub fn assemble_messages(history: &[Message], images: &[String], system_prompt: &str) -> Vec<Value> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(json!({ "role": Role::System.as_str(), "content": system_prompt }));
    }

    let attach_to_last = !images.is_empty()
        && history
            .last()
            .is_some_and(|message| message.role == Role::User);
    if !images.is_empty() && !attach_to_last {
        warn!(
            images = images.len(),
            "dropping images: the last message is not a user turn"
        );
    }

    let last = history.len().saturating_sub(1);
    for (idx, message) in history.iter().enumerate() {
        let images: &[String] = if attach_to_last && idx == last {
            images
        } else {
            &[]
        };
        messages.push(convert_message(message, images));
    }
    messages
}

fn convert_message(message: &Message, images: &[String]) -> Value {
    let content = match &message.content_parts {
        Some(parts) => {
            let mut converted: Vec<Value> = parts.iter().map(convert_content_part).collect();
            converted.extend(images.iter().map(|url| image_url_part(url, None)));
            Value::Array(converted)
        }
        None if images.is_empty() => Value::String(message.content.clone()),
        None => {
            let mut converted = Vec::with_capacity(images.len() + 1);
            converted.push(text_part(&message.content));
            converted.extend(images.iter().map(|url| image_url_part(url, None)));
            Value::Array(converted)
        }
    };
    json!({ "role": message.role.as_str(), "content": content })
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => text_part(text),
        ContentPart::ImageUrl { url, detail } => image_url_part(url, detail.map(|d| d.as_str())),
        ContentPart::ImageBase64 { media_type, data } => {
            image_url_part(&format!("data:{media_type};base64,{data}"), None)
        }
    }
}

fn text_part(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

fn image_url_part(url: &str, detail: Option<&str>) -> Value {
    let mut image_url = Map::new();
    image_url.insert("url".to_string(), Value::String(url.to_string()));
    if let Some(detail) = detail {
        image_url.insert("detail".to_string(), Value::String(detail.to_string()));
    }
    json!({ "type": "image_url", "image_url": image_url })
}

/// Builds the chat-completion body shared by every strategy.
///
/// `stream` is written when `Some`; sampling options are written only when set.
pub fn build_chat_body(
    model: &str,
    messages: Vec<Value>,
    options: &SamplingOptions,
    stream: Option<bool>,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(messages));
    if let Some(stream) = stream {
        body.insert("stream".to_string(), Value::Bool(stream));
    }
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(max_tokens) = options.max_tokens {
        body.insert("max_tokens".to_string(), Value::from(max_tokens));
    }
    if let Some(seed) = options.seed {
        body.insert("seed".to_string(), Value::from(seed));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageDetail;

    fn images(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://img.example/{i}.png")).collect()
    }

    #[test]
    fn system_prompt_is_prepended() {
        let messages = assemble_messages(&[Message::user("hi")], &[], "be brief");
        assert_eq!(
            messages,
            vec![
                json!({"role": "system", "content": "be brief"}),
                json!({"role": "user", "content": "hi"}),
            ]
        );
    }

    #[test]
    fn empty_history_yields_only_system_message() {
        assert_eq!(
            assemble_messages(&[], &images(1), "sys"),
            vec![json!({"role": "system", "content": "sys"})]
        );
        assert!(assemble_messages(&[], &[], "").is_empty());
    }

    #[test]
    fn images_attach_to_final_user_message() {
        let history = vec![
            Message::system("s"),
            Message::assistant("a"),
            Message::user("look"),
        ];
        let messages = assemble_messages(&history, &images(2), "");
        assert_eq!(messages.len(), 3);
        let content = messages[2]["content"].as_array().expect("parts");
        assert_eq!(content.len(), 3);
        assert_eq!(content[0], json!({"type": "text", "text": "look"}));
        assert_eq!(
            content[2],
            json!({"type": "image_url", "image_url": {"url": "https://img.example/1.png"}})
        );
        assert_eq!(messages[1]["content"], json!("a"));
    }

    #[test]
    fn images_are_dropped_when_last_message_is_not_user() {
        let history = vec![Message::user("q"), Message::assistant("a")];
        let messages = assemble_messages(&history, &images(2), "");
        assert!(messages.iter().all(|message| message["content"].is_string()));
    }

    #[test]
    fn content_parts_are_authoritative() {
        let history = vec![Message::with_parts(
            Role::User,
            vec![
                ContentPart::Text {
                    text: "what is this".to_string(),
                },
                ContentPart::ImageUrl {
                    url: "https://x/a.jpg".to_string(),
                    detail: Some(ImageDetail::High),
                },
                ContentPart::ImageBase64 {
                    media_type: "image/png".to_string(),
                    data: "iVBOR".to_string(),
                },
            ],
        )];
        let messages = assemble_messages(&history, &images(1), "");
        let content = messages[0]["content"].as_array().expect("parts");
        assert_eq!(content.len(), 4);
        assert_eq!(content[1]["image_url"]["detail"], json!("high"));
        assert_eq!(
            content[2]["image_url"]["url"],
            json!("data:image/png;base64,iVBOR")
        );
        assert_eq!(content[3]["image_url"]["url"], json!("https://img.example/0.png"));
    }

    #[test]
    fn chat_body_only_writes_set_options() {
        let body = build_chat_body("m", Vec::new(), &SamplingOptions::default(), None);
        assert_eq!(body, json!({"model": "m", "messages": []}));

        let options = SamplingOptions {
            temperature: Some(0.5),
            max_tokens: Some(64),
            seed: Some(7),
        };
        let body = build_chat_body("m", Vec::new(), &options, Some(true));
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["temperature"], json!(0.5));
        assert_eq!(body["max_tokens"], json!(64));
        assert_eq!(body["seed"], json!(7));
    }
}

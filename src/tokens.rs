//! Token accounting on top of the host model's counting primitive.

use crate::canonical::{Message, StreamPart};
use crate::host::{HostError, HostModel};
use std::sync::Arc;

/// Counts input and output tokens the same way for every dialect.
#[derive(Clone)]
pub struct TokenAccountant {
    host: Arc<dyn HostModel>,
}

impl TokenAccountant {
    pub fn new(host: Arc<dyn HostModel>) -> Self {
        Self { host }
    }

    pub async fn count(&self, text: &str) -> Result<u64, HostError> {
        if text.is_empty() {
            return Ok(0);
        }
        self.host.count_tokens(text).await
    }

    /// Sum of per-message counts, in message order.
    pub async fn count_messages(&self, messages: &[Message]) -> Result<u64, HostError> {
        let mut total = 0;
        for message in messages {
            total += self.count(&message.counted_text()).await?;
        }
        Ok(total)
    }

    /// Output tokens charged for one fragment.
    pub async fn count_part(&self, part: &StreamPart) -> Result<u64, HostError> {
        self.count(&part.counted_text()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Content;
    use crate::host::ScriptedModel;
    use serde_json::json;

    fn accountant() -> TokenAccountant {
        TokenAccountant::new(Arc::new(ScriptedModel::echo()))
    }

    #[test]
    fn test_messages_are_summed() {
        let messages = vec![
            Message::user(Content::Text("one two three".into())),
            Message::assistant(Content::Text("four".into())),
        ];
        let total = tokio_test::block_on(accountant().count_messages(&messages)).unwrap();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_empty_text_costs_nothing() {
        assert_eq!(tokio_test::block_on(accountant().count("")).unwrap(), 0);
    }

    #[test]
    fn test_tool_call_is_charged() {
        let part = StreamPart::tool_call("call_1", "get_weather", json!({"location": "Tokyo"}));
        let n = tokio_test::block_on(accountant().count_part(&part)).unwrap();
        assert!(n > 0);
    }
}

//! Scripted model backends for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tangle_core::error::ModelError;
use tangle_core::{ChatModel, ModelReply, ModelRequest};

/// Model that replays a scripted sequence of replies and records every
/// request it receives. Once the script runs out, further calls fail.
pub struct SequentialMockModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl SequentialMockModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replies(replies.into_iter().map(ModelReply::new).collect())
    }

    /// Script structured replies (metadata, usage) instead of bare text.
    pub fn with_replies(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls served so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for SequentialMockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, request: ModelRequest) -> std::result::Result<ModelReply, ModelError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::ApiError {
                status_code: 500,
                message: "mock reply script exhausted".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_in_order_then_fails() {
        let model = SequentialMockModel::new(["first", "second"]);

        let a = model.invoke(ModelRequest::new("m", "p1")).await.unwrap();
        let b = model.invoke(ModelRequest::new("m", "p2")).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");

        let err = model.invoke(ModelRequest::new("m", "p3")).await.unwrap_err();
        assert!(err.to_string().contains("exhausted"));
        assert_eq!(model.calls(), 3);
        assert_eq!(model.requests()[1].prompt, "p2");
    }
}

//! End-to-end orchestrator tests over a scripted backend: every path must
//! produce the right frames, in order, closed by exactly one `[DONE]`.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use chartify_rs::api::chat::run_chat_stream;
use chartify_rs::error::ChatError;
use chartify_rs::protocol::{AssistantReply, ChatMessage, FunctionCall};
use chartify_rs::stream::SseEmitter;
use chartify_rs::upstream::ChatBackend;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

const DONE: &str = "data: [DONE]\n\n";

enum FakeCompletion {
    Reply(AssistantReply),
    Fail { status: u16, message: String },
}

struct FakeBackend {
    completion: FakeCompletion,
    deltas: Vec<String>,
    fail_mid_stream: bool,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl FakeBackend {
    fn new(completion: FakeCompletion, deltas: &[&str]) -> Self {
        Self {
            completion,
            deltas: deltas.iter().map(ToString::to_string).collect(),
            fail_mid_stream: false,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }

    fn streaming_only(deltas: &[&str]) -> Self {
        Self::new(FakeCompletion::Reply(AssistantReply::default()), deltas)
    }
}

impl ChatBackend for FakeBackend {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<Vec<Value>>,
    ) -> Result<AssistantReply, ChatError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        match &self.completion {
            FakeCompletion::Reply(reply) => Ok(reply.clone()),
            FakeCompletion::Fail { status, message } => Err(ChatError::Upstream {
                status: *status,
                message: message.clone(),
            }),
        }
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String, ChatError>>, ChatError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let mut items: Vec<Result<String, ChatError>> =
            self.deltas.iter().cloned().map(Ok).collect();
        if self.fail_mid_stream {
            items.push(Err(ChatError::Transport("connection reset".to_string())));
        }
        Ok(futures_util::stream::iter(items).boxed())
    }
}

fn user_turn(content: &str) -> Vec<ChatMessage> {
    vec![ChatMessage {
        role: "user".to_string(),
        content: content.to_string(),
    }]
}

async fn run(backend: FakeBackend, user_message: &str) -> (Vec<String>, FakeBackend) {
    let messages = user_turn(user_message);
    let (tx, mut rx) = mpsc::channel::<Bytes>(32);
    let handle = tokio::spawn(async move {
        let mut emitter = SseEmitter::new(tx);
        run_chat_stream(&backend, &messages, &mut emitter).await;
        backend
    });

    let mut frames = Vec::new();
    while let Some(chunk) = rx.recv().await {
        frames.push(String::from_utf8(chunk.to_vec()).unwrap());
    }
    let backend = handle.await.unwrap();
    (frames, backend)
}

/// Every stream ends with exactly one terminal frame and nothing after it.
fn assert_terminated(frames: &[String]) {
    assert_eq!(frames.last().map(String::as_str), Some(DONE));
    assert_eq!(frames.iter().filter(|f| f.as_str() == DONE).count(), 1);
}

fn payload(frame: &str) -> Value {
    let json = frame
        .strip_prefix("data: ")
        .and_then(|rest| rest.strip_suffix("\n\n"))
        .expect("frame should be data-framed");
    serde_json::from_str(json).expect("frame payload should be JSON")
}

#[tokio::test]
async fn plain_stream_emits_every_delta_in_order() {
    let backend = FakeBackend::streaming_only(&["你", "好", "！"]);
    let (frames, backend) = run(backend, "今天天气怎么样").await;

    assert_terminated(&frames);
    let contents: Vec<String> = frames[..frames.len() - 1]
        .iter()
        .map(|f| payload(f)["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, vec!["你", "好", "！"]);
    assert_eq!(contents.concat(), "你好！");

    // No trigger word: the buffered tool-calling path is never taken
    assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn chart_request_yields_single_chart_frame() {
    let reply = AssistantReply {
        content: None,
        tool_call: Some(FunctionCall {
            name: "generate_chart".to_string(),
            arguments:
                r#"{"chartType":"bar","title":"销量","seriesData":[{"name":"S","data":[1,2,3]}]}"#
                    .to_string(),
        }),
    };
    let backend = FakeBackend::new(FakeCompletion::Reply(reply), &[]);
    let (frames, backend) = run(backend, "画一个销量柱状图").await;

    assert_terminated(&frames);
    assert_eq!(frames.len(), 2);
    let chart = payload(&frames[0]);
    assert_eq!(chart["type"], "chart");
    assert_eq!(chart["description"], "图表已生成");
    assert_eq!(chart["chartOption"]["series"][0]["type"], "bar");
    assert_eq!(
        chart["chartOption"]["xAxis"]["data"],
        serde_json::json!(["项目1", "项目2", "项目3"])
    );

    assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tool_mode_without_tool_call_falls_back_to_text() {
    let reply = AssistantReply {
        content: Some("这里没有可用的数据".to_string()),
        tool_call: None,
    };
    let backend = FakeBackend::new(FakeCompletion::Reply(reply), &[]);
    let (frames, backend) = run(backend, "帮我画一个图表").await;

    assert_terminated(&frames);
    assert_eq!(frames.len(), 2);
    assert_eq!(payload(&frames[0])["content"], "这里没有可用的数据");
    assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unrecognized_tool_without_text_restreams_instead_of_erroring() {
    let reply = AssistantReply {
        content: None,
        tool_call: Some(FunctionCall {
            name: "delete_everything".to_string(),
            arguments: "{}".to_string(),
        }),
    };
    let backend = FakeBackend::new(FakeCompletion::Reply(reply), &["流式", "回退"]);
    let (frames, backend) = run(backend, "生成图表").await;

    assert_terminated(&frames);
    let contents: Vec<String> = frames[..frames.len() - 1]
        .iter()
        .map(|f| payload(f)["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, vec!["流式", "回退"]);
    assert_eq!(backend.complete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn buffered_upstream_failure_emits_one_error_notice() {
    let backend = FakeBackend::new(
        FakeCompletion::Fail {
            status: 500,
            message: "internal".to_string(),
        },
        &[],
    );
    let (frames, _) = run(backend, "画一个饼图").await;

    assert_terminated(&frames);
    assert_eq!(frames.len(), 2);
    let error = payload(&frames[0]);
    let message = error["error"].as_str().unwrap();
    assert!(message.contains("status=500"), "got: {message}");
}

#[tokio::test]
async fn mid_stream_failure_emits_error_after_partial_output() {
    let mut backend = FakeBackend::streaming_only(&["部分"]);
    backend.fail_mid_stream = true;
    let (frames, _) = run(backend, "讲个故事").await;

    assert_terminated(&frames);
    assert_eq!(frames.len(), 3);
    assert_eq!(payload(&frames[0])["content"], "部分");
    assert!(payload(&frames[1])["error"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
}

#[tokio::test]
async fn invalid_chart_arguments_are_terminal() {
    let reply = AssistantReply {
        content: None,
        tool_call: Some(FunctionCall {
            name: "generate_chart".to_string(),
            arguments: "{broken".to_string(),
        }),
    };
    let backend = FakeBackend::new(FakeCompletion::Reply(reply), &[]);
    let (frames, backend) = run(backend, "画一个折线图").await;

    assert_terminated(&frames);
    assert_eq!(frames.len(), 2);
    assert!(payload(&frames[0])["error"]
        .as_str()
        .unwrap()
        .contains("Invalid chart arguments"));
    // Schema violations never fall back to the plain stream
    assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
}

//! Integration tests against a fake Ollama server (axum on a free port).
//! `/api/chat` answers "reply N" (N = request count), or a fenced JSON object when the prompt
//! carries format instructions; `stream: true` gets NDJSON. Requests are recorded.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use modekit::config::{ConfigManager, SchemaField};
use modekit::modes::{run_mode, Mode, ModeError, ModeOptions};
use modekit::processing::{ProcessError, TextProcessor};
use modekit::prompt::{PromptInput, TemplateVars};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

type Recorded = Arc<Mutex<Vec<Value>>>;

const REVIEW_JSON: &str =
    "```json\n{\"gift\": true, \"delivery_days\": 2, \"price_value\": \"worth it for the extra features\"}\n```";

async fn chat(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Response {
    let n = {
        let mut r = recorded.lock().unwrap();
        r.push(body.clone());
        r.len()
    };
    let prompt = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    let reply = if prompt.contains("```json") {
        REVIEW_JSON.to_string()
    } else {
        format!("reply {}", n)
    };

    if body["stream"].as_bool() == Some(true) {
        let (head, tail) = reply.split_at(reply.len() / 2);
        let lines = [
            json!({"message": {"role": "assistant", "content": head}, "done": false}),
            json!({"message": {"role": "assistant", "content": tail}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true}),
        ];
        let ndjson = lines.iter().map(|l| format!("{}\n", l)).collect::<String>();
        return ([(header::CONTENT_TYPE, "application/x-ndjson")], ndjson).into_response();
    }
    Json(json!({"message": {"role": "assistant", "content": reply}, "done": true})).into_response()
}

async fn tags() -> Json<Value> {
    Json(json!({"models": [
        {"name": "gemma3:12b", "size": 8_100_000_000u64},
        {"name": "qwen3:8b"}
    ]}))
}

/// Start the fake server; returns its base URL and the request log.
async fn start_fake_ollama() -> (String, Recorded) {
    let recorded: Recorded = Arc::default();
    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/api/tags", get(tags))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), recorded)
}

/// Bundled config pointed at the fake server.
fn config_for(base_url: &str) -> ConfigManager {
    let mut config =
        ConfigManager::from_yaml_str(modekit::init::default_config()).expect("bundled config");
    let model = &mut config.config_mut().model;
    model.base_url = Some(base_url.to_string());
    model.max_retries = 0;
    config
}

fn last_prompt(recorded: &Recorded) -> String {
    let r = recorded.lock().unwrap();
    r.last()
        .and_then(|b| b["messages"].as_array())
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn generate_sends_model_options_and_one_shot_prompt() {
    let (url, recorded) = start_fake_ollama().await;
    let mut config = config_for(&url);
    config.config_mut().model.temperature = 0.5;
    config.config_mut().model.top_k = Some(40);
    let processor = TextProcessor::new(config);

    let reply = processor
        .generate(PromptInput::Empty, &TemplateVars::new())
        .await
        .unwrap();
    assert_eq!(reply, "reply 1");

    let body = recorded.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "gemma3:12b");
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["temperature"], 0.5);
    assert_eq!(body["options"]["top_k"], 40);
    assert_eq!(
        body["messages"][0],
        json!({"role": "user", "content": "Give me one fun fact about octopuses."})
    );
}

#[tokio::test]
async fn translate_fills_template_from_example_and_arguments() {
    let (url, recorded) = start_fake_ollama().await;
    let processor = TextProcessor::new(config_for(&url));

    processor.translate(None, None, None).await.unwrap();
    let prompt = last_prompt(&recorded);
    assert!(prompt.starts_with("Translate the text that is delimited by triple backticks"));
    assert!(prompt.contains("American English in a calm and respectful tone"));
    assert!(prompt.contains("```Arrr, I be fuming"));

    processor
        .translate(Some("pirate"), Some("Good morning"), Some("a sea shanty"))
        .await
        .unwrap();
    let prompt = last_prompt(&recorded);
    assert!(prompt.contains("a style that is a sea shanty"));
    assert!(prompt.contains("```Good morning```"));
}

#[tokio::test]
async fn extract_review_info_parses_structured_reply() {
    let (url, recorded) = start_fake_ollama().await;
    let processor = TextProcessor::new(config_for(&url));

    let info = processor
        .extract_review_info(Some("Arrived in two days, a gift for my wife."))
        .await
        .unwrap();
    assert_eq!(info["gift"], true);
    assert_eq!(info["delivery_days"], 2);

    let prompt = last_prompt(&recorded);
    assert!(prompt.contains("text: Arrived in two days, a gift for my wife."));
    assert!(prompt.contains("\t\"delivery_days\": integer  // How many days"));
}

#[tokio::test]
async fn prompt_mode_prints_all_three_results() {
    let (url, _recorded) = start_fake_ollama().await;
    let config = config_for(&url);
    let mut output = Vec::new();
    run_mode(
        Mode::Prompt,
        &config,
        &ModeOptions::default(),
        &mut std::io::empty(),
        &mut output,
    )
    .await
    .unwrap();

    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("Simple completion:\nreply 1"));
    assert!(text.contains("Templated completion (translation):\nreply 2"));
    assert!(text.contains("Extracted information from product review:\ngift: true\ndelivery_days: 2\n"));
    assert!(text.contains("price_value: worth it for the extra features"));
}

#[tokio::test]
async fn chat_mode_streams_and_remembers() {
    let (url, recorded) = start_fake_ollama().await;
    let mut config = config_for(&url);
    config.config_mut().model.stream = true;
    let mut input = std::io::Cursor::new(b"Hi, I'm Ferris\n\nWhat is my name?\nexit\n".to_vec());
    let mut output = Vec::new();
    let options = ModeOptions {
        memory: Some("window".to_string()),
        demo: false,
    };
    run_mode(Mode::Chat, &config, &options, &mut input, &mut output)
        .await
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    assert!(text.starts_with("Chatting with gemma3:12b (window memory)."));
    assert!(text.contains("You: AI: reply 1\n"));
    assert!(text.contains("You: AI: reply 2\n"));

    let r = recorded.lock().unwrap();
    assert_eq!(r.len(), 2);
    assert_eq!(r[1]["stream"], true);
    let second = r[1]["messages"][0]["content"].as_str().unwrap();
    assert!(second.contains("Human: Hi, I'm Ferris\nAI: reply 1\nHuman: What is my name?\nAI:"));
}

#[tokio::test]
async fn memory_demo_walks_every_strategy() {
    let (url, _recorded) = start_fake_ollama().await;
    let config = config_for(&url);
    let options = ModeOptions {
        memory: None,
        demo: true,
    };
    let mut output = Vec::new();
    run_mode(Mode::Chat, &config, &options, &mut std::io::empty(), &mut output)
        .await
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    for label in ["Buffer memory:", "Window memory:", "Token memory:", "Summary memory:"] {
        assert!(text.contains(label), "missing {} in:\n{}", label, text);
    }
    assert!(text.contains("Response: reply 3"));
    assert!(text.contains("Human: Chatbots are what?"));
    assert!(text.contains("Response about demo: reply"));
}

#[tokio::test]
async fn list_models_reads_tags() {
    let (url, _recorded) = start_fake_ollama().await;
    let processor = TextProcessor::new(config_for(&url));
    let models = processor.llm_client().list_models().await.unwrap();
    let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["gemma3:12b", "qwen3:8b"]);
    assert_eq!(models[0].size, Some(8_100_000_000));
    assert_eq!(models[1].size, None);
}

#[tokio::test]
async fn extract_uses_default_schema_name_when_example_has_none() {
    let (url, recorded) = start_fake_ollama().await;
    let mut config = config_for(&url);
    {
        let c = config.config_mut();
        c.defaults.schema_name = "review_v2".to_string();
        c.schemas.clear();
        c.schemas.insert(
            "review_v2".to_string(),
            vec![SchemaField::new("delivery_days", "How many days until it arrived?")],
        );
        for example in c.examples.get_mut("extract").into_iter().flatten() {
            example.schema = None;
        }
    }
    let processor = TextProcessor::new(config);

    let info = processor.extract(None, None).await.unwrap();
    assert_eq!(info["delivery_days"], 2);
    let prompt = last_prompt(&recorded);
    assert!(prompt.contains("\t\"delivery_days\": string  // How many days until it arrived?"));
    assert!(!prompt.contains("\"gift\""));
}

#[tokio::test]
async fn prompt_mode_reports_missing_review_source() {
    let (url, recorded) = start_fake_ollama().await;
    let mut config = config_for(&url);
    config.config_mut().examples.remove("extract");
    let mut output = Vec::new();
    run_mode(
        Mode::Prompt,
        &config,
        &ModeOptions::default(),
        &mut std::io::empty(),
        &mut output,
    )
    .await
    .unwrap();

    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("Templated completion (translation):\nreply 2"));
    assert!(text.ends_with("Error: 'product_review' source not found in configuration.\n"));
    assert!(!text.contains("Extracted information"));
    assert_eq!(recorded.lock().unwrap().len(), 2);
}

/// Accepts everything except the given chunk, which fails as a closed pipe.
struct ClosesOn {
    chunk: &'static [u8],
    written: Vec<u8>,
}

impl Write for ClosesOn {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf == self.chunk {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn chat_mode_stops_when_streamed_output_fails() {
    let (url, recorded) = start_fake_ollama().await;
    let mut config = config_for(&url);
    config.config_mut().model.stream = true;
    let mut input = std::io::Cursor::new(b"hello\nstill there?\nexit\n".to_vec());
    // "reply 1" arrives as "rep" + "ly 1".
    let mut output = ClosesOn {
        chunk: b"ly 1",
        written: Vec::new(),
    };
    let err = run_mode(
        Mode::Chat,
        &config,
        &ModeOptions::default(),
        &mut input,
        &mut output,
    )
    .await
    .unwrap_err();

    assert!(
        matches!(&err, ModeError::Process(ProcessError::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe),
        "{}",
        err
    );
    assert!(String::from_utf8(output.written).unwrap().ends_with("AI: rep"));
    assert_eq!(recorded.lock().unwrap().len(), 1);
}

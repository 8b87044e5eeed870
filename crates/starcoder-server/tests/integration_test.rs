use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use starcoder_engine::{Engine, EvalContext, Hyperparameters, Result, StarcoderError, TokenId};
use starcoder_models::{ReferenceConfig, ReferenceEngine};
use starcoder_runtime::{DriverConfig, Model, RequestService, StopPolicy};
use starcoder_server::{create_router, AppState, ServerConfig};
use starcoder_tokenizer::Vocabulary;
use tower::ServiceExt;

const GENERATE: &str = "/v1/starcoder/generate";

const FRAGMENTS: [&str; 12] = [
    "<|endoftext|>",
    "def",
    " add",
    "(",
    "a",
    ",",
    " b",
    "):",
    "\n",
    "    ",
    "return",
    " +",
];

fn hparams(n_vocab: usize, n_ctx: usize) -> Hyperparameters {
    Hyperparameters {
        n_vocab,
        n_ctx,
        n_embd: 32,
        n_head: 4,
        n_layer: 1,
        ftype: 1,
    }
}

fn app_with(engine: Box<dyn Engine>, vocab: Vocabulary) -> Router {
    let stop = StopPolicy::resolve(&vocab, &[]).unwrap();
    let model = Model::new(engine, vocab, stop);
    let service = RequestService::new(model.into(), DriverConfig::default()).with_base_seed(1);
    create_router(AppState::new(service, ServerConfig::default()))
}

fn reference_app(n_ctx: usize) -> Router {
    let engine = ReferenceEngine::new(hparams(FRAGMENTS.len(), n_ctx), ReferenceConfig::default())
        .unwrap();
    app_with(Box::new(engine), Vocabulary::from_fragments(FRAGMENTS))
}

/// Puts all mass on the id after the last token; can be told to fail.
struct NextToken {
    hparams: Hyperparameters,
    fail: bool,
}

impl EvalContext for NextToken {
    fn evaluate(&mut self, _position: usize, tokens: &[TokenId]) -> Result<Vec<f32>> {
        if self.fail {
            return Err(StarcoderError::EngineFailure("device lost".into()));
        }
        let n_vocab = self.hparams.n_vocab;
        let mut logits = vec![0.0; n_vocab];
        let last = tokens.last().copied().unwrap_or(0) as usize;
        logits[(last + 1) % n_vocab] = 10.0;
        Ok(logits)
    }
}

impl Engine for NextToken {
    fn hyperparameters(&self) -> &Hyperparameters {
        &self.hparams
    }

    fn context(&self) -> Result<Box<dyn EvalContext + '_>> {
        Ok(Box::new(NextToken {
            hparams: self.hparams,
            fail: self.fail,
        }))
    }
}

fn mock_app(n_vocab: usize, fail: bool) -> Router {
    let engine = NextToken {
        hparams: hparams(n_vocab, 64),
        fail,
    };
    app_with(Box::new(engine), Vocabulary::from_fragments(FRAGMENTS))
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    raw_request(uri, serde_json::to_string(&body).unwrap())
}

fn raw_request(uri: &str, body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

async fn generate_text_at(app: Router, uri: &str, body: Value) -> String {
    let (status, body) = send(app, json_request(uri, body)).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let json: Value = serde_json::from_str(&body).unwrap();
    json["text"].as_str().unwrap().to_string()
}

async fn generate_text(app: Router, body: Value) -> String {
    generate_text_at(app, GENERATE, body).await
}

// -- Health endpoint --

#[tokio::test]
async fn health_reports_model_shape() {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(reference_app(64), req).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model"]["family"], "starcoder");
    assert_eq!(json["model"]["context_length"], 64);
    assert_eq!(json["model"]["vocab_size"], FRAGMENTS.len());
    assert_eq!(json["model"]["layer_count"], 1);
}

// -- Generation --

#[tokio::test]
async fn greedy_generation_is_deterministic() {
    let app = reference_app(64);
    let body = json!({"prompt": "def add(a, b):", "n_predict": 5, "top_k": 1});

    let first = generate_text(app.clone(), body.clone()).await;
    let second = generate_text(app, body).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn next_token_engine_continues_the_vocabulary() {
    // "def" (1) → " add" (2) → "(" (3) → "a" (4)
    let text = generate_text(
        mock_app(FRAGMENTS.len(), false),
        json!({"prompt": "def", "n_predict": 3, "top_k": 1}),
    )
    .await;
    assert_eq!(text, " add(a");
}

#[tokio::test]
async fn end_of_text_is_kept_in_the_output() {
    // " +" (11) wraps to <|endoftext|> (0), which stops generation.
    let text = generate_text(
        mock_app(FRAGMENTS.len(), false),
        json!({"prompt": "return +", "n_predict": 10, "top_k": 1}),
    )
    .await;
    assert_eq!(text, "<|endoftext|>");
}

#[tokio::test]
async fn empty_prompt_with_zero_budget_returns_empty_text() {
    let text = generate_text(reference_app(64), json!({"prompt": "", "n_predict": 0})).await;
    assert_eq!(text, "");
}

#[tokio::test]
async fn explicit_seed_reproduces_sampled_text() {
    let app = reference_app(64);
    let body = json!({
        "prompt": "def",
        "n_predict": 8,
        "top_k": 12,
        "top_p": 1.0,
        "temp": 1.5,
        "seed": 99
    });

    let first = generate_text(app.clone(), body.clone()).await;
    let second = generate_text(app, body).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn concurrent_requests_match_isolated_runs() {
    let app = reference_app(64);
    let a = json!({"prompt": "def add(a, b):", "n_predict": 6, "top_k": 1});
    let b = json!({"prompt": "return a", "n_predict": 6, "top_k": 1});

    let alone_a = generate_text(app.clone(), a.clone()).await;
    let alone_b = generate_text(app.clone(), b.clone()).await;

    let (together_a, together_b) = tokio::join!(
        generate_text(app.clone(), a),
        generate_text(app, b)
    );
    assert_eq!(together_a, alone_a);
    assert_eq!(together_b, alone_b);
}

// -- Rejections --

#[tokio::test]
async fn missing_prompt_is_a_plain_text_400() {
    let resp = mock_app(FRAGMENTS.len(), false)
        .oneshot(json_request(GENERATE, json!({"n_predict": 4})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"), "{content_type}");

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"missing prompt field");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let (status, body) = send(
        mock_app(FRAGMENTS.len(), false),
        raw_request(GENERATE, "{\"prompt\": "),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("invalid request body"), "{body}");
}

#[tokio::test]
async fn wrongly_typed_field_is_rejected() {
    let (status, _) = send(
        mock_app(FRAGMENTS.len(), false),
        json_request(GENERATE, json!({"prompt": "def", "top_k": "many"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_sampling_parameters_are_rejected() {
    let cases = [
        json!({"prompt": "def", "top_k": 0}),
        json!({"prompt": "def", "top_p": 0.0}),
        json!({"prompt": "def", "top_p": 1.5}),
        json!({"prompt": "def", "temp": 0.0}),
        json!({"prompt": "def", "n_predict": -1}),
    ];
    for case in cases {
        let (status, body) = send(
            mock_app(FRAGMENTS.len(), false),
            json_request(GENERATE, case.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
        assert!(body.starts_with("invalid input"), "{case}: {body}");
    }
}

#[tokio::test]
async fn prompt_filling_the_context_is_rejected() {
    // Four tokens in a four-token context leave no room to generate.
    let (status, body) = send(
        reference_app(4),
        json_request(GENERATE, json!({"prompt": "def add(a", "n_predict": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("context"), "{body}");
}

#[tokio::test]
async fn engine_failure_is_reported() {
    let (status, body) = send(
        mock_app(FRAGMENTS.len(), true),
        json_request(GENERATE, json!({"prompt": "def", "n_predict": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("failed to predict"), "{body}");
}

#[tokio::test]
async fn id_outside_the_vocabulary_is_a_decode_failure() {
    // The engine scores one more id than the vocabulary holds: " +" (11) → 12.
    let (status, body) = send(
        mock_app(FRAGMENTS.len() + 1, false),
        json_request(GENERATE, json!({"prompt": " +", "n_predict": 1, "top_k": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "failed to decode token: 12");
}

#[tokio::test]
async fn unknown_family_route_is_not_found() {
    let (status, _) = send(
        mock_app(FRAGMENTS.len(), false),
        json_request("/v1/llama/generate", json!({"prompt": "def"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn custom_family_sets_the_route() {
    let engine = NextToken {
        hparams: hparams(FRAGMENTS.len(), 64),
        fail: false,
    };
    let vocab = Vocabulary::from_fragments(FRAGMENTS);
    let stop = StopPolicy::resolve(&vocab, &[]).unwrap();
    let service = RequestService::new(
        Model::new(Box::new(engine), vocab, stop).into(),
        DriverConfig::default(),
    );
    let app = create_router(AppState::new(
        service,
        ServerConfig {
            family: "santacoder".into(),
        },
    ));

    let text = generate_text_at(
        app,
        "/v1/santacoder/generate",
        json!({"prompt": "def", "n_predict": 1, "top_k": 1}),
    )
    .await;
    assert_eq!(text, " add");
}

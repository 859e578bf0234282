//! HTTP embedding providers against a mock server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use safesteps::config::EmbeddingConfig;
use safesteps::embedding::{OllamaEmbedder, OpenAIEmbedder};
use safesteps::safesteps_core::embedding::TextEmbedder;

fn embedding_config(provider: &str, server: &MockServer, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: provider.to_string(),
        model: Some("test-model".to_string()),
        dims: Some(3),
        max_retries,
        timeout_secs: 5,
        url: Some(server.uri()),
        ..EmbeddingConfig::default()
    }
}

#[tokio::test]
async fn test_openai_embeds_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "input": ["Driver Inattention/Distraction"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config("openai", &server, 0), "test-key").unwrap();
    assert_eq!(embedder.model_name(), "test-model");
    assert_eq!(embedder.dims(), 3);

    let v = embedder.embed("Driver Inattention/Distraction").await.unwrap();
    assert_eq!(v, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn test_openai_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0, 0.0] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config("openai", &server, 1), "test-key").unwrap();
    let v = embedder.embed("Unsafe Speed").await.unwrap();
    assert_eq!(v, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_openai_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config("openai", &server, 3), "test-key").unwrap();
    let err = embedder.embed("Unsafe Speed").await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("400"), "unexpected error: {}", message);
    assert!(message.contains("bad input"));
}

#[tokio::test]
async fn test_openai_malformed_response_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config("openai", &server, 0), "test-key").unwrap();
    assert!(embedder.embed("Unsafe Speed").await.is_err());
}

#[tokio::test]
async fn test_ollama_embeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "embeddings": [[0.5, 0.25, 0.125]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&embedding_config("ollama", &server, 0)).unwrap();
    let v = embedder.embed("Failure to Yield Right-of-Way").await.unwrap();
    assert_eq!(v, vec![0.5, 0.25, 0.125]);
}

#[tokio::test]
async fn test_ollama_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(2)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&embedding_config("ollama", &server, 1)).unwrap();
    let err = embedder.embed("Unsafe Speed").await.unwrap_err();
    assert!(format!("{:#}", err).contains("429"));
}

use chat_backend_http::headers::{
    build_headers, header_map, HEADER_ACCEPT, HEADER_AUTHORIZATION, HEADER_CONTENT_TYPE,
    HEADER_USER_AGENT,
};
use chat_backend_http::{HttpBackendConfig, HttpBackendError};

#[test]
fn header_map_contains_stream_headers() {
    let config = HttpBackendConfig::default()
        .with_access_token(" secret ")
        .insert_header("X-Trace", " abc ");

    let headers = build_headers(&config);

    assert_eq!(
        headers.get(HEADER_AUTHORIZATION).expect("authorization"),
        "Bearer secret"
    );
    assert_eq!(
        headers.get(HEADER_ACCEPT).expect("accept"),
        "text/event-stream"
    );
    assert_eq!(
        headers.get(HEADER_CONTENT_TYPE).expect("content-type"),
        "application/json"
    );
    assert_eq!(headers.get("x-trace").expect("custom"), "abc");
}

#[test]
fn blank_token_omits_authorization() {
    let config = HttpBackendConfig::default().with_access_token("   ");
    assert!(!build_headers(&config).contains_key(HEADER_AUTHORIZATION));
}

#[test]
fn header_map_prefers_configured_user_agent() {
    let config = HttpBackendConfig::default().with_user_agent("test-agent");
    let headers = build_headers(&config);
    assert_eq!(
        headers.get(HEADER_USER_AGENT).expect("user-agent"),
        "test-agent"
    );

    let default_agent = build_headers(&HttpBackendConfig::default());
    assert!(default_agent
        .get(HEADER_USER_AGENT)
        .expect("user-agent")
        .starts_with("chat_stream/"));
}

#[test]
fn invalid_header_values_are_rejected() {
    let config = HttpBackendConfig::default().insert_header("x-bad", "line\nbreak");
    assert!(matches!(
        header_map(&config),
        Err(HttpBackendError::InvalidHeader(_))
    ));
}

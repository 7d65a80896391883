//! Integration tests for the HTTP client

mod common;

use common::{html, test_options};
use sqlspider::http::HttpClient;
use sqlspider::models::HttpMethod;
use sqlspider::SpiderError;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_get_captures_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .respond_with(html("<html><body>hello</body></html>").insert_header("X-Frame-Options", "DENY"))
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    let resp = client.get(&format!("{}/index.php", server.uri())).await.unwrap();

    assert_eq!(resp.status, 200);
    assert!(resp.is_html());
    assert_eq!(resp.header("x-frame-options"), Some("DENY"));
    assert!(resp.body.contains("hello"));
    assert_eq!(client.request_count(), 1);
}

#[tokio::test]
async fn test_post_form_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("user=admin&pass=a%27+b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    let params = vec![
        ("user".to_string(), "admin".to_string()),
        ("pass".to_string(), "a' b".to_string()),
    ];
    let resp = client
        .request(&format!("{}/login", server.uri()), HttpMethod::Post, Some(params.as_slice()), &[], None)
        .await
        .unwrap();
    assert_eq!(resp.body, "ok");
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("new"))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    let resp = client.get(&format!("{}/old", server.uri())).await.unwrap();
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("location"), Some("/new"));
}

fn cookie_header(req: &wiremock::Request) -> Option<String> {
    req.headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_session_cookie_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "PHPSESSID=abc123; Path=/; HttpOnly"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "PHPSESSID=abc123"))
        .respond_with(html("welcome back"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    client.get(&format!("{}/login", server.uri())).await.unwrap();
    let resp = client.get(&format!("{}/account", server.uri())).await.unwrap();
    assert_eq!(resp.body, "welcome back");
}

#[tokio::test]
async fn test_session_cookie_stays_on_its_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "session=secret; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pixel"))
        .respond_with(html("ok"))
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    client.get(&format!("{}/login", server.uri())).await.unwrap();
    // Same listener reached under another host name
    let port = server.address().port();
    client.get(&format!("http://localhost:{port}/pixel")).await.unwrap();
    client.get(&format!("{}/pixel", server.uri())).await.unwrap();

    let requests = server.received_requests().await.unwrap_or_default();
    let pixel: Vec<Option<String>> = requests
        .iter()
        .filter(|r| r.url.path() == "/pixel")
        .map(cookie_header)
        .collect();
    assert_eq!(pixel, vec![None, Some("session=secret".to_string())]);
}

#[tokio::test]
async fn test_expired_cookie_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "session=secret; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "session=; Path=/; Max-Age=0"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(html("please log in"))
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    for page in ["/login", "/logout", "/account"] {
        client.get(&format!("{}{page}", server.uri())).await.unwrap();
    }

    let requests = server.received_requests().await.unwrap_or_default();
    let account = requests
        .iter()
        .find(|r| r.url.path() == "/account")
        .expect("account request");
    assert_eq!(cookie_header(account), None);
}

#[tokio::test]
async fn test_per_request_cookies_replace_stored_ones() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "session=secret; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "session=other"))
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .respond_with(html("switched"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::from_options(&test_options(&server.uri())).unwrap();
    client.get(&format!("{}/login", server.uri())).await.unwrap();
    let extra = vec![("X-Requested-With".to_string(), "XMLHttpRequest".to_string())];
    let resp = client
        .request(
            &format!("{}/account", server.uri()),
            HttpMethod::Get,
            None,
            &extra,
            Some("session=other"),
        )
        .await
        .unwrap();
    assert_eq!(resp.body, "switched");
}

#[tokio::test]
async fn test_custom_headers_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("X-Api-Key", "secret"))
        .and(header("user-agent", "SQLi-Spider-Test/0.1"))
        .respond_with(html("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = test_options(&server.uri());
    options.headers.insert("X-Api-Key".to_string(), "secret".to_string());
    let client = HttpClient::from_options(&options).unwrap();
    let resp = client.get(&server.uri()).await.unwrap();
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn test_timeout_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("late").set_delay(std::time::Duration::from_millis(1500)))
        .mount(&server)
        .await;

    let mut options = test_options(&server.uri());
    options.timeout_ms = 300;
    let client = HttpClient::from_options(&options).unwrap();
    let err = client.get(&server.uri()).await.unwrap_err();
    assert!(matches!(err, SpiderError::Timeout(300)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_network() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = HttpClient::from_options(&test_options("http://127.0.0.1/")).unwrap();
    let err = client.get(&format!("http://127.0.0.1:{port}/")).await.unwrap_err();
    assert!(matches!(err, SpiderError::Network(_)));
    assert!(err.is_connection());
}

//! Integration tests for process execution through the router facade

#![cfg(unix)]

mod common;

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{get, SiteFixture, HELLO_SCRIPT};
use exec_router::config::{MemoryUnit, RouterConfig};
use exec_router::message::DEFAULT_CONTENT_TYPE;
use exec_router::{ErrorKind, HttpMethod, Request};

/// Saves the raw request in storage and answers with its own pid
const RECORDING_SCRIPT: &str = r#"cat > "$ROUTE_STORAGE_PATH/request-$ROUTE_INVOCATION_ID.json"
echo "$ROUTE_INVOCATION_ID" >> "$ROUTE_STORAGE_PATH/sessions"
printf '{"status":200,"body":"%s"}' "$$""#;

#[tokio::test]
async fn test_hello_end_to_end() {
    let site = SiteFixture::new();
    site.add_route("hello", HELLO_SCRIPT);
    let router = site.router();

    let response = router.handle(get("/hello")).await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"<html><body>Hello</body></html>");
    assert_eq!(response.content_type(), DEFAULT_CONTENT_TYPE);

    let stats = router.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.by_route["/hello"].invocations, 1);
}

#[tokio::test]
async fn test_child_receives_request_and_context() {
    let site = SiteFixture::new();
    site.add_route("hello", RECORDING_SCRIPT);
    let router = site.router();

    let request = Request::builder(HttpMethod::POST, "/hello")
        .header("X-Trace", "abc")
        .query_param("q", "rust")
        .body("name=world")
        .build()
        .expect("Failed to build request");
    let invocation_id = request.invocation_id();

    let response = router.handle(request).await;
    assert_eq!(response.status(), 200);

    let storage_dirs: Vec<_> = fs::read_dir(site.storage.path().join("data"))
        .expect("Storage root exists")
        .map(|e| e.expect("Readable entry").path())
        .collect();
    assert_eq!(storage_dirs.len(), 1);

    let recorded = fs::read_to_string(storage_dirs[0].join(format!("request-{}.json", invocation_id)))
        .expect("Route recorded its input");
    let payload: serde_json::Value = serde_json::from_str(recorded.trim()).expect("Input is JSON");

    assert_eq!(payload["method"], "POST");
    assert_eq!(payload["path"], "/hello");
    assert_eq!(payload["headers"]["x-trace"], "abc");
    assert_eq!(payload["query"]["q"], "rust");
    assert_eq!(payload["body"], "name=world");
    assert_eq!(payload["bodyEncoding"], "utf8");
    assert_eq!(payload["invocationId"], invocation_id.to_string());
    assert_eq!(payload["context"]["routePath"], "/hello");

    let global_shared = site.root().canonicalize().expect("Canonical root").join("shared");
    let resource_paths = payload["context"]["resourcePaths"].as_array().expect("List of paths");
    assert_eq!(resource_paths.len(), 1);
    assert_eq!(resource_paths[0], &*global_shared.to_string_lossy());
    assert_eq!(
        payload["context"]["storagePath"],
        &*storage_dirs[0].canonicalize().expect("Canonical storage").to_string_lossy()
    );
}

#[tokio::test]
async fn test_timeout_kills_child() {
    let site = SiteFixture::new();
    site.add_route("slow", "echo $$ > \"$ROUTE_STORAGE_PATH/pid\"\nexec sleep 30");
    let config = RouterConfig::builder()
        .site_root(site.root())
        .storage_root(site.storage.path().join("data"))
        .timeout(Duration::from_millis(500))
        .build()
        .expect("Failed to build config");
    let router = site.router_with(config);

    let started = Instant::now();
    let response = router.handle(get("/slow")).await;

    assert_eq!(response.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!String::from_utf8_lossy(response.body()).contains("sleep"));

    let storage = fs::read_dir(site.storage.path().join("data"))
        .expect("Storage root exists")
        .next()
        .expect("Route storage created")
        .expect("Readable entry")
        .path();
    let pid = fs::read_to_string(storage.join("pid")).expect("Route wrote its pid");

    #[cfg(target_os = "linux")]
    assert!(
        !std::path::Path::new(&format!("/proc/{}", pid.trim())).exists(),
        "child {} still running after timeout",
        pid.trim()
    );
    #[cfg(not(target_os = "linux"))]
    let _ = pid;

    assert_eq!(router.stats().by_outcome[ErrorKind::ProcessTimeout.as_str()], 1);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_descendants() {
    let site = SiteFixture::new();
    site.add_route(
        "spawner",
        "sleep 30 &\necho $! > \"$ROUTE_STORAGE_PATH/grandchild\"\nwait",
    );
    let config = RouterConfig::builder()
        .site_root(site.root())
        .storage_root(site.storage.path().join("data"))
        .timeout(Duration::from_millis(500))
        .build()
        .expect("Failed to build config");
    let router = site.router_with(config);

    assert_eq!(router.handle(get("/spawner")).await.status(), 504);

    let pid = common::read_storage_file(&site, "grandchild").expect("Route wrote the grandchild pid");
    assert!(
        common::eventually(Duration::from_secs(2), || !common::process_running(&pid)).await,
        "grandchild {} survived the timeout",
        pid.trim()
    );
}

#[tokio::test]
async fn test_oversized_single_write_is_rejected() {
    let site = SiteFixture::new();
    site.add_route("burst", r#"exec printf '%s%20000s' '{"status":200}' ''"#);
    let config = RouterConfig::builder()
        .site_root(site.root())
        .storage_root(site.storage.path().join("data"))
        .max_output(4u64.kb())
        .build()
        .expect("Failed to build config");
    let router = site.router_with(config);

    for _ in 0..100 {
        assert_eq!(router.handle(get("/burst")).await.status(), 502);
    }
    assert_eq!(router.stats().by_outcome[ErrorKind::MalformedOutput.as_str()], 100);
}

#[tokio::test]
async fn test_environment_allowlist() {
    let site = SiteFixture::new();
    site.add_route(
        "env",
        r#"cat > /dev/null
printf '{"status":200,"body":"%s|%s|%s"}' "$EXEC_ROUTER_VISIBLE" "$EXEC_ROUTER_HIDDEN" "$ROUTE_METHOD""#,
    );
    // SAFETY: no other test in this binary reads these variables
    unsafe {
        std::env::set_var("EXEC_ROUTER_VISIBLE", "shown");
        std::env::set_var("EXEC_ROUTER_HIDDEN", "leaked");
    }

    let config = RouterConfig::builder()
        .site_root(site.root())
        .storage_root(site.storage.path().join("data"))
        .env_vars(&["PATH", "EXEC_ROUTER_VISIBLE"])
        .build()
        .expect("Failed to build config");
    let router = site.router_with(config);

    let response = router.handle(get("/env")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"shown||GET");
}

#[tokio::test]
async fn test_failure_statuses() {
    let site = SiteFixture::new();
    site.add_route("garbage", "echo '<html>not a response</html>'");
    site.add_route("crash", "printf '{\"status\":200}'\necho 'secret detail /etc/shadow' >&2\nexit 1");
    site.add_route("empty", "exit 0");
    site.add_file("plain", "not executable");
    let router = site.router();

    let garbage = router.handle(get("/garbage")).await;
    assert_eq!(garbage.status(), 502);

    // Non-zero exit wins even when the output parses
    let crash = router.handle(get("/crash")).await;
    assert_eq!(crash.status(), 500);
    assert!(!String::from_utf8_lossy(crash.body()).contains("secret"));

    assert_eq!(router.handle(get("/empty")).await.status(), 502);
    assert_eq!(router.handle(get("/plain")).await.status(), 500);
    assert_eq!(router.handle(get("/missing")).await.status(), 404);
    assert_eq!(router.handle(get("/shared")).await.status(), 404);

    let stats = router.stats();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.by_outcome[ErrorKind::MalformedOutput.as_str()], 2);
    assert_eq!(stats.by_outcome[ErrorKind::NonZeroExit.as_str()], 1);
    assert_eq!(stats.by_outcome[ErrorKind::ProcessSpawnFailure.as_str()], 1);
    assert_eq!(stats.by_outcome[ErrorKind::RouteNotFound.as_str()], 2);
}

#[tokio::test]
async fn test_base64_wrapped_output() {
    let site = SiteFixture::new();
    site.add_route(
        "wrapped",
        "cat > /dev/null\necho 'eyJzdGF0dXMiOjIwMCwiYm9keSI6IndyYXBwZWQifQ=='",
    );
    let router = site.router();

    let response = router.handle(get("/wrapped")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"wrapped");
}

#[tokio::test]
async fn test_route_headers_and_status_pass_through() {
    let site = SiteFixture::new();
    site.add_route(
        "api/items",
        r#"cat > /dev/null
printf '{"status":201,"headers":{"Content-Type":"application/json","X-Route":"%s"},"body":"{}"}' "$ROUTE_PATH""#,
    );
    let router = site.router();

    let response = router.handle(get("/api/items")).await;
    assert_eq!(response.status(), 201);
    assert_eq!(response.content_type(), "application/json");
    assert_eq!(response.header("x-route"), Some("/api/items"));
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    const N: usize = 8;

    let site = SiteFixture::new();
    site.add_route("counter", RECORDING_SCRIPT);
    let router = Arc::new(site.router());

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.handle(get("/counter")).await })
        })
        .collect();

    let mut pids = HashSet::new();
    for handle in handles {
        let response = handle.await.expect("Request task panicked");
        assert_eq!(response.status(), 200);
        pids.insert(String::from_utf8(response.body().to_vec()).expect("Pid is text"));
    }
    assert_eq!(pids.len(), N, "every request gets its own process");

    // One shared storage directory, N recorded sessions
    let storage_dirs: Vec<_> = fs::read_dir(site.storage.path().join("data"))
        .expect("Storage root exists")
        .collect();
    assert_eq!(storage_dirs.len(), 1);
    let storage = storage_dirs[0].as_ref().expect("Readable entry").path();

    let sessions = fs::read_to_string(storage.join("sessions")).expect("Sessions recorded");
    let ids: HashSet<_> = sessions.lines().collect();
    assert_eq!(ids.len(), N);
}

#[tokio::test]
async fn test_uncached_router_serves_routes() {
    let site = SiteFixture::new();
    site.add_route("hello", HELLO_SCRIPT);

    let mut config = site.config();
    config.routes.cache_enabled = false;
    let router = site.router_with(config);

    assert_eq!(router.handle(get("/hello")).await.status(), 200);
    assert!(router.cache_stats().is_none());
}

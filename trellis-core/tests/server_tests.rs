//! Integration tests for the request lifecycle

use http::{Method as Verb, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis_core::*;
use trellis_methods::{CachePolicy, Method, MethodOptions};

fn text(body: &'static str) -> Handler {
    Handler::new(move |_| async move { Ok(Reply::ok(body)) })
}

fn echo_params() -> Handler {
    Handler::new(|request: Request| async move { Ok(Reply::ok(request.params.to_json())) })
}

fn echo_pre() -> Handler {
    Handler::new(|request: Request| async move {
        let pre: serde_json::Map<String, Value> = request.pre.into_iter().collect();
        Ok(Reply::ok(Value::Object(pre)))
    })
}

#[tokio::test]
async fn test_routes_to_handler_with_params() {
    let mut server = Server::default();
    server
        .route(RouteDescriptor::get("/users/{id}").handler(echo_params()))
        .unwrap();

    let reply = server.inject(Verb::GET, "/users/42?verbose=1").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["id"], json!("42"));
}

#[tokio::test]
async fn test_not_found() {
    let mut server = Server::default();
    server.route(RouteDescriptor::get("/a").handler(text("a"))).unwrap();

    for (verb, url) in [(Verb::GET, "/b"), (Verb::POST, "/a"), (Verb::GET, "a"), (Verb::GET, "/%zz")] {
        let reply = server.inject(verb, url).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND, "{}", url);
        assert_eq!(reply.body["statusCode"], json!(404));
    }
}

#[tokio::test]
async fn test_wildcard_method() {
    let mut server = Server::default();
    server
        .routes([
            RouteDescriptor::new("*", "/any").handler(text("any")),
            RouteDescriptor::new("put", "/any").handler(text("put")),
        ])
        .unwrap();

    assert_eq!(server.inject(Verb::PUT, "/any").await.body, json!("put"));
    assert_eq!(server.inject(Verb::PATCH, "/any").await.body, json!("any"));
    assert_eq!(
        server.table(),
        vec![
            ("PUT".to_string(), "/any".to_string()),
            ("*".to_string(), "/any".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_case_insensitive_router_from_config() {
    let config = ServerConfig::parse(
        "[router]\ncase_sensitive = false\n",
        FileFormat::Toml,
    )
    .unwrap();
    let mut server = Server::new(config);
    server.route(RouteDescriptor::get("/Users").handler(text("users"))).unwrap();

    assert_eq!(server.inject(Verb::GET, "/users").await.status, StatusCode::OK);
    assert_eq!(server.inject(Verb::GET, "/USERS/").await.status, StatusCode::OK);
    assert!(server.route(RouteDescriptor::get("/users").handler(text("dup"))).is_err());
}

#[tokio::test]
async fn test_handler_descriptor() {
    let mut server = Server::default();
    server
        .handler("static", |options| {
            let body = options.get("body").cloned().ok_or("body is required")?;
            Ok(Handler::new(move |_| {
                let body = body.clone();
                async move { Ok(Reply::ok(body)) }
            }))
        })
        .unwrap();

    server
        .route(
            RouteDescriptor::get("/static")
                .handler(HandlerSpec::descriptor("static", json!({ "body": { "ok": true } }))),
        )
        .unwrap();
    assert_eq!(server.inject(Verb::GET, "/static").await.body, json!({ "ok": true }));

    let err = server
        .route(RouteDescriptor::get("/broken").handler(HandlerSpec::descriptor("static", json!({}))))
        .unwrap_err();
    assert!(matches!(err, RouteError::HandlerOptions { .. }));
    assert!(server.handler("static", |_| Err("again".into())).is_err());
}

#[tokio::test]
async fn test_prerequisites_use_cached_methods() {
    let generations = Arc::new(AtomicUsize::new(0));
    let counter = generations.clone();

    let mut server = Server::default();
    server
        .method(
            "user.get",
            Method::direct(move |_, args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "id": args[0], "name": "Ada" }))
            }),
            MethodOptions::new().cache(
                CachePolicy::new()
                    .expires_in(Duration::from_secs(60))
                    .generate_timeout(Duration::from_millis(100)),
            ),
        )
        .unwrap();

    server
        .route(
            RouteDescriptor::get("/users/{id}")
                .handler(echo_pre())
                .config(
                    RouteConfig::new()
                        .pre(Prerequisite::method("user.get(params.id)").unwrap().assign("user"))
                        .pre(
                            Prerequisite::function(|request: Request| async move {
                                Ok(json!(request.pre["user"]["name"].as_str().unwrap_or("").len()))
                            })
                            .assign("length"),
                        ),
                ),
        )
        .unwrap();

    for _ in 0..3 {
        let reply = server.inject(Verb::GET, "/users/7").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            reply.body,
            json!({ "user": { "id": "7", "name": "Ada" }, "length": 3 })
        );
    }
    assert_eq!(generations.load(Ordering::SeqCst), 1);

    let stats = server.methods().get("user.get").unwrap().cache().unwrap().stats();
    assert_eq!(stats.gets, 3);
    assert_eq!(stats.hits, 2);
}

#[tokio::test]
async fn test_prerequisite_failures() {
    let mut server = Server::default();
    server
        .route(
            RouteDescriptor::get("/missing")
                .handler(text("never"))
                .config(RouteConfig::new().pre(Prerequisite::method("nothing.here()").unwrap())),
        )
        .unwrap();
    server
        .route(
            RouteDescriptor::get("/denied")
                .handler(text("never"))
                .config(RouteConfig::new().pre(Prerequisite::function(|_| async {
                    Err::<Value, _>(Error::Forbidden("no access".into()))
                }))),
        )
        .unwrap();

    let reply = server.inject(Verb::GET, "/missing").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    let reply = server.inject(Verb::GET, "/denied").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["message"], json!("Forbidden: no access"));
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout_is_service_unavailable() {
    let mut server = Server::default();
    server
        .method(
            "slow",
            Method::future(|_, _| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("late"))
            }),
            MethodOptions::new().cache(
                CachePolicy::new()
                    .expires_in(Duration::from_secs(60))
                    .generate_timeout(Duration::from_millis(10)),
            ),
        )
        .unwrap();
    server
        .route(
            RouteDescriptor::get("/slow")
                .handler(echo_pre())
                .config(RouteConfig::new().pre(Prerequisite::method("slow").unwrap())),
        )
        .unwrap();

    let reply = server.inject(Verb::GET, "/slow").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let reply = server.inject(Verb::GET, "/slow").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "slow": "late" }));
}

#[tokio::test]
async fn test_extension_short_circuit_still_runs_pre_response() {
    let handled = Arc::new(AtomicUsize::new(0));
    let count = handled.clone();

    let mut server = Server::default();
    server
        .route(RouteDescriptor::get("/secret").handler(Handler::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok(Reply::ok("secret")) }
        })))
        .unwrap();

    server.ext_fn(ExtPoint::OnPreAuth, |request: &mut Request| {
        Box::pin(async move {
            if request.header("authorization").is_none() {
                return Ok::<_, Error>(Action::Reply(
                    Reply::ok("login first").with_status(StatusCode::UNAUTHORIZED),
                ));
            }
            Ok(Action::Continue)
        })
    });
    server.ext_fn(ExtPoint::OnPreResponse, |request: &mut Request| {
        Box::pin(async move {
            if let Some(response) = request.response.as_mut() {
                response.body = json!({ "wrapped": response.body.clone() });
            }
            Ok::<_, Error>(Action::Continue)
        })
    });

    let reply = server.inject(Verb::GET, "/secret").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body, json!({ "wrapped": "login first" }));
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    let reply = server
        .dispatch(Request::get("/secret").with_header("Authorization", "token"))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "wrapped": "secret" }));
    assert_eq!(handled.load(Ordering::SeqCst), 1);

    let reply = server.inject(Verb::GET, "/nowhere").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert!(reply.body.get("wrapped").is_some());
}

#[tokio::test]
async fn test_on_request_rewrites_path() {
    let mut server = Server::default();
    server.route(RouteDescriptor::get("/v2/items").handler(text("v2"))).unwrap();
    server.ext_fn(ExtPoint::OnRequest, |request: &mut Request| {
        Box::pin(async move {
            if let Some(rest) = request.path.strip_prefix("/v1/") {
                let url = format!("/v2/{}", rest);
                request.set_url(&url);
            }
            Ok::<_, Error>(Action::Continue)
        })
    });

    assert_eq!(server.inject(Verb::GET, "/v1/items").await.body, json!("v2"));
}

#[tokio::test]
async fn test_post_handler_sees_response() {
    let mut server = Server::default();
    server
        .route(RouteDescriptor::post("/items").handler(Handler::new(|request: Request| async move {
            request.json::<Value>().map(Reply::created)
        })))
        .unwrap();
    server.ext_fn(ExtPoint::OnPostHandler, |request: &mut Request| {
        Box::pin(async move {
            if let Some(response) = request.response.as_mut() {
                response.ttl = Some(Duration::from_secs(5));
            }
            Ok::<_, Error>(Action::Continue)
        })
    });

    let reply = server
        .dispatch(Request::post("/items").with_payload(json!({ "name": "pen" })))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.ttl, Some(Duration::from_secs(5)));

    let reply = server.inject(Verb::POST, "/items").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.ttl, None);
}

#[tokio::test]
async fn test_failing_extension_becomes_reply() {
    let mut server = Server::default();
    server.route(RouteDescriptor::get("/").handler(text("root"))).unwrap();
    server.ext_fn(ExtPoint::OnPreHandler, |_: &mut Request| {
        Box::pin(async { Err::<Action, _>(Error::ServiceUnavailable("maintenance".into())) })
    });

    let reply = server.inject(Verb::GET, "/").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body["error"], json!("Service Unavailable"));
}

//! End-to-end flows against an in-process bridge and stub upstreams.

use anyhow::Context as _;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use crossbridge_bridge::config::BridgeConfig;
use crossbridge_bridge::discovery::DiscoveryEngine;
use crossbridge_bridge::http::{self, AppState};
use crossbridge_bridge::registry::Registry;
use crossbridge_bridge::router::CallRouter;
use crossbridge_bridge::transport::{HttpTransport, Transport};
use crossbridge_test_support::{pick_unused_port, serve_in_background};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Stub OpenAPI service: a small pet store plus its spec document.
fn petstore_app() -> Router {
    let spec = json!({
        "openapi": "3.0.0",
        "info": {"title": "petstore", "version": "1.0.0"},
        "paths": {
            "/pets/{petId}": {
                "get": {
                    "operationId": "getPet",
                    "parameters": [
                        {"name": "petId", "in": "path", "required": true,
                         "schema": {"type": "integer"}}
                    ],
                    "responses": {"200": {"description": "OK"}}
                }
            },
            "/pets": {
                "post": {
                    "operationId": "createPet",
                    "requestBody": {"content": {"application/json": {
                        "schema": {"type": "object",
                                   "properties": {"name": {"type": "string"}}}
                    }}},
                    "responses": {"201": {"description": "Created"}}
                }
            },
            "/status": {
                "get": {
                    "operationId": "get_status",
                    "responses": {"200": {"description": "OK"}}
                }
            }
        }
    });
    Router::new()
        .route("/openapi.json", get(move || {
            let spec = spec.clone();
            async move { Json(spec) }
        }))
        .route(
            "/pets/{pet_id}",
            get(|Path(pet_id): Path<i64>| async move {
                Json(json!({"id": pet_id, "name": "rex"}))
            }),
        )
        .route(
            "/pets",
            post(|Json(body): Json<Value>| async move {
                (
                    axum::http::StatusCode::CREATED,
                    Json(json!({"id": 99, "name": body["name"]})),
                )
            }),
        )
        .route(
            "/status",
            get(|| async { Json(json!({"status": "ok"})) }),
        )
}

/// Stub tool server speaking single-shot JSON-RPC with one `echo` tool.
fn toolserver_app() -> Router {
    Router::new().route(
        "/mcp",
        post(|Json(message): Json<Value>| async move {
            let id = message["id"].clone();
            let result = match message["method"].as_str() {
                Some("initialize") => json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "echo-server", "version": "0.1.0"}
                }),
                Some("tools/list") => json!({
                    "tools": [{
                        "name": "echo",
                        "description": "Echo the arguments back",
                        "inputSchema": {"type": "object"}
                    }]
                }),
                Some("tools/call") => json!({
                    "content": [{"type": "text", "text":
                        message["params"]["arguments"].to_string()}],
                    "isError": false
                }),
                other => {
                    return Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("unknown method {other:?}")}
                    }));
                }
            };
            Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        }),
    )
}

/// Spin up a full bridge on an ephemeral port, snapshots under `data_dir`.
async fn spawn_bridge(data_dir: PathBuf) -> anyhow::Result<String> {
    let config = BridgeConfig {
        data_dir,
        ..BridgeConfig::default()
    };
    let registry = Arc::new(Registry::new(Some(config.snapshot_path())));
    registry.load_snapshot().context("load snapshot")?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(Duration::from_secs(5))?);
    let discovery = Arc::new(DiscoveryEngine::new(
        registry.clone(),
        transport.clone(),
        Duration::from_secs(2),
        Duration::from_secs(3600),
        Duration::from_secs(0),
    ));
    let state = AppState {
        registry: registry.clone(),
        router: Arc::new(CallRouter::new(registry, transport)),
        discovery,
        started_at: Utc::now(),
    };
    serve_in_background(http::app(state)).await
}

async fn register(
    client: &reqwest::Client,
    bridge: &str,
    seed: Value,
) -> anyhow::Result<Value> {
    let resp = client
        .post(format!("{bridge}/backends"))
        .json(&seed)
        .send()
        .await
        .context("POST /backends")?;
    anyhow::ensure!(resp.status() == 201, "unexpected status {}", resp.status());
    Ok(resp.json().await?)
}

#[tokio::test]
async fn openapi_register_discover_and_proxy() -> anyhow::Result<()> {
    let upstream = serve_in_background(petstore_app()).await?;
    let tmp = tempfile::tempdir()?;
    let bridge = spawn_bridge(tmp.path().to_path_buf()).await?;
    let client = reqwest::Client::new();

    let record = register(
        &client,
        &bridge,
        json!({"type": "openapi", "name": "petstore", "baseUrl": upstream}),
    )
    .await?;
    let id = record["id"].as_str().context("backend id")?.to_string();
    assert!(id.starts_with("openapi_"));
    assert_eq!(record["status"], "online");
    assert!(record["operations"]["getPet"].is_object());
    assert!(record["operations"]["createPet"].is_object());

    // Path-parameter call.
    let resp = client
        .post(format!("{bridge}/proxy/openapi/{id}/getPet"))
        .json(&json!({"pathParams": {"petId": 42}}))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let envelope: Value = resp.json().await?;
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["data"]["id"], 42);
    assert_eq!(envelope["data"]["name"], "rex");

    // Body-carrying call mirrors the upstream's 201.
    let resp = client
        .post(format!("{bridge}/proxy/openapi/{id}/createPet"))
        .json(&json!({"body": {"name": "bella"}}))
        .send()
        .await?;
    assert_eq!(resp.status(), 201);
    let envelope: Value = resp.json().await?;
    assert_eq!(envelope["data"]["name"], "bella");

    // A zero-argument operation works with no request body at all.
    let resp = client
        .post(format!("{bridge}/proxy/openapi/{id}/get_status"))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let envelope: Value = resp.json().await?;
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["data"]["status"], "ok");

    // Missing path parameter is rejected locally.
    let resp = client
        .post(format!("{bridge}/proxy/openapi/{id}/getPet"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);
    let envelope: Value = resp.json().await?;
    assert_eq!(envelope["error"]["kind"], "missingPathParam");

    // Unknown operation and unknown backend are 404s.
    let resp = client
        .post(format!("{bridge}/proxy/openapi/{id}/nope"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);
    let resp = client
        .post(format!("{bridge}/proxy/openapi/openapi_ffffffff/getPet"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);
    Ok(())
}

#[tokio::test]
async fn openapi_backend_is_also_a_tool_server() -> anyhow::Result<()> {
    let upstream = serve_in_background(petstore_app()).await?;
    let tmp = tempfile::tempdir()?;
    let bridge = spawn_bridge(tmp.path().to_path_buf()).await?;
    let client = reqwest::Client::new();

    let record = register(
        &client,
        &bridge,
        json!({"type": "openapi", "name": "petstore", "baseUrl": upstream}),
    )
    .await?;
    let id = record["id"].as_str().context("backend id")?;

    // initialize
    let resp: Value = client
        .post(format!("{bridge}/mcp/{id}"))
        .json(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"}
            }
        }))
        .send()
        .await?
        .json()
        .await?;
    assert!(resp["result"]["capabilities"]["tools"].is_object());

    // tools/list exposes every operation with grouped argument schemas.
    let resp: Value = client
        .post(format!("{bridge}/mcp/{id}"))
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await?
        .json()
        .await?;
    let tools = resp["result"]["tools"].as_array().context("tools array")?;
    let get_pet = tools
        .iter()
        .find(|t| t["name"] == "getPet")
        .context("getPet tool")?;
    assert!(get_pet["inputSchema"]["properties"]["pathParams"].is_object());

    // tools/call round-trips through the upstream.
    let resp: Value = client
        .post(format!("{bridge}/mcp/{id}"))
        .json(&json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "getPet", "arguments": {"pathParams": {"petId": 7}}}
        }))
        .send()
        .await?
        .json()
        .await?;
    let result = &resp["result"];
    assert_eq!(result["isError"], false);
    assert_eq!(result["structuredContent"]["data"]["id"], 7);

    // Unknown tool becomes a JSON-RPC invalid-params error.
    let resp: Value = client
        .post(format!("{bridge}/mcp/{id}"))
        .json(&json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "nope", "arguments": {}}
        }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["error"]["code"], -32602);
    Ok(())
}

#[tokio::test]
async fn tool_backend_register_and_call() -> anyhow::Result<()> {
    let upstream = serve_in_background(toolserver_app()).await?;
    let tmp = tempfile::tempdir()?;
    let bridge = spawn_bridge(tmp.path().to_path_buf()).await?;
    let client = reqwest::Client::new();

    let record = register(
        &client,
        &bridge,
        json!({
            "type": "tool",
            "name": "echo-server",
            "endpointUrl": format!("{upstream}/mcp"),
            "launchCommand": "uvx echo-server"
        }),
    )
    .await?;
    let id = record["id"].as_str().context("backend id")?;
    assert!(id.starts_with("tool_"));
    assert_eq!(record["status"], "running");
    assert!(record["tools"]["echo"].is_object());

    let resp = client
        .post(format!("{bridge}/proxy/tool/{id}/echo"))
        .json(&json!({"body": {"msg": "hello"}}))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let envelope: Value = resp.json().await?;
    assert_eq!(envelope["success"], true);
    let echoed = envelope["data"].as_str().context("echoed text")?;
    assert!(echoed.contains("hello"));

    // The kind segment must match the record.
    let resp = client
        .post(format!("{bridge}/proxy/openapi/{id}/echo"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);
    Ok(())
}

#[tokio::test]
async fn unreachable_tool_backend_fails_fast() -> anyhow::Result<()> {
    let dead_port = pick_unused_port()?;
    let tmp = tempfile::tempdir()?;
    let bridge = spawn_bridge(tmp.path().to_path_buf()).await?;
    let client = reqwest::Client::new();

    let record = register(
        &client,
        &bridge,
        json!({
            "type": "tool",
            "name": "ghost",
            "endpointUrl": format!("http://127.0.0.1:{dead_port}/mcp")
        }),
    )
    .await?;
    let id = record["id"].as_str().context("backend id")?;
    assert_eq!(record["status"], "stopped");

    let resp = client
        .post(format!("{bridge}/proxy/tool/{id}/anything"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status(), 502);
    let envelope: Value = resp.json().await?;
    assert_eq!(envelope["error"]["kind"], "backendUnavailable");
    Ok(())
}

#[tokio::test]
async fn snapshot_survives_restart_with_provisional_status() -> anyhow::Result<()> {
    let upstream = serve_in_background(petstore_app()).await?;
    let tmp = tempfile::tempdir()?;
    let client = reqwest::Client::new();

    let first = spawn_bridge(tmp.path().to_path_buf()).await?;
    let record = register(
        &client,
        &first,
        json!({"type": "openapi", "name": "petstore", "baseUrl": upstream}),
    )
    .await?;
    let id = record["id"].as_str().context("backend id")?.to_string();

    // Second instance over the same data dir: same id, status demoted until
    // the next probe.
    let second = spawn_bridge(tmp.path().to_path_buf()).await?;
    let restored: Value = client
        .get(format!("{second}/backends/{id}"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(restored["name"], "petstore");
    assert_eq!(restored["status"], "unknown");
    assert!(restored["operations"]["getPet"].is_object());

    // Calls are refused until discovery confirms it again.
    let resp = client
        .post(format!("{second}/proxy/openapi/{id}/getPet"))
        .json(&json!({"pathParams": {"petId": 1}}))
        .send()
        .await?;
    assert_eq!(resp.status(), 502);

    // An on-demand discovery cycle brings it back.
    let resp = client.post(format!("{second}/discover")).send().await?;
    assert_eq!(resp.status(), 200);
    let restored: Value = client
        .get(format!("{second}/backends/{id}"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(restored["status"], "online");
    Ok(())
}

#[tokio::test]
async fn re_registration_keeps_backend_id() -> anyhow::Result<()> {
    let upstream = serve_in_background(petstore_app()).await?;
    let tmp = tempfile::tempdir()?;
    let bridge = spawn_bridge(tmp.path().to_path_buf()).await?;
    let client = reqwest::Client::new();

    let seed = json!({"type": "openapi", "name": "petstore", "baseUrl": upstream});
    let first = register(&client, &bridge, seed.clone()).await?;
    let second = register(&client, &bridge, seed).await?;
    assert_eq!(first["id"], second["id"]);

    let listed: Vec<Value> = client
        .get(format!("{bridge}/backends"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stats_and_listing_reflect_registry() -> anyhow::Result<()> {
    let upstream = serve_in_background(petstore_app()).await?;
    let tools = serve_in_background(toolserver_app()).await?;
    let tmp = tempfile::tempdir()?;
    let bridge = spawn_bridge(tmp.path().to_path_buf()).await?;
    let client = reqwest::Client::new();

    register(
        &client,
        &bridge,
        json!({"type": "openapi", "name": "petstore", "baseUrl": upstream}),
    )
    .await?;
    let tool_record = register(
        &client,
        &bridge,
        json!({"type": "tool", "name": "echo", "endpointUrl": format!("{tools}/mcp")}),
    )
    .await?;

    let stats: Value = client
        .get(format!("{bridge}/stats"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["backends"]["total"], 2);
    assert_eq!(stats["backends"]["openapi"], 1);
    assert_eq!(stats["backends"]["tool"], 1);
    // 3 petstore operations + 1 echo tool.
    assert_eq!(stats["bridgedOperations"], 4);

    let filtered: Vec<Value> = client
        .get(format!("{bridge}/backends?kind=tool"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["id"], tool_record["id"]);

    // Tool surface over the admin API.
    let tools_listing: Vec<Value> = client
        .get(format!(
            "{bridge}/backends/{}/tools",
            tool_record["id"].as_str().context("id")?
        ))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(tools_listing[0]["name"], "echo");

    // Deregistration frees the id.
    let resp = client
        .delete(format!(
            "{bridge}/backends/{}",
            tool_record["id"].as_str().context("id")?
        ))
        .send()
        .await?;
    assert_eq!(resp.status(), 204);
    let stats: Value = client
        .get(format!("{bridge}/stats"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["backends"]["total"], 1);
    Ok(())
}

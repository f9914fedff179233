//! Unix domain socket IPC listener.
//!
//! Accepts connections, reads newline-delimited JSON-RPC-lite messages,
//! dispatches them to a [`Session`] bound to the connection's actor and
//! writes one response line per request.

use std::path::Path;
use std::sync::Arc;

use roster_core::{Actor, RosterApi, RosterError, RosterService, Session};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::PROTOCOL_VERSION;
use crate::protocol::*;

/// Actor a connection acts as until it says `hello`.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Bind the listener, replacing a stale socket file.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!(path = %path.display(), "Roster service listening");
    Ok(listener)
}

/// Serve connections until `shutdown` flips to `true` (or its sender is
/// dropped).
pub async fn serve(
    service: Arc<RosterService>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(service, stream).await {
                            tracing::warn!(error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept error");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Roster service stopped accepting connections");
    Ok(())
}

async fn handle_connection(service: Arc<RosterService>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut session = service.session(Actor::new(ANONYMOUS_ACTOR));
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(&service, &mut session, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    tracing::debug!(actor = %session.actor(), "Connection closed");
    Ok(())
}

/// Parse and dispatch a single message. `hello` rebinds the connection's
/// session; everything else runs against it.
async fn dispatch_message(service: &Arc<RosterService>, session: &mut Session, raw: &str) -> Value {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return error_value(
                RequestId::Integer(0),
                RpcErrorBody {
                    code: ERR_INVALID_REQUEST,
                    message: format!("Invalid JSON-RPC: {e}"),
                    data: None,
                },
            );
        }
    };

    let id = request.id;
    let result = if request.method == "hello" {
        handle_hello(request.params).map(|(actor, value)| {
            *session = service.session(actor);
            value
        })
    } else {
        dispatch_method(session, &request.method, request.params).await
    };

    match result {
        Ok(value) => serde_json::to_value(RpcResponse { id, result: value }).unwrap_or_default(),
        Err(error) => error_value(id, error),
    }
}

fn error_value(id: RequestId, error: RpcErrorBody) -> Value {
    serde_json::to_value(RpcErrorResponse { id, error }).unwrap_or_default()
}

async fn dispatch_method(
    session: &Session,
    method: &str,
    params: Option<Value>,
) -> Result<Value, RpcErrorBody> {
    match method {
        "roster.get" => {
            let p: PageIdParams = parse_params(method, params)?;
            reply(method, session.roster(&p.page_id).await)
        }
        "member.add" => {
            let p: AddMemberParams = parse_params(method, params)?;
            reply(method, session.add_member(&p.page_id, p.member).await)
        }
        "member.update" => {
            let p: UpdateMemberParams = parse_params(method, params)?;
            reply(method, session.update_member(&p.member_id, p.patch).await)
        }
        "roster.reorder" => {
            let p: ReorderParams = parse_params(method, params)?;
            // A report with failures goes out as a 207 error carrying them.
            let outcome = match session.reorder(&p.page_id, p.entries).await {
                Ok(report) if !report.success => Err(RosterError::PartialFailure {
                    failures: report.failures,
                }),
                other => other,
            };
            reply(method, outcome)
        }
        "member.remove" => {
            let p: MemberIdParams = parse_params(method, params)?;
            reply(method, session.remove_member(&p.member_id).await)
        }
        "member.reasons.replace" => {
            let p: ReplaceReasonsParams = parse_params(method, params)?;
            reply(
                method,
                session
                    .replace_member_reasons(&p.member_id, p.reason_ids)
                    .await,
            )
        }
        "reason.list" => reply(method, session.list_catalog().await),
        "reason.create" => {
            let p: CreateReasonParams = parse_params(method, params)?;
            reply(
                method,
                session
                    .create_reason(&p.label, p.description.as_deref())
                    .await,
            )
        }
        "reason.delete" => {
            let p: ReasonIdParams = parse_params(method, params)?;
            reply(method, session.delete_reason(&p.reason_id).await)
        }
        "page.create" => {
            let p: roster_core::NewPage = parse_params(method, params)?;
            reply(method, session.create_page(p).await)
        }
        "page.get" => {
            let p: PageIdParams = parse_params(method, params)?;
            reply(method, session.get_page(&p.page_id).await)
        }
        "page.list" => reply(method, session.list_pages().await),
        "page.by_area_code" => {
            let p: AreaCodeParams = parse_params(method, params)?;
            reply(method, session.published_page_by_area_code(&p.area_code).await)
        }
        "page.update" => {
            let p: UpdatePageParams = parse_params(method, params)?;
            reply(method, session.update_page(&p.page_id, p.patch).await)
        }
        "page.toggle_publish" => {
            let p: PageIdParams = parse_params(method, params)?;
            reply(method, session.toggle_publish(&p.page_id).await)
        }
        "page.delete" => {
            let p: PageIdParams = parse_params(method, params)?;
            reply(method, session.delete_page(&p.page_id).await)
        }
        _ => Err(RpcErrorBody {
            code: ERR_METHOD_NOT_FOUND,
            message: format!("Unknown method: {method}"),
            data: None,
        }),
    }
}

/// Handle the `hello` handshake.
fn handle_hello(params: Option<Value>) -> Result<(Actor, Value), RpcErrorBody> {
    let hello: HelloParams = parse_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(invalid_params(format!(
            "Incompatible protocol version: client={}, service={}",
            hello.protocol_version, PROTOCOL_VERSION
        )));
    }
    if hello.actor.trim().is_empty() {
        return Err(invalid_params("hello.actor must not be empty".to_string()));
    }

    tracing::debug!(
        actor = %hello.actor,
        client_version = %hello.client_version,
        "Client handshake"
    );
    let result = HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        actor: hello.actor.clone(),
    };
    let value = serde_json::to_value(result).map_err(|e| internal(format!("Serialize error: {e}")))?;
    Ok((Actor::new(hello.actor), value))
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, RpcErrorBody> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params)
        .map_err(|e| invalid_params(format!("Invalid {method} params: {e}")))
}

fn reply<T: Serialize>(method: &str, outcome: roster_core::Result<T>) -> Result<Value, RpcErrorBody> {
    match outcome {
        Ok(value) => {
            serde_json::to_value(value).map_err(|e| internal(format!("Serialize error: {e}")))
        }
        Err(err) => {
            log_failure(method, &err);
            Err(RpcErrorBody::from(&err))
        }
    }
}

fn log_failure(method: &str, err: &RosterError) {
    let category = err.category();
    if category.is_caller_fault() || matches!(err, RosterError::PartialFailure { .. }) {
        tracing::debug!(method, category = category.as_str(), error = %err, "Request refused");
    } else {
        tracing::error!(method, category = category.as_str(), error = %err, "Request failed");
    }
}

fn invalid_params(message: String) -> RpcErrorBody {
    RpcErrorBody {
        code: ERR_INVALID_PARAMS,
        message,
        data: None,
    }
}

fn internal(message: String) -> RpcErrorBody {
    RpcErrorBody {
        code: ERR_INTERNAL,
        message,
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use roster_core::{AllowList, Contact, RosterStore};
    use serde_json::json;

    async fn service() -> Arc<RosterService> {
        let store = Arc::new(RosterStore::open_in_memory().expect("store"));
        store
            .upsert_contact(&Contact {
                id: "c1".to_string(),
                name: "Dana".to_string(),
                title: None,
                photo_url: None,
                is_active: true,
            })
            .await
            .expect("contact");
        Arc::new(RosterService::new(store).with_gate(Arc::new(AllowList::new(["editor"]))))
    }

    async fn call(service: &Arc<RosterService>, session: &mut Session, msg: Value) -> Value {
        dispatch_message(service, session, &msg.to_string()).await
    }

    fn hello(actor: &str) -> Value {
        json!({
            "id": 0,
            "method": "hello",
            "params": {
                "protocol_version": PROTOCOL_VERSION,
                "client_version": "test",
                "actor": actor
            }
        })
    }

    #[tokio::test]
    async fn hello_binds_actor_for_later_mutations() {
        let service = service().await;
        let mut session = service.session(Actor::new(ANONYMOUS_ACTOR));
        let create = json!({
            "id": 1,
            "method": "page.create",
            "params": {"customer_name": "Acme", "area_code": "1234"}
        });

        let denied = call(&service, &mut session, create.clone()).await;
        assert_eq!(denied["error"]["code"], json!(ERR_UNAUTHORIZED));
        assert_eq!(denied["error"]["data"]["category"], json!("UNAUTHORIZED"));

        let greeted = call(&service, &mut session, hello("editor")).await;
        assert_eq!(greeted["result"]["actor"], json!("editor"));

        let created = call(&service, &mut session, create).await;
        assert_eq!(created["id"], json!(1));
        assert_eq!(created["result"]["slug"], json!("acme-1234"));
    }

    #[tokio::test]
    async fn hello_rejects_other_protocol_versions() {
        let service = service().await;
        let mut session = service.session(Actor::new(ANONYMOUS_ACTOR));
        let resp = call(
            &service,
            &mut session,
            json!({
                "id": 0,
                "method": "hello",
                "params": {"protocol_version": "0.1", "client_version": "old", "actor": "editor"}
            }),
        )
        .await;
        assert_eq!(resp["error"]["code"], json!(ERR_INVALID_PARAMS));
        assert_eq!(session.actor().name(), ANONYMOUS_ACTOR);
    }

    #[tokio::test]
    async fn malformed_and_unknown_requests() {
        let service = service().await;
        let mut session = service.session(Actor::new(ANONYMOUS_ACTOR));

        let garbage = dispatch_message(&service, &mut session, "{not json").await;
        assert_eq!(garbage["error"]["code"], json!(ERR_INVALID_REQUEST));

        let unknown = call(&service, &mut session, json!({"id": 3, "method": "roster.explode"})).await;
        assert_eq!(unknown["error"]["code"], json!(ERR_METHOD_NOT_FOUND));

        let missing = call(&service, &mut session, json!({"id": 4, "method": "roster.get"})).await;
        assert_eq!(missing["error"]["code"], json!(ERR_INVALID_PARAMS));
    }

    #[tokio::test]
    async fn reorder_with_unknown_member_answers_207() {
        let service = service().await;
        let mut session = service.session(Actor::new(ANONYMOUS_ACTOR));
        call(&service, &mut session, hello("editor")).await;
        let page = call(
            &service,
            &mut session,
            json!({
                "id": 1,
                "method": "page.create",
                "params": {"customer_name": "Acme", "area_code": "1234"}
            }),
        )
        .await;
        let page_id = page["result"]["id"].as_str().expect("page id").to_string();
        let member = call(
            &service,
            &mut session,
            json!({
                "id": 2,
                "method": "member.add",
                "params": {"page_id": page_id, "contact_id": "c1", "role": "sales"}
            }),
        )
        .await;
        let member_id = member["result"]["id"].as_str().expect("member id").to_string();

        let resp = call(
            &service,
            &mut session,
            json!({
                "id": 3,
                "method": "roster.reorder",
                "params": {
                    "page_id": page_id,
                    "entries": [
                        {"member_id": member_id, "order_index": 0},
                        {"member_id": "ghost", "order_index": 1}
                    ]
                }
            }),
        )
        .await;
        assert_eq!(resp["error"]["code"], json!(ERR_PARTIAL_FAILURE));
        let failures = &resp["error"]["data"]["detail"]["failures"];
        assert_eq!(failures[0]["member_id"], json!("ghost"));

        let ok = call(
            &service,
            &mut session,
            json!({
                "id": 4,
                "method": "roster.reorder",
                "params": {"page_id": page_id, "entries": [{"member_id": member_id, "order_index": 0}]}
            }),
        )
        .await;
        assert_eq!(ok["result"], json!({"success": true, "failures": []}));
    }
}

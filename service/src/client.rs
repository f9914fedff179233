//! Socket client: `RosterApi` over the service's Unix socket.
//!
//! Requests on one connection are strictly sequential. Every transport or
//! codec failure surfaces as `RosterError::Transport`; service errors come
//! back as the variant the service raised.

use std::path::Path;

use async_trait::async_trait;
use roster_core::{
    ContactPage, Member, MemberPatch, NewMember, NewPage, PagePatch, Reason, ReasonRef,
    ReorderEntry, ReorderReport, RosterApi, RosterEntry, RosterError, Result,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::PROTOCOL_VERSION;
use crate::protocol::*;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: i64,
}

pub struct SocketClient {
    conn: Mutex<Connection>,
    hello: HelloResult,
}

fn transport(context: &str, err: impl std::fmt::Display) -> RosterError {
    RosterError::transport(format!("{context}: {err}"))
}

impl SocketClient {
    /// Connect and perform the `hello` handshake as `actor`.
    pub async fn connect(socket_path: &Path, actor: &str) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| transport(&format!("cannot connect to {}", socket_path.display()), e))?;
        let (reader, writer) = stream.into_split();
        let conn = Connection {
            reader: BufReader::new(reader),
            writer,
            next_id: 0,
        };
        let placeholder = HelloResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            service_version: String::new(),
            actor: actor.to_string(),
        };
        let mut client = Self {
            conn: Mutex::new(conn),
            hello: placeholder,
        };

        let hello: HelloResult = client
            .call(
                "hello",
                HelloParams {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    client_version: env!("CARGO_PKG_VERSION").to_string(),
                    actor: actor.to_string(),
                },
            )
            .await?;
        tracing::debug!(
            actor = %hello.actor,
            service_version = %hello.service_version,
            "Connected to roster service"
        );
        client.hello = hello;
        Ok(client)
    }

    /// What the service answered to `hello`.
    pub fn hello(&self) -> &HelloResult {
        &self.hello
    }

    /// Send one request and wait for its reply. Lines answering an earlier,
    /// abandoned request are skipped.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let mut conn = self.conn.lock().await;
        conn.next_id += 1;
        let id = RequestId::Integer(conn.next_id);

        let params = serde_json::to_value(params).map_err(|e| transport("encode params", e))?;
        let request = RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params: Some(params),
        };
        let mut bytes = serde_json::to_vec(&request).map_err(|e| transport("encode request", e))?;
        bytes.push(b'\n');
        conn.writer
            .write_all(&bytes)
            .await
            .map_err(|e| transport("write request", e))?;
        conn.writer
            .flush()
            .await
            .map_err(|e| transport("flush request", e))?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = conn
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| transport("read reply", e))?;
            if n == 0 {
                return Err(RosterError::transport("service closed the connection"));
            }

            let reply: RpcReply = serde_json::from_str(line.trim())
                .map_err(|e| transport("decode reply", e))?;
            match reply {
                RpcReply::Result(response) if response.id == id => {
                    return serde_json::from_value(response.result)
                        .map_err(|e| transport(&format!("decode {method} result"), e));
                }
                RpcReply::Error(response) if response.id == id => {
                    return Err(response.error.into_roster_error());
                }
                _ => {
                    tracing::debug!(method, "Skipping reply to an abandoned request");
                }
            }
        }
    }
}

#[async_trait]
impl RosterApi for SocketClient {
    async fn roster(&self, page_id: &str) -> Result<Vec<RosterEntry>> {
        self.call("roster.get", json!({ "page_id": page_id })).await
    }

    async fn add_member(&self, page_id: &str, new_member: NewMember) -> Result<Member> {
        self.call(
            "member.add",
            AddMemberParams {
                page_id: page_id.to_string(),
                member: new_member,
            },
        )
        .await
    }

    async fn update_member(&self, member_id: &str, patch: MemberPatch) -> Result<Member> {
        self.call(
            "member.update",
            UpdateMemberParams {
                member_id: member_id.to_string(),
                patch,
            },
        )
        .await
    }

    /// A 207 answer is turned back into a report listing the failed pairs.
    async fn reorder(&self, page_id: &str, entries: Vec<ReorderEntry>) -> Result<ReorderReport> {
        let outcome = self
            .call(
                "roster.reorder",
                ReorderParams {
                    page_id: page_id.to_string(),
                    entries,
                },
            )
            .await;
        match outcome {
            Err(RosterError::PartialFailure { failures }) => {
                Ok(ReorderReport::from_failures(failures))
            }
            other => other,
        }
    }

    async fn remove_member(&self, member_id: &str) -> Result<()> {
        self.call("member.remove", json!({ "member_id": member_id }))
            .await
    }

    async fn list_catalog(&self) -> Result<Vec<Reason>> {
        self.call("reason.list", json!({})).await
    }

    async fn create_reason(&self, label: &str, description: Option<&str>) -> Result<Reason> {
        self.call(
            "reason.create",
            CreateReasonParams {
                label: label.to_string(),
                description: description.map(str::to_string),
            },
        )
        .await
    }

    async fn delete_reason(&self, reason_id: &str) -> Result<()> {
        self.call("reason.delete", json!({ "reason_id": reason_id }))
            .await
    }

    async fn replace_member_reasons(
        &self,
        member_id: &str,
        reason_ids: Vec<String>,
    ) -> Result<Vec<ReasonRef>> {
        self.call(
            "member.reasons.replace",
            ReplaceReasonsParams {
                member_id: member_id.to_string(),
                reason_ids,
            },
        )
        .await
    }

    async fn create_page(&self, new_page: NewPage) -> Result<ContactPage> {
        self.call("page.create", new_page).await
    }

    async fn get_page(&self, page_id: &str) -> Result<ContactPage> {
        self.call("page.get", json!({ "page_id": page_id })).await
    }

    async fn list_pages(&self) -> Result<Vec<ContactPage>> {
        self.call("page.list", json!({})).await
    }

    async fn published_page_by_area_code(&self, area_code: &str) -> Result<ContactPage> {
        self.call("page.by_area_code", json!({ "area_code": area_code }))
            .await
    }

    async fn update_page(&self, page_id: &str, patch: PagePatch) -> Result<ContactPage> {
        self.call(
            "page.update",
            UpdatePageParams {
                page_id: page_id.to_string(),
                patch,
            },
        )
        .await
    }

    async fn toggle_publish(&self, page_id: &str) -> Result<ContactPage> {
        self.call("page.toggle_publish", json!({ "page_id": page_id }))
            .await
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        self.call("page.delete", json!({ "page_id": page_id })).await
    }
}

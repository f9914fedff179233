#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end over a real socket.
//!
//!   1. Start the service on a temp socket with an allow-list gate
//!   2. Connect clients, handshake as different actors
//!   3. Drive pages, members, reasons and reorder through `SocketClient`
//!   4. Check errors come back as the same `RosterError` variants
//!   5. Run the optimistic engine on top of the socket client

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use roster_core::{
    AllowList, Contact, ErrorCategory, MemberPatch, NewMember, NewPage, ReorderEntry, Role,
    RosterApi, RosterError, RosterService, RosterStore,
};
use roster_service::client::SocketClient;
use roster_sync::{SyncEngine, SyncError};
use tokio::sync::watch;

struct Running {
    store: Arc<RosterStore>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

async fn start_service(socket_path: &Path) -> Running {
    let store = Arc::new(RosterStore::open_in_memory().unwrap());
    for (id, name) in [("c1", "Dana"), ("c2", "Eli"), ("c3", "Fran")] {
        store
            .upsert_contact(&Contact {
                id: id.to_string(),
                name: name.to_string(),
                title: None,
                photo_url: None,
                is_active: true,
            })
            .await
            .unwrap();
    }
    let service = Arc::new(
        RosterService::new(Arc::clone(&store)).with_gate(Arc::new(AllowList::new(["editor"]))),
    );

    let listener = roster_service::ipc::bind(socket_path).unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        roster_service::ipc::serve(service, listener, shutdown_rx)
            .await
            .unwrap();
    });

    // Wait for socket to be ready
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Running {
        store,
        shutdown,
        handle,
    }
}

fn new_member(contact_id: &str, role: &str) -> NewMember {
    NewMember {
        contact_id: contact_id.to_string(),
        role: role.to_string(),
        order_index: None,
    }
}

async fn acme(client: &SocketClient) -> String {
    client
        .create_page(NewPage {
            customer_name: "Acme Plumbing".to_string(),
            area_code: "5021".to_string(),
            ..NewPage::default()
        })
        .await
        .unwrap()
        .id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_add_over_the_wire_is_a_conflict() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("roster.sock");
    let running = start_service(&socket_path).await;

    let client = SocketClient::connect(&socket_path, "editor").await.unwrap();
    assert_eq!(client.hello().actor, "editor");
    let page_id = acme(&client).await;

    let member = client
        .add_member(&page_id, new_member("c1", "operations"))
        .await
        .unwrap();
    assert_eq!(member.role, Role::Operations);
    assert_eq!(member.order_index, 0);

    let err = client
        .add_member(&page_id, new_member("c1", "sales"))
        .await
        .expect_err("contact already on page");
    assert!(matches!(err, RosterError::Conflict { .. }), "got {err:?}");

    let roster = client.roster(&page_id).await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(
        roster[0].contact.as_ref().map(|c| c.name.as_str()),
        Some("Dana")
    );

    running.shutdown.send(true).unwrap();
    running.handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn errors_keep_their_variant_across_the_socket() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("roster.sock");
    let _running = start_service(&socket_path).await;

    let editor = SocketClient::connect(&socket_path, "editor").await.unwrap();
    let visitor = SocketClient::connect(&socket_path, "visitor").await.unwrap();
    let page_id = acme(&editor).await;

    let denied = visitor
        .toggle_publish(&page_id)
        .await
        .expect_err("visitor is not on the allow list");
    assert_eq!(denied.category(), ErrorCategory::Unauthorized);
    // Reads stay open.
    assert!(!visitor.get_page(&page_id).await.unwrap().is_published);

    let bad_role = editor
        .add_member(&page_id, new_member("c1", "SALES"))
        .await
        .expect_err("roles are case sensitive");
    assert!(matches!(bad_role, RosterError::InvalidRole { ref value } if value == "SALES"));

    let missing = editor
        .update_member("no-such-member", MemberPatch::default())
        .await
        .expect_err("unknown member");
    assert!(matches!(missing, RosterError::NotFound { ref entity, .. } if entity == "member"));

    let reason = editor.create_reason("Emergency", Some("24/7")).await.unwrap();
    let member = editor
        .add_member(&page_id, new_member("c2", "daily"))
        .await
        .unwrap();
    let refs = editor
        .replace_member_reasons(&member.id, vec![reason.id.clone()])
        .await
        .unwrap();
    assert_eq!(refs.len(), 1);
    let in_use = editor
        .delete_reason(&reason.id)
        .await
        .expect_err("reason still assigned");
    assert_eq!(in_use.category(), ErrorCategory::Conflict);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reorder_reports_failed_pairs_and_publish_lookup_works() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("roster.sock");
    let running = start_service(&socket_path).await;

    let client = SocketClient::connect(&socket_path, "editor").await.unwrap();
    let page_id = acme(&client).await;
    let a = client.add_member(&page_id, new_member("c1", "sales")).await.unwrap();
    let b = client.add_member(&page_id, new_member("c2", "sales")).await.unwrap();

    let report = client
        .reorder(
            &page_id,
            vec![
                ReorderEntry::new(b.id.clone(), 0),
                ReorderEntry::new(a.id.clone(), 1),
                ReorderEntry::new("ghost", 2),
            ],
        )
        .await
        .unwrap();
    assert!(!report.success);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].member_id, "ghost");

    let order: Vec<String> = client
        .roster(&page_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.member_id)
        .collect();
    assert_eq!(order, vec![b.id.clone(), a.id.clone()]);

    let missing = client
        .published_page_by_area_code("5021")
        .await
        .expect_err("not published yet");
    assert_eq!(missing.category(), ErrorCategory::NotFound);
    client.toggle_publish(&page_id).await.unwrap();
    let found = client.published_page_by_area_code("5021").await.unwrap();
    assert_eq!(found.slug, "acme-plumbing-5021");

    client.delete_page(&page_id).await.unwrap();
    assert!(client.list_pages().await.unwrap().is_empty());
    assert!(running.store.get_member(&a.id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimistic_engine_rolls_back_over_the_socket() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("roster.sock");
    let _running = start_service(&socket_path).await;

    let client = SocketClient::connect(&socket_path, "editor").await.unwrap();
    let page_id = acme(&client).await;
    let engine = SyncEngine::new(Arc::new(client));

    let first = engine
        .add_member(&page_id, new_member("c1", "sales"))
        .await
        .unwrap();
    engine
        .add_member(&page_id, new_member("c3", "daily"))
        .await
        .unwrap();
    let before = engine.roster(&page_id).await.unwrap();
    assert_eq!(before.len(), 2);

    let err = engine
        .add_member(&page_id, new_member("c1", "daily"))
        .await
        .expect_err("duplicate contact");
    assert!(matches!(
        err,
        SyncError::Rejected(RosterError::Conflict { .. })
    ));
    assert_eq!(engine.roster(&page_id).await.unwrap(), before);

    engine
        .update_member(
            &page_id,
            &first.id,
            MemberPatch {
                order_index: Some(5),
                ..MemberPatch::default()
            },
        )
        .await
        .unwrap();
    let after = engine.roster(&page_id).await.unwrap();
    assert_eq!(after[1].member_id, first.id);
    assert_eq!(after[1].order_index, 5);
}

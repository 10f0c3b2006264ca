//! Tree synchronisation against a live server, over TCP and WebSockets.

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use splashcore::Tree;
use splashnet::{ConnectionState, SocketClient, SocketError, SocketServer, SyncState, WebsocketServer};
use splashproto::{Message, MessageType, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// A server tree holding `/foo/bar = 42`, with its creation updates already drained.
fn server_tree() -> Arc<Mutex<Tree>> {
    let mut tree = Tree::new();
    tree.create_leaf_at("/foo/bar", 42).unwrap();
    tree.get_update_seed_list();
    Arc::new(Mutex::new(tree))
}

fn client() -> SocketClient {
    SocketClient::new(Duration::from_secs(1), Duration::from_secs(2))
}

#[tokio::test]
async fn client_follows_the_server_tree() {
    let tree = server_tree();
    let server = SocketServer::bind(any_port(), Arc::new(SyncState::new(tree.clone())))
        .await
        .unwrap();

    let mut client = client();
    client.connect("localhost", server.local_addr().port()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let mut replica = Tree::new();
    client.get_tree_from_server(&mut replica).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Idle);
    assert_eq!(replica.get_value_for_leaf_at("/foo/bar"), Some(Value::from(42)));

    tree.lock().unwrap().set_value_for_leaf_at("/foo/bar", 99).unwrap();
    client.get_tree_updates(&replica).await.unwrap();
    // Queued only until the replica processes its queue.
    assert_eq!(replica.get_value_for_leaf_at("/foo/bar"), Some(Value::from(42)));
    replica.process_queue(false);
    assert_eq!(replica.get_value_for_leaf_at("/foo/bar"), Some(Value::from(99)));

    // Nothing new since the last request.
    assert!(client.fetch_updates().await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn client_updates_reach_the_server() {
    let tree = server_tree();
    let server = SocketServer::bind(any_port(), Arc::new(SyncState::new(tree.clone())))
        .await
        .unwrap();

    let mut client = client();
    client.connect("127.0.0.1", server.local_addr().port()).await.unwrap();
    let mut replica = Tree::new();
    client.get_tree_from_server(&mut replica).await.unwrap();

    replica.set_value_for_leaf_at("/foo/bar", 7).unwrap();
    replica.create_leaf_at("/foo/baz", "new").unwrap();
    client.send_updates_to_server(&mut replica).await.unwrap();
    assert!(!replica.has_pending_updates());

    let mut synced = false;
    for _ in 0..100 {
        let mut tree = tree.lock().unwrap();
        tree.process_queue(false);
        if tree.get_value_for_leaf_at("/foo/baz") == Some(Value::from("new")) {
            assert_eq!(tree.get_value_for_leaf_at("/foo/bar"), Some(Value::from(7)));
            synced = true;
            break;
        }
        drop(tree);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(synced);

    server.stop().await;
}

#[tokio::test]
async fn every_connection_gets_its_own_updates() {
    let tree = server_tree();
    let state = Arc::new(SyncState::new(tree.clone()));
    let server = SocketServer::bind(any_port(), state.clone()).await.unwrap();
    let port = server.local_addr().port();

    let mut first = client();
    let mut second = client();
    first.connect("127.0.0.1", port).await.unwrap();
    second.connect("127.0.0.1", port).await.unwrap();
    first.fetch_tree().await.unwrap();
    second.fetch_tree().await.unwrap();
    assert_eq!(state.connection_count(), 2);

    tree.lock().unwrap().set_value_for_leaf_at("/foo/bar", 1).unwrap();

    let a = first.fetch_updates().await.unwrap();
    let b = second.fetch_updates().await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a, b);

    server.stop().await;
}

#[tokio::test]
async fn empty_update_lists_send_nothing() {
    let mut client = client();
    // Not connected, but nothing has to go out either.
    let mut replica = Tree::new();
    replica.get_update_seed_list();
    assert!(client.send_updates_to_server(&mut replica).await.is_ok());
    assert!(matches!(client.fetch_tree().await, Err(SocketError::NotConnected)));
}

#[tokio::test]
async fn connect_failure_leaves_the_client_disconnected() {
    let listener = tokio::net::TcpListener::bind(any_port()).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = client();
    assert!(client.connect("127.0.0.1", port).await.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn server_stop_closes_clients() {
    let server = SocketServer::bind(any_port(), Arc::new(SyncState::new(server_tree())))
        .await
        .unwrap();
    let mut client = client();
    client.connect("127.0.0.1", server.local_addr().port()).await.unwrap();
    client.fetch_tree().await.unwrap();

    server.stop().await;
    assert!(client.fetch_updates().await.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn ws_request(ws: &mut WsStream, request: Message) -> Message {
    ws.send(WsMessage::Binary(request.to_frame().unwrap())).await.unwrap();
    loop {
        match ws.next().await.unwrap().unwrap() {
            WsMessage::Binary(data) => return Message::from_frame(&data).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn websocket_clients_speak_the_same_protocol() {
    let tree = server_tree();
    let server = WebsocketServer::bind(any_port(), Arc::new(SyncState::new(tree.clone())))
        .await
        .unwrap();

    let url = format!("ws://{}/", server.local_addr());
    let (mut first, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let reply = ws_request(&mut first, Message::ask_tree(5)).await;
    assert_eq!(reply.id, 5);
    assert_eq!(reply.kind, MessageType::SendTree);

    let mut replica = Tree::new();
    replica.add_seeds_to_queue(reply.seeds().unwrap());
    replica.process_queue(false);
    assert_eq!(replica, *tree.lock().unwrap());

    // Make sure the second connection is registered before the tree changes.
    ws_request(&mut second, Message::ask_tree(1)).await;
    tree.lock().unwrap().set_value_for_leaf_at("/foo/bar", 99).unwrap();

    let updates = ws_request(&mut first, Message::ask_updates(6)).await;
    assert_eq!(updates.id, 6);
    assert_eq!(updates.kind, MessageType::SendUpdates);
    let seeds = updates.seeds().unwrap();
    assert_eq!(seeds.len(), 1);

    replica.add_seeds_to_queue(seeds.clone());
    replica.process_queue(false);
    assert_eq!(replica.get_value_for_leaf_at("/foo/bar"), Some(Value::from(99)));

    // Already drained for the first connection, still pending for the second.
    assert!(ws_request(&mut first, Message::ask_updates(7)).await.seeds().unwrap().is_empty());
    assert_eq!(ws_request(&mut second, Message::ask_updates(2)).await.seeds().unwrap(), seeds);

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();
    server.stop().await;
}

//! Client/server synchronization over loopback TCP
//!
//! Drives a real [`AvrClient`] against the in-process emulated receiver.

use netavr::schemes::{Denon, Yamaha};
use netavr::{AvrClient, AvrError, AvrServer, Scheme, Value, VarEvent};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

async fn start(scheme: fn() -> Box<dyn Scheme>) -> (AvrServer, AvrClient) {
    let server = AvrServer::bind(scheme(), "127.0.0.1:0").await.expect("bind");
    let addr = server.local_addr();
    let client = AvrClient::connect(scheme(), addr.ip().to_string(), addr.port())
        .await
        .expect("connect");
    (server, client)
}

async fn expect_value(client: &AvrClient, id: &str, expected: Value) {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if client.get(id).await.unwrap() == Some(expected.clone()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("`{}` never became {:?}", id, expected));
}

#[tokio::test]
async fn client_polls_emulated_denon() {
    let (server, client) = start(|| Box::new(Denon)).await;

    // The dummy server fabricates plausible values: false for booleans,
    // the numeric midpoint for the master volume
    assert_eq!(client.get_wait("power").await.unwrap(), Value::Bool(false));
    assert_eq!(client.get_wait("volume").await.unwrap(), Value::Int(49));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn remote_set_applies_and_confirms() {
    let (server, client) = start(|| Box::new(Denon)).await;

    client.remote_set("volume", 30i64).await.unwrap();
    // The server validates, applies, and echoes the confirmation
    expect_value(&client, "volume", Value::Int(30)).await;
    assert_eq!(server.get("volume").await.unwrap(), Some(Value::Int(30)));

    // Out-of-range requests are refused locally, nothing reaches the server
    assert!(matches!(
        client.remote_set("volume", 1000i64).await,
        Err(AvrError::Domain { .. })
    ));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn yamaha_power_scenario() {
    let (server, client) = start(|| Box::new(Yamaha)).await;

    // `@MAIN:PWR=?` is answered with `@MAIN:PWR=Standby` by the dummy
    assert_eq!(
        client.get_wait("main_power").await.unwrap(),
        Value::Bool(false)
    );

    // A server-side power-on is pushed to the client as `@MAIN:PWR=On`
    server.set("main_power", true).await.unwrap();
    expect_value(&client, "main_power", Value::Bool(true)).await;

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn channel_volume_block_reassembles() {
    let (server, client) = start(|| Box::new(Denon)).await;

    client.poll("channel_volume").await.unwrap();
    client
        .wait_for(&["cv_front_left", "cv_front_right", "cv_center"], WAIT)
        .await
        .unwrap();

    for id in ["cv_front_left", "cv_front_right", "cv_center", "cv_subwoofer"] {
        assert_eq!(client.get(id).await.unwrap(), Some(Value::Int(50)));
    }

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn block_child_remote_set_confirms_to_client() {
    let (server, client) = start(|| Box::new(Denon)).await;

    // The server confirms with a full batch and sentinel, which the
    // client reassembles into the child value
    client.remote_set("cv_front_left", 40i64).await.unwrap();
    expect_value(&client, "cv_front_left", Value::Int(40)).await;
    assert_eq!(
        server.get("cv_front_left").await.unwrap(),
        Some(Value::Int(40))
    );

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn pending_wait_survives_server_restart() {
    // A mute peer accepts the first connection and never answers, so the
    // poll behind `wait_for` stays pending
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
    let mute = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(listener);
        let _ = hold_rx.await;
        drop(socket);
    });

    let client = Arc::new(
        AvrClient::connect(Box::new(Denon), addr.ip().to_string(), addr.port())
            .await
            .unwrap(),
    );
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.wait_for(&["power"], Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.get("power").await.unwrap(), None);

    // Restart: a real server takes over the address, then the mute peer
    // drops the old connection
    let server = AvrServer::bind(Box::new(Denon), &addr.to_string())
        .await
        .unwrap();
    hold_tx.send(()).unwrap();
    mute.await.unwrap();

    // The client reconnects, re-polls the missing variable, and the call
    // created before the disconnect fires
    tokio::time::timeout(Duration::from_secs(8), waiter)
        .await
        .expect("wait_for never resolved")
        .unwrap()
        .unwrap();
    assert_eq!(
        client.get("power").await.unwrap(),
        Some(Value::Bool(false))
    );

    match Arc::try_unwrap(client) {
        Ok(client) => client.shutdown().await,
        Err(_) => panic!("client still shared"),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn subscribe_replays_current_state() {
    let (server, client) = start(|| Box::new(Denon)).await;

    expect_value(&client, "power", Value::Bool(false)).await;
    let mut events = client.subscribe().await.unwrap();

    // First the connection state, then the replay of known variables
    let first = events.recv().await.unwrap();
    assert!(matches!(first, VarEvent::Connected));

    let mut power_replayed = false;
    while let Some(event) = events.try_recv().unwrap() {
        if let VarEvent::Set { id, value } = event {
            if id == "power" {
                assert_eq!(value, Value::Bool(false));
                power_replayed = true;
                break;
            }
        }
    }
    assert!(power_replayed, "replay did not include the power state");

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn wait_for_unknown_var_errors() {
    let (server, client) = start(|| Box::new(Denon)).await;

    assert!(matches!(
        client.wait_for(&["no_such_var"], WAIT).await,
        Err(AvrError::UnknownVar(_))
    ));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn disconnected_calls_report_not_connected() {
    let server = AvrServer::bind(Box::new(Denon), "127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    // Tear the server down so the client cannot connect
    server.shutdown().await;

    let client = AvrClient::new(Box::new(Denon), addr.ip().to_string(), addr.port());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!client.is_connected());
    assert!(matches!(
        client.remote_set("volume", 10i64).await,
        Err(AvrError::NotConnected)
    ));
    assert!(matches!(
        client.wait_for(&["power"], WAIT).await,
        Err(AvrError::NotConnected)
    ));
    // Reads of the (unset) cache still work
    assert_eq!(client.get("volume").await.unwrap(), None);

    client.shutdown().await;
}

//! Integration tests against an in-process scripted Manager server.

use asterisk_manager_tokio::{
    AmiAction, AmiClient, AmiConnectOptions, AmiError, AmiEvent, ConnectionState, CoreActions,
    DisconnectReason, EventSubscriber, HandlerErrorPolicy, ResponseStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::watch;

const BANNER: &[u8] = b"Asterisk Call Manager/1.1\r\n";

/// Server side of one scripted connection.
struct MockServer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockServer {
    /// Read one action block. Empty on EOF.
    async fn read_action(&mut self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        loop {
            let mut line = String::new();
            if self
                .reader
                .read_line(&mut line)
                .await
                .unwrap()
                == 0
            {
                return fields;
            }
            let line = line.trim_end();
            if line.is_empty() {
                if fields.is_empty() {
                    continue;
                }
                return fields;
            }
            let (name, value) = line
                .split_once(':')
                .unwrap();
            fields.push((name.to_string(), value.trim().to_string()));
        }
    }

    async fn send(&mut self, block: &str) {
        self.writer
            .write_all(block.as_bytes())
            .await
            .unwrap();
    }

    async fn accept_login(&mut self) -> Vec<(String, String)> {
        let login = self
            .read_action()
            .await;
        assert_eq!(field(&login, "Action"), Some("Login"));
        let id = field(&login, "ActionID")
            .unwrap()
            .to_string();
        self.send(&format!(
            "Response: Success\r\nActionID: {}\r\nMessage: Authentication accepted\r\n\r\n",
            id
        ))
        .await;
        login
    }
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Bind a listener and run `script` against the first connection.
async fn spawn_server<F, Fut>(script: F) -> u16
where
    F: FnOnce(MockServer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener
        .local_addr()
        .unwrap()
        .port();
    tokio::spawn(async move {
        let (stream, _) = listener
            .accept()
            .await
            .unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(BANNER)
            .await
            .unwrap();
        script(MockServer {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
        .await;
    });
    port
}

async fn connect(port: u16) -> AmiClient {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    AmiClient::connect("127.0.0.1", port, "admin", "secret")
        .await
        .unwrap()
}

#[tokio::test]
async fn ping_with_explicit_action_id() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let ping = server
            .read_action()
            .await;
        assert_eq!(field(&ping, "Action"), Some("Ping"));
        assert_eq!(field(&ping, "ActionID"), Some("42"));
        server
            .send("Response: Success\r\nActionID: 42\r\nPing: Pong\r\nTimestamp: 1700000000.123\r\n\r\n")
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    assert_eq!(client.banner_version(), "1.1");
    let response = client
        .send_action(AmiAction::ping().with_action_id("42"))
        .await
        .unwrap();
    assert_eq!(response.status(), &ResponseStatus::Success);
    assert_eq!(response.action_id(), Some("42"));
    assert_eq!(response.header("Ping"), Some("Pong"));
    assert_eq!(client.pending_actions(), 0);
}

#[tokio::test]
async fn login_sends_events_off_when_disabled() {
    let (login_tx, login_rx) = tokio::sync::oneshot::channel();
    let port = spawn_server(|mut server| async move {
        let login = server
            .accept_login()
            .await;
        let _ = login_tx.send(login);
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let options = AmiConnectOptions {
        events: false,
        ..AmiConnectOptions::default()
    };
    let _client = AmiClient::connect_with_options("127.0.0.1", port, "admin", "secret", options)
        .await
        .unwrap();
    let login = login_rx
        .await
        .unwrap();
    assert_eq!(field(&login, "Username"), Some("admin"));
    assert_eq!(field(&login, "Secret"), Some("secret"));
    assert_eq!(field(&login, "Events"), Some("off"));
}

#[tokio::test]
async fn hangup_routed_to_handler_and_others_to_fallback() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        // wait for the client to finish registering handlers
        let ping = server
            .read_action()
            .await;
        let id = field(&ping, "ActionID")
            .unwrap()
            .to_string();
        server
            .send("Event: Newchannel\r\nChannel: SIP/100-00000001\r\nChannelState: 0\r\n\r\n")
            .await;
        server
            .send("Event: Hangup\r\nChannel: SIP/100-00000001\r\nCause: 16\r\nCause-txt: Normal Clearing\r\n\r\n")
            .await;
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\nPing: Pong\r\n\r\n", id))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    let hangups = Arc::new(Mutex::new(Vec::new()));
    let fallback_calls = Arc::new(AtomicUsize::new(0));

    let seen = hangups.clone();
    client.register_handler("Hangup", move |event: &AmiEvent| {
        seen.lock()
            .unwrap()
            .push((
                event
                    .channel()
                    .map(str::to_string),
                event.hangup_cause(),
            ));
        Ok(())
    });
    let counter = fallback_calls.clone();
    client.register_fallback_handler(move |event: &AmiEvent| {
        assert_eq!(event.name(), "Newchannel");
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    // events precede the response on the wire, so they are dispatched first
    client
        .ping()
        .await
        .unwrap();
    assert_eq!(
        *hangups
            .lock()
            .unwrap(),
        vec![(Some("SIP/100-00000001".to_string()), Some(16))]
    );
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn login_failure_leaves_disconnected_state() {
    let port = spawn_server(|mut server| async move {
        let login = server
            .read_action()
            .await;
        let id = field(&login, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!(
                "Response: Error\r\nActionID: {}\r\nMessage: Authentication failed\r\n\r\n",
                id
            ))
            .await;
    })
    .await;

    let (state_tx, state_rx) =
        watch::channel(ConnectionState::Disconnected(DisconnectReason::NotStarted));
    let err = AmiClient::connect_observed(
        "127.0.0.1",
        port,
        "admin",
        "wrong",
        AmiConnectOptions::default(),
        state_tx,
    )
    .await
    .unwrap_err();
    match err {
        AmiError::AuthenticationFailed { message } => assert_eq!(message, "Authentication failed"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(
        *state_rx.borrow(),
        ConnectionState::Disconnected(DisconnectReason::AuthenticationFailed)
    );
}

#[tokio::test]
async fn responses_without_action_id_match_in_order() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let first = server
            .read_action()
            .await;
        let second = server
            .read_action()
            .await;
        assert_eq!(field(&first, "Variable"), Some("FIRST"));
        assert_eq!(field(&second, "Variable"), Some("SECOND"));
        server
            .send("Response: Success\r\nVariable: FIRST\r\nValue: one\r\n\r\n")
            .await;
        server
            .send("Response: Success\r\nVariable: SECOND\r\nValue: two\r\n\r\n")
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    let first = client.send_action(AmiAction::getvar(None, "FIRST"));
    let second = async {
        // make sure FIRST is written before SECOND
        tokio::time::sleep(Duration::from_millis(50)).await;
        client
            .send_action(AmiAction::getvar(None, "SECOND"))
            .await
    };
    let (first, second) = tokio::join!(first, second);
    assert_eq!(
        first
            .unwrap()
            .variable_value("FIRST"),
        Some("one".to_string())
    );
    assert_eq!(
        second
            .unwrap()
            .variable_value("SECOND"),
        Some("two".to_string())
    );
}

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let a = server
            .read_action()
            .await;
        let b = server
            .read_action()
            .await;
        let id_a = field(&a, "ActionID")
            .unwrap()
            .to_string();
        let id_b = field(&b, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\nValue: {}\r\n\r\n", id_b, field(&b, "Variable").unwrap()))
            .await;
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\nValue: {}\r\n\r\n", id_a, field(&a, "Variable").unwrap()))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    let (a, b) = tokio::join!(
        client.getvar(None, "ALPHA"),
        client.getvar(None, "BRAVO")
    );
    assert_eq!(a.unwrap(), Some("ALPHA".to_string()));
    assert_eq!(b.unwrap(), Some("BRAVO".to_string()));
}

#[tokio::test]
async fn command_follows_payload() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let cmd = server
            .read_action()
            .await;
        assert_eq!(field(&cmd, "Command"), Some("core show version"));
        let id = field(&cmd, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!(
                "Response: Follows\r\nPrivilege: Command\r\nActionID: {}\r\nAsterisk 1.8.32 built by root\r\nsecond line: with colon\r\n--END COMMAND--\r\n\r\n",
                id
            ))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    let output = client
        .command("core show version")
        .await
        .unwrap();
    assert_eq!(
        output,
        vec![
            "Asterisk 1.8.32 built by root".to_string(),
            "second line: with colon".to_string()
        ]
    );
}

#[tokio::test]
async fn status_collects_event_list() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let status = server
            .read_action()
            .await;
        assert_eq!(field(&status, "Action"), Some("Status"));
        let id = field(&status, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\nMessage: Channel status will follow\r\n\r\n", id))
            .await;
        server
            .send(&format!("Event: Status\r\nActionID: {}\r\nChannel: SIP/100-1\r\nState: Up\r\n\r\n", id))
            .await;
        server
            .send(&format!("Event: Status\r\nActionID: {}\r\nChannel: SIP/200-2\r\nState: Ring\r\n\r\n", id))
            .await;
        server
            .send(&format!("Event: StatusComplete\r\nActionID: {}\r\nItems: 2\r\n\r\n", id))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = dispatched.clone();
    client.register_fallback_handler(move |_: &AmiEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let channels = client
        .status(None)
        .await
        .unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(
        channels["SIP/200-2"].channel_state(),
        Some(asterisk_manager_tokio::ChannelState::Ring)
    );
    assert_eq!(dispatched.load(Ordering::SeqCst), 0, "list events are not dispatched");
}

#[tokio::test]
async fn action_error_reaches_only_its_caller() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let hangup = server
            .read_action()
            .await;
        let id = field(&hangup, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!("Response: Error\r\nActionID: {}\r\nMessage: No such channel\r\n\r\n", id))
            .await;
        let ping = server
            .read_action()
            .await;
        let id = field(&ping, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\nPing: Pong\r\n\r\n", id))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    match client
        .hangup("SIP/nobody-1")
        .await
    {
        Err(AmiError::ActionFailed { message }) => assert_eq!(message, "No such channel"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(client.is_connected());
    client
        .ping()
        .await
        .unwrap();
}

#[tokio::test]
async fn server_close_fails_pending_actions() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let _ = server
            .read_action()
            .await;
        // drop the connection without answering
    })
    .await;

    let client = connect(port).await;
    let err = client
        .send_action(AmiAction::new("WaitEvent"))
        .await
        .unwrap_err();
    assert!(err.is_connection_error(), "unexpected {:?}", err);
    assert_eq!(
        client
            .wait_disconnected()
            .await,
        DisconnectReason::ConnectionClosed
    );
    assert!(matches!(
        client
            .send_action(AmiAction::ping())
            .await,
        Err(AmiError::NotConnected)
    ));
}

#[tokio::test]
async fn action_timeout_then_late_reply_ignored() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let slow = server
            .read_action()
            .await;
        let ping = server
            .read_action()
            .await;
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\n\r\n", field(&slow, "ActionID").unwrap()))
            .await;
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\nPing: Pong\r\n\r\n", field(&ping, "ActionID").unwrap()))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    client.set_action_timeout(Duration::from_millis(200));
    let err = client
        .send_action(AmiAction::new("SlowAction"))
        .await
        .unwrap_err();
    assert!(matches!(err, AmiError::Timeout { timeout_ms: 200 }));

    client.set_action_timeout(Duration::from_secs(5));
    client
        .ping()
        .await
        .unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn handler_failure_disconnects_under_policy() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let ping = server
            .read_action()
            .await;
        let id = field(&ping, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!("Response: Success\r\nActionID: {}\r\n\r\n", id))
            .await;
        server
            .send("Event: Hangup\r\nChannel: SIP/100-1\r\n\r\n")
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let options = AmiConnectOptions {
        handler_errors: HandlerErrorPolicy::Disconnect,
        ..AmiConnectOptions::default()
    };
    let client = AmiClient::connect_with_options("127.0.0.1", port, "admin", "secret", options)
        .await
        .unwrap();
    client.register_handler("Hangup", |_: &AmiEvent| Err("database unavailable".into()));
    client
        .ping()
        .await
        .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), client.wait_disconnected())
        .await
        .unwrap();
    assert!(matches!(reason, DisconnectReason::HandlerFailed(_)));
}

#[tokio::test]
async fn disconnect_sends_logoff() {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        let logoff = server
            .read_action()
            .await;
        assert_eq!(field(&logoff, "Action"), Some("Logoff"));
        let id = field(&logoff, "ActionID")
            .unwrap()
            .to_string();
        server
            .send(&format!(
                "Response: Goodbye\r\nActionID: {}\r\nMessage: Thanks for all the fish.\r\n\r\n",
                id
            ))
            .await;
        let _ = done_tx.send(());
    })
    .await;

    let client = connect(port).await;
    client
        .disconnect()
        .await
        .unwrap();
    done_rx
        .await
        .unwrap();
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), client.wait_disconnected())
            .await
            .unwrap(),
        DisconnectReason::ClientRequested
    );
}

#[tokio::test]
async fn login_reply_matched_by_action_id() {
    let port = spawn_server(|mut server| async move {
        let login = server
            .read_action()
            .await;
        let id = field(&login, "ActionID")
            .unwrap()
            .to_string();
        server
            .send("Response: Error\r\nActionID: someone-else-7\r\nMessage: Authentication failed\r\n\r\n")
            .await;
        server
            .send(&format!(
                "Response: Success\r\nActionID: {}\r\nMessage: Authentication accepted\r\n\r\n",
                id
            ))
            .await;
        let _ = server
            .read_action()
            .await;
    })
    .await;

    let client = connect(port).await;
    assert!(client.is_connected());
    assert_eq!(client.pending_actions(), 0);
}

#[tokio::test]
async fn silent_server_trips_liveness_timeout() {
    let port = spawn_server(|mut server| async move {
        server
            .accept_login()
            .await;
        // read but never answer
        while !server
            .read_action()
            .await
            .is_empty()
        {}
    })
    .await;

    let options = AmiConnectOptions {
        action_timeout: Duration::from_secs(30),
        liveness_timeout: Some(Duration::from_millis(300)),
        ..AmiConnectOptions::default()
    };
    let client = AmiClient::connect_with_options("127.0.0.1", port, "admin", "secret", options)
        .await
        .unwrap();
    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_action(AmiAction::ping())
                .await
        })
    };

    let reason = tokio::time::timeout(Duration::from_secs(10), client.wait_disconnected())
        .await
        .unwrap();
    assert_eq!(reason, DisconnectReason::HeartbeatExpired);
    assert_eq!(
        client.state(),
        ConnectionState::Disconnected(DisconnectReason::HeartbeatExpired)
    );

    let err = pending
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_connection_error(), "unexpected {:?}", err);
    assert_eq!(client.pending_actions(), 0);
}

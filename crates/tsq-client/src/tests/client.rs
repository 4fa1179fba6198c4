//! Client façade tests over the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use rstest::rstest;
use tsq_config::{ClientConfig, CorrelationMode, DispatchPolicy};
use tsq_proto::schema::TextMessage;
use tsq_proto::{Command, CommandError, ErrorCode};

use crate::tests::support::{
    FailingLineSink, WAIT, connect_pair, eventually, line_pair, return_code_of, test_config,
};
use crate::{
    Client, ClientError, MessageTarget, TransferNegotiator, TransportError, UploadRequest,
};

fn upload_request() -> UploadRequest<'static> {
    UploadRequest {
        client_transfer_id: 3,
        path: "/docs/a.txt",
        channel_id: 1,
        channel_password: None,
        size: 10,
        overwrite: true,
        resume: false,
    }
}

#[rstest]
#[case::sync(CorrelationMode::Sync)]
#[case::async_mode(CorrelationMode::Async)]
fn disconnect_releases_pending_requests(#[case] mode: CorrelationMode) {
    let (client, server) = connect_pair(&test_config(mode));
    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.client_list())
    };
    server.expect_command("clientlist");

    client.disconnect();

    let error = caller
        .join()
        .expect("caller thread")
        .expect_err("request should be dropped");
    assert!(error.is_timeout());
    assert!(client.pending().is_empty());
    assert!(!client.is_connected());
}

#[test]
fn commands_after_disconnect_fail_fast() {
    let (client, _server) = connect_pair(&test_config(CorrelationMode::Sync));
    client.disconnect();

    assert!(matches!(client.whoami(), Err(ClientError::NotConnected)));
}

#[test]
fn server_close_publishes_disconnect_once() {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Sync));
    let count = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&count);
    client.events().on_disconnect(move || {
        observed.fetch_add(1, Ordering::SeqCst);
    });

    server.close();

    assert!(eventually(|| count.load(Ordering::SeqCst) == 1));
    assert!(!client.is_connected());
    client.disconnect();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn notifications_reach_subscribers_on_the_dispatch_thread() {
    let config = ClientConfig {
        dispatch: DispatchPolicy::DedicatedThread,
        ..test_config(CorrelationMode::Sync)
    };
    let (client, server) = connect_pair(&config);
    let (tx, rx) = channel::unbounded();
    client.events().text_message().on_each(move |message: &TextMessage| {
        let thread_name = thread::current().name().map(str::to_owned);
        drop(tx.send((message.message.clone(), thread_name)));
    });

    server.feed("notifytextmessage targetmode=3 msg=hello\\sthere invokerid=7 invokername=bob");

    let (text, thread_name) = rx.recv_timeout(WAIT).expect("handler should run");
    assert_eq!(text, "hello there");
    assert_eq!(thread_name.as_deref(), Some("tsq-dispatch-0"));
}

#[test]
fn async_error_without_return_code_is_an_event() {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Async));
    let (tx, rx) = channel::unbounded();
    client
        .events()
        .command_error()
        .on_each(move |error: &CommandError| drop(tx.send(error.id)));

    server.feed("error id=520 msg=invalid\\sloginname\\sor\\spassword");

    assert_eq!(rx.recv_timeout(WAIT).expect("event"), ErrorCode(520));
    assert!(client.pending().is_empty());
}

#[test]
fn fire_and_forget_commands_do_not_wait() {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Async));
    let command = Command::new("clientupdate")
        .with_param("client_nickname", "bot")
        .expects_response(false);

    let response = client.send(&command).expect("command should be written");

    assert!(response.raw().is_none());
    let line = server.next_line();
    assert_eq!(line, "clientupdate client_nickname=bot");
    assert_eq!(return_code_of(&line), None);
    assert!(client.pending().is_empty());
}

#[rstest]
#[case::sync(CorrelationMode::Sync)]
#[case::async_mode(CorrelationMode::Async)]
fn failed_write_leaves_no_request_behind(#[case] mode: CorrelationMode) {
    let (source, sink, server) = line_pair();
    let client = Arc::new(
        Client::with_transport(&test_config(mode), source, FailingLineSink::new(sink, 1))
            .expect("client should start"),
    );

    let error = client.whoami().expect_err("first write fails");
    assert!(matches!(error, ClientError::Transport(TransportError::Closed)));
    assert!(client.pending().is_empty());

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.client_list())
    };
    let line = server.expect_command("clientlist");
    let status = return_code_of(&line).map_or_else(
        || "error id=0 msg=ok".to_owned(),
        |code| format!("error id=0 msg=ok return_code={code}"),
    );
    server.feed("clid=1 cid=1 client_nickname=Ann");
    server.feed(&status);

    let clients = caller
        .join()
        .expect("caller thread")
        .expect("clientlist answered");
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].nickname, "Ann");
}

#[test]
fn request_deadline_runs_from_send() {
    let config = ClientConfig {
        command_timeout_ms: 100,
        ..test_config(CorrelationMode::Async)
    };
    let (client, server) = connect_pair(&config);
    let pending = client
        .send_async(&Command::new("clientlist"))
        .expect("command should be written");
    server.expect_command("clientlist");

    thread::sleep(Duration::from_millis(200));
    assert!(pending.is_ready());

    let started = Instant::now();
    let error = pending.wait().expect_err("deadline already passed");
    assert!(error.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[rstest]
#[case::client(MessageTarget::Client(4), "sendtextmessage targetmode=1 target=4 msg=hi\\sall")]
#[case::channel(MessageTarget::Channel, "sendtextmessage targetmode=2 target=0 msg=hi\\sall")]
#[case::server(MessageTarget::Server, "sendtextmessage targetmode=3 target=0 msg=hi\\sall")]
fn text_messages_render_their_target(#[case] target: MessageTarget, #[case] expected: &str) {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Sync));
    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send_text_message(target, "hi all"))
    };

    assert_eq!(server.next_line(), expected);
    server.feed("error id=0 msg=ok");

    caller
        .join()
        .expect("caller thread")
        .expect("message should be accepted");
}

#[test]
fn client_negotiates_uploads_over_the_query_connection() {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Sync));
    let responder = server.serve(|line| {
        if line.starts_with("ftinitupload ") && line.contains("name=\\/docs\\/a.txt") {
            vec![
                "clientftfid=3 serverftfid=9 ftkey=abc port=30033 seekpos=0".to_owned(),
                "error id=0 msg=ok".to_owned(),
            ]
        } else {
            vec!["error id=256 msg=command\\snot\\sfound".to_owned()]
        }
    });

    let reply = client
        .init_upload(&upload_request())
        .expect("upload should negotiate");

    assert_eq!(reply.server_transfer_id, 9);
    assert_eq!(reply.key, "abc");
    assert_eq!(reply.port, 30033);
    client.disconnect();
    responder.join().expect("responder thread");
}

#[test]
fn refusal_inside_the_data_line_is_an_error() {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Sync));
    let responder = server.serve(|_| {
        vec![
            "clientftfid=3 size=0 status=2050 msg=file\\salready\\sexists".to_owned(),
            "error id=0 msg=ok".to_owned(),
        ]
    });

    let error = client
        .init_upload(&upload_request())
        .expect_err("refusal should surface");

    let status = error.command_error().expect("server error");
    assert_eq!(status.id, ErrorCode(2050));
    assert_eq!(status.message, "file already exists");
    client.disconnect();
    responder.join().expect("responder thread");
}

#[test]
fn channel_create_returns_the_announced_channel() {
    let (client, server) = connect_pair(&test_config(CorrelationMode::Sync));
    let responder = server.serve(|line| {
        if line.starts_with("channelcreate ") {
            vec![
                "cid=12".to_owned(),
                "error id=0 msg=ok".to_owned(),
                "notifychannelcreated cid=12 cpid=0 channel_name=lobby invokerid=1".to_owned(),
            ]
        } else {
            Vec::new()
        }
    });

    let created = client
        .channel_create("lobby", None)
        .expect("channel should be created");

    assert_eq!(created.channel_id, 12);
    assert_eq!(created.name, "lobby");
    client.disconnect();
    responder.join().expect("responder thread");
}

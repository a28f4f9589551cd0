use super::*;
use crate::context::recording::{RecordedObject, RecordingContext};
use crate::context::value::{ArgValue, HandleRef};
use crate::foundation::ids::CallId;
use crate::proxy::message::FaultKind;
use serde_json::json;

type Host = ContextHost<RecordingContext>;

fn setup(policy: CommandPolicy) -> (ClientProxy, Host, mpsc::UnboundedReceiver<ProxyMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let proxy = ClientProxy::new(ClientId(1), tx, Rc::new(policy));
    (proxy, ContextHost::new(RecordingContext::webgl_like()), rx)
}

fn call(id: u64, op: &str, args: Vec<WireValue>) -> ClientMessage {
    ClientMessage::Call(CommandMessage::new(ClientId(1), CallId(id), op, args))
}

fn num(v: f64) -> WireValue {
    WireValue::Value(json!(v))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ProxyMessage>) -> Vec<ProxyMessage> {
    let mut out = Vec::new();
    while let Ok(m) = rx.try_recv() {
        out.push(m);
    }
    out
}

fn reply_ids(msgs: &[ProxyMessage]) -> Vec<u64> {
    msgs.iter()
        .filter_map(|m| match m {
            ProxyMessage::Reply { call_id, .. } => Some(call_id.0),
            _ => None,
        })
        .collect()
}

#[test]
fn immediate_commands_reply_in_order() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());

    for (id, op) in [(1, "viewport"), (2, "enable"), (3, "getError")] {
        let d = proxy.on_incoming_message(&mut host, call(id, op, vec![num(0.0)]));
        assert_eq!(d, Delivery::Executed);
    }

    let msgs = drain(&mut rx);
    assert_eq!(reply_ids(&msgs), vec![1, 2, 3]);
    assert_eq!(
        msgs[2],
        ProxyMessage::Reply {
            call_id: CallId(3),
            result: WireValue::Value(json!(0)),
            error: None,
        }
    );
    assert_eq!(
        host.context().op_names(),
        vec!["viewport", "enable", "getError"]
    );
}

#[test]
fn messages_for_other_clients_are_ignored() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());
    let other = ClientMessage::Call(CommandMessage::new(ClientId(2), CallId(1), "viewport", vec![]));

    assert_eq!(proxy.on_incoming_message(&mut host, other), Delivery::Ignored);
    assert_eq!(
        proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(2) }),
        Delivery::Ignored
    );
    assert!(drain(&mut rx).is_empty());
    assert!(host.context().invocations().is_empty());
}

#[test]
fn buffered_commands_replay_in_submission_order_without_replies() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());
    let _ticket = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    assert!(proxy.is_buffering());

    let ops = ["bindBuffer", "bufferData", "drawArrays", "uniform1f", "viewport"];
    for (i, op) in ops.iter().enumerate() {
        let d = proxy.on_incoming_message(&mut host, call(10 + i as u64, op, vec![]));
        assert_eq!(d, Delivery::Buffered);
    }
    assert!(host.context().invocations().is_empty());

    let replayed = proxy.execute_frame_commands(&mut host);
    assert_eq!(replayed, ops.len());
    assert!(!proxy.is_buffering());
    assert!(proxy.pending().is_empty());
    assert_eq!(host.context().op_names(), ops.to_vec());

    let msgs = drain(&mut rx);
    assert!(matches!(msgs[0], ProxyMessage::ProduceFrame { frame: FrameSeq(1), .. }));
    assert!(reply_ids(&msgs).is_empty());
}

#[tokio::test]
async fn frame_end_resolves_the_outstanding_ticket() {
    let (mut proxy, mut host, _rx) = setup(CommandPolicy::default());
    let ticket = proxy.get_frame_commands(FrameSeq(4)).unwrap();
    assert!(proxy.has_outstanding_frame());

    let d = proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    assert_eq!(d, Delivery::FrameCompleted);
    assert!(!proxy.has_outstanding_frame());
    // still buffering until replay
    assert!(proxy.is_buffering());
    assert_eq!(ticket.wait().await, (ClientId(1), true));
}

#[test]
fn frame_end_without_request_is_dropped() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());
    let d = proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    assert_eq!(d, Delivery::Dropped);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn only_one_frame_request_may_be_outstanding() {
    let (mut proxy, _host, _rx) = setup(CommandPolicy::default());
    let _first = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    let err = proxy.get_frame_commands(FrameSeq(2)).unwrap_err();
    assert!(matches!(
        err,
        GlmuxError::FrameAlreadyRequested {
            client: ClientId(1)
        }
    ));
}

#[test]
fn state_command_is_reasserted_before_next_frames_commands() {
    let (mut proxy, mut host, _rx) = setup(CommandPolicy::default());

    proxy.on_incoming_message(&mut host, call(1, "createProgram", vec![]));
    let program = WireValue::Handle(HandleRef::new(CallId(1)));
    proxy.on_incoming_message(&mut host, call(2, "useProgram", vec![program]));

    // first buffered frame: only fresh commands plus the re-seeded state
    let _t = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    proxy.on_incoming_message(&mut host, call(3, "drawArrays", vec![]));
    proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    host.context_mut().take_invocations();
    proxy.execute_frame_commands(&mut host);
    assert_eq!(host.context().op_names(), vec!["useProgram", "drawArrays"]);

    // next frame re-applies it again, ahead of that frame's commands
    let _t = proxy.get_frame_commands(FrameSeq(2)).unwrap();
    proxy.on_incoming_message(&mut host, call(4, "uniform1f", vec![]));
    proxy.on_incoming_message(&mut host, call(5, "drawArrays", vec![]));
    host.context_mut().take_invocations();
    proxy.execute_frame_commands(&mut host);
    assert_eq!(
        host.context().op_names(),
        vec!["useProgram", "uniform1f", "drawArrays"]
    );

    let args = &host.context().invocations()[0].args;
    let obj = args[0].as_object().unwrap();
    assert!(obj.ptr_eq(proxy.handles().get(CallId(1)).unwrap()));
}

#[test]
fn handle_round_trip_resolves_to_the_identical_object() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());

    proxy.on_incoming_message(&mut host, call(7, "createBuffer", vec![]));
    let msgs = drain(&mut rx);
    let handle = match &msgs[0] {
        ProxyMessage::Reply {
            result: WireValue::Handle(h),
            ..
        } => *h,
        other => panic!("expected handle reply, got {other:?}"),
    };
    assert_eq!(handle.key, CallId(7));

    proxy.on_incoming_message(
        &mut host,
        call(8, "bindBuffer", vec![num(34962.0), WireValue::Handle(handle)]),
    );

    let inv = &host.context().invocations()[1];
    assert_eq!(inv.op, "bindBuffer");
    assert_eq!(inv.args[0].as_f64(), Some(34962.0));
    let ArgValue::Object(obj) = &inv.args[1] else {
        panic!("expected an object argument");
    };
    let stored = proxy.handles().get(CallId(7)).unwrap();
    assert!(obj.ptr_eq(stored));
    assert_eq!(obj.downcast_ref::<RecordedObject>().unwrap().kind, "Buffer");
}

#[test]
fn blacklisted_operations_never_reach_the_context() {
    let policy = CommandPolicy::new(["clear", "viewport"], ["useProgram"], RejectionMode::Silent);
    let (mut proxy, mut host, mut rx) = setup(policy);

    for name in ["clear", "viewport"] {
        proxy.on_incoming_message(&mut host, call(1, name, vec![num(16640.0)]));
        let _t = proxy.get_frame_commands(FrameSeq(1)).unwrap();
        proxy.on_incoming_message(&mut host, call(2, name, vec![]));
        proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
        proxy.execute_frame_commands(&mut host);
    }

    assert!(host.context().invocations().is_empty());
    assert_eq!(proxy.stats().rejected, 4);
    let silent = drain(&mut rx).into_iter().all(|m| match m {
        ProxyMessage::Reply { result, error, .. } => result == WireValue::null() && error.is_none(),
        _ => true,
    });
    assert!(silent);
}

#[test]
fn unknown_operations_are_rejected_without_invoking_anything() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::new(
        ["clear"],
        ["useProgram"],
        RejectionMode::Report,
    ));

    let d = proxy.on_incoming_message(&mut host, call(1, "launchMissiles", vec![]));
    assert_eq!(d, Delivery::Executed);
    proxy.on_incoming_message(&mut host, call(2, "clear", vec![]));
    proxy.on_incoming_message(
        &mut host,
        call(3, "bindBuffer", vec![WireValue::Handle(HandleRef::new(CallId(99)))]),
    );
    assert!(host.context().invocations().is_empty());

    let kinds: Vec<FaultKind> = drain(&mut rx)
        .into_iter()
        .filter_map(|m| match m {
            ProxyMessage::Reply { error, .. } => error.map(|e| e.kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            FaultKind::UnsupportedOperation,
            FaultKind::ForbiddenOperation,
            FaultKind::UnknownHandle
        ]
    );
}

#[test]
fn context_failures_are_contained() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());
    host.context_mut().fail_on("linkProgram");

    let _t = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    proxy.on_incoming_message(&mut host, call(1, "linkProgram", vec![]));
    proxy.on_incoming_message(&mut host, call(2, "drawArrays", vec![]));
    assert_eq!(proxy.execute_frame_commands(&mut host), 2);

    assert_eq!(host.context().op_names(), vec!["linkProgram", "drawArrays"]);
    assert_eq!(proxy.stats().rejected, 1);
    assert_eq!(proxy.stats().executed, 1);
    drain(&mut rx);
}

#[tokio::test]
async fn abandoning_a_frame_discards_the_partial_batch() {
    let (mut proxy, mut host, _rx) = setup(CommandPolicy::default());
    let ticket = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    proxy.on_incoming_message(&mut host, call(1, "drawArrays", vec![]));

    assert_eq!(proxy.abandon_frame(), 1);
    assert!(!proxy.is_buffering());
    assert!(!proxy.has_outstanding_frame());
    assert_eq!(ticket.wait().await, (ClientId(1), false));

    // a fresh request is allowed again
    assert!(proxy.get_frame_commands(FrameSeq(2)).is_ok());
}

#[test]
fn late_batch_after_abandon_never_runs_immediately() {
    let (mut proxy, mut host, mut rx) = setup(CommandPolicy::default());
    let _ticket = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    proxy.abandon_frame();
    assert!(proxy.is_draining());
    drain(&mut rx);

    let d = proxy.on_incoming_message(&mut host, call(1, "drawArrays", vec![]));
    assert_eq!(d, Delivery::Discarded);
    let d = proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    assert_eq!(d, Delivery::Discarded);
    assert!(!proxy.is_draining());
    assert!(host.context().invocations().is_empty());
    assert!(drain(&mut rx).is_empty());

    let d = proxy.on_incoming_message(&mut host, call(2, "getError", vec![]));
    assert_eq!(d, Delivery::Executed);
    assert_eq!(reply_ids(&drain(&mut rx)), vec![2]);
}

#[tokio::test]
async fn late_frame_end_does_not_complete_the_next_request() {
    let (mut proxy, mut host, _rx) = setup(CommandPolicy::default());
    let _first = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    proxy.abandon_frame();

    let second = proxy.get_frame_commands(FrameSeq(2)).unwrap();
    proxy.on_incoming_message(&mut host, call(1, "drawArrays", vec![num(111.0)]));
    proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    assert!(proxy.has_outstanding_frame());
    assert!(proxy.pending().is_empty());

    let d = proxy.on_incoming_message(&mut host, call(2, "drawArrays", vec![num(222.0)]));
    assert_eq!(d, Delivery::Buffered);
    let d = proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    assert_eq!(d, Delivery::FrameCompleted);
    assert_eq!(second.wait().await, (ClientId(1), true));

    assert_eq!(proxy.execute_frame_commands(&mut host), 1);
    let inv = host.context().invocations();
    assert_eq!(inv.len(), 1);
    assert_eq!(inv[0].args[0].as_f64(), Some(222.0));
}

#[test]
fn abandoning_after_frame_end_leaves_nothing_to_drain() {
    let (mut proxy, mut host, _rx) = setup(CommandPolicy::default());
    let _ticket = proxy.get_frame_commands(FrameSeq(1)).unwrap();
    proxy.on_incoming_message(&mut host, ClientMessage::FrameEnd { client_id: ClientId(1) });
    proxy.abandon_frame();
    assert!(!proxy.is_draining());

    let d = proxy.on_incoming_message(&mut host, call(1, "getError", vec![]));
    assert_eq!(d, Delivery::Executed);
}

#[test]
fn frame_request_to_a_closed_endpoint_fails_cleanly() {
    let (mut proxy, _host, rx) = setup(CommandPolicy::default());
    drop(rx);
    let err = proxy.get_frame_commands(FrameSeq(1)).unwrap_err();
    assert!(matches!(err, GlmuxError::Transport(_)));
    assert!(!proxy.is_buffering());
    assert!(!proxy.has_outstanding_frame());
}

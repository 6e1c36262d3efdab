use std::thread;
use std::time::Duration;

use msgpack_wire::{Decoder, Value, encode};
use test_timeout::timeout;
use tidepool::clipboard::{COPY_METHOD, ClipboardBridge, MemoryClipboard, PASTE_METHOD};
use tidepool::config::Config;
use tidepool::render::RenderMode;
use tidepool::rpc::RequestResponder;
use tidepool::session::{FrameOutput, Session, SessionEvent};

fn s(text: &str) -> Value {
    Value::from(text)
}

fn i(n: i64) -> Value {
    Value::from(n)
}

fn arr(items: Vec<Value>) -> Value {
    Value::Array(items)
}

/// `[2, "redraw", [[name, tuple...], ...]]`
fn redraw(events: Vec<Value>) -> Vec<u8> {
    encode(&arr(vec![i(2), s("redraw"), arr(events)])).unwrap()
}

fn event(name: &str, tuples: Vec<Vec<Value>>) -> Value {
    let mut items = vec![s(name)];
    items.extend(tuples.into_iter().map(arr));
    arr(items)
}

fn line(row: i64, col: i64, text: &str) -> Value {
    let cells = text.chars().map(|c| arr(vec![s(&c.to_string())])).collect();
    event("grid_line", vec![vec![i(1), i(row), i(col), arr(cells)]])
}

fn text_config(cols: u16, rows: u16) -> Config {
    Config {
        cols,
        rows,
        render_mode: RenderMode::Text,
        ..Config::default()
    }
}

fn text_frames(events: &[SessionEvent]) -> Vec<Vec<String>> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Frame(frame) => match &frame.output {
                FrameOutput::Text(lines) => Some(lines.clone()),
                FrameOutput::Ansi(_) => None,
            },
            _ => None,
        })
        .collect()
}

fn decode_sent(bytes: &[u8]) -> Vec<Value> {
    let mut decoder = Decoder::new();
    decoder.push_collect(bytes).unwrap()
}

#[test]
fn redraw_with_flush_produces_one_frame() {
    let mut session = Session::new(&text_config(8, 2), Vec::new());
    let bytes = redraw(vec![
        event("grid_resize", vec![vec![i(1), i(5), i(2)]]),
        line(0, 0, "hello"),
        line(1, 1, "ok"),
        event("grid_cursor_goto", vec![vec![i(1), i(1), i(3)]]),
        event("flush", vec![vec![]]),
    ]);

    let events = session.feed_output(&bytes);
    let frames = text_frames(&events);
    assert_eq!(frames, vec![vec!["hello".to_owned(), " ok  ".to_owned()]]);
    match &events[0] {
        SessionEvent::Frame(frame) => {
            assert_eq!((frame.cursor.row, frame.cursor.col), (1, 3));
        }
        other => panic!("expected a frame, got {other:?}"),
    }
    assert_eq!(session.stats().frames_rendered, 1);
    assert_eq!(session.stats().messages_in, 1);
}

#[test]
fn batch_without_flush_still_renders() {
    let mut session = Session::new(&text_config(3, 1), Vec::new());
    let events = session.feed_output(&redraw(vec![line(0, 0, "abc")]));
    assert_eq!(text_frames(&events), vec![vec!["abc".to_owned()]]);
}

#[test]
fn message_split_across_chunks_is_applied_once() {
    let mut session = Session::new(&text_config(4, 1), Vec::new());
    let bytes = redraw(vec![line(0, 0, "wxyz"), event("flush", vec![vec![]])]);

    let mut frames = Vec::new();
    for piece in bytes.chunks(3) {
        frames.extend(text_frames(&session.feed_output(piece)));
    }
    assert_eq!(frames, vec![vec!["wxyz".to_owned()]]);
    assert_eq!(session.stats().messages_in, 1);
}

#[test]
fn resize_discards_previous_content() {
    let mut session = Session::new(&text_config(4, 1), Vec::new());
    session.feed_output(&redraw(vec![line(0, 0, "abcd")]));
    let events = session.feed_output(&redraw(vec![event(
        "grid_resize",
        vec![vec![i(1), i(2), i(2)]],
    )]));
    assert_eq!(
        text_frames(&events),
        vec![vec!["  ".to_owned(), "  ".to_owned()]]
    );
    assert_eq!(session.grid().width(), 2);
}

#[test]
fn unknown_redraw_events_are_counted_not_fatal() {
    let mut session = Session::new(&text_config(2, 1), Vec::new());
    let events = session.feed_output(&redraw(vec![
        event("win_viewport", vec![vec![i(1), i(2)]]),
        line(0, 0, "ok"),
    ]));
    assert_eq!(text_frames(&events), vec![vec!["ok".to_owned()]]);
    assert_eq!(session.stats().redraw_events_ignored, 1);
}

#[test]
fn attach_sends_ui_attach_then_resize() {
    let mut session = Session::new(&text_config(80, 24), Vec::new());
    session.attach(100, 30).unwrap();

    let sent = decode_sent(session.sink());
    assert_eq!(sent.len(), 2);
    let attach = sent[0].as_array().unwrap();
    assert_eq!(attach[0], i(0));
    assert_eq!(attach[1], i(0));
    assert_eq!(attach[2], s("nvim_ui_attach"));
    let params = attach[3].as_array().unwrap();
    assert_eq!(params[0], i(100));
    assert_eq!(params[1], i(30));
    assert_eq!(params[2].map_get("rgb"), Some(&Value::from(true)));
    assert_eq!(params[2].map_get("ext_linegrid"), Some(&Value::from(true)));

    let resize = sent[1].as_array().unwrap();
    assert_eq!(resize[1], i(1));
    assert_eq!(resize[2], s("nvim_ui_try_resize"));
    assert_eq!(resize[3], arr(vec![i(100), i(30)]));
}

#[test]
fn input_uses_increasing_request_ids() {
    let mut session = Session::new(&text_config(80, 24), Vec::new());
    assert_eq!(session.input("ihello<Esc>").unwrap(), 0);
    assert_eq!(session.command("write").unwrap(), 1);

    let sent = decode_sent(session.sink());
    assert_eq!(
        sent[0],
        arr(vec![i(0), i(0), s("nvim_input"), arr(vec![s("ihello<Esc>")])])
    );
    assert_eq!(
        sent[1],
        arr(vec![i(0), i(1), s("nvim_command"), arr(vec![s("write")])])
    );
}

#[test]
fn peer_request_without_responder_is_reported() {
    let mut session = Session::new(&text_config(1, 1), Vec::new());
    let request = encode(&arr(vec![i(0), i(7), s("nvim_get_clipboard"), arr(vec![])])).unwrap();
    let events = session.feed_output(&request);
    assert_eq!(
        events,
        vec![SessionEvent::UnhandledRequest {
            id: 7,
            method: "nvim_get_clipboard".to_owned(),
        }]
    );
    assert!(session.sink().is_empty());
    assert_eq!(session.stats().unhandled_requests, 1);
}

#[test]
fn peer_request_with_responder_is_answered() {
    let mut session = Session::new(&text_config(1, 1), Vec::new());
    let responder: Box<dyn RequestResponder> = Box::new(|method: &str, _params: &Value| {
        if method == "ping" { Ok(s("pong")) } else { Err(s("unknown")) }
    });
    session.set_responder(Some(responder));
    let request = encode(&arr(vec![i(0), i(3), s("ping"), arr(vec![])])).unwrap();
    assert!(session.feed_output(&request).is_empty());

    let sent = decode_sent(session.sink());
    assert_eq!(sent, vec![arr(vec![i(1), i(3), Value::Nil, s("pong")])]);
}

#[test]
fn clipboard_copy_is_kept_and_served_to_paste_requests() {
    let mut session = Session::new(&text_config(1, 1), Vec::new());
    let id = session
        .enable_clipboard(ClipboardBridge::new(MemoryClipboard::default()))
        .unwrap();
    let sent = decode_sent(session.sink());
    let install = sent[0].as_array().unwrap();
    assert_eq!(install[1], Value::from(id));
    assert_eq!(install[2], s("nvim_exec_lua"));
    let script = install[3].as_array().unwrap()[0].as_str().unwrap();
    assert!(script.contains("vim.g.clipboard"), "{script}");

    let copy = encode(&arr(vec![
        i(2),
        s(COPY_METHOD),
        arr(vec![arr(vec![s("yanked"), s("text")]), s("V")]),
    ]))
    .unwrap();
    assert!(session.feed_output(&copy).is_empty());

    let paste = encode(&arr(vec![i(0), i(9), s(PASTE_METHOD), arr(vec![])])).unwrap();
    assert!(session.feed_output(&paste).is_empty());
    let sent = decode_sent(session.sink());
    assert_eq!(
        sent.last(),
        Some(&arr(vec![
            i(1),
            i(9),
            Value::Nil,
            arr(vec![arr(vec![s("yanked"), s("text")]), s("v")]),
        ]))
    );

    let other = encode(&arr(vec![i(2), s("nvim_buf_changedtick_event"), arr(vec![])])).unwrap();
    assert!(matches!(
        session.feed_output(&other).as_slice(),
        [SessionEvent::Notification { .. }]
    ));
}

#[test]
fn responses_are_matched_to_calls() {
    let mut session = Session::new(&text_config(1, 1), Vec::new());
    let id = session.call("nvim_get_mode", vec![]).unwrap();
    let response = encode(&arr(vec![i(1), Value::from(id), Value::Nil, s("n")])).unwrap();
    let events = session.feed_output(&response);
    assert_eq!(
        events,
        vec![SessionEvent::Response {
            id,
            method: Some("nvim_get_mode".to_owned()),
            error: Value::Nil,
            result: s("n"),
        }]
    );
}

#[test]
fn malformed_bytes_are_reported_and_the_stream_recovers() {
    let mut session = Session::new(&text_config(2, 1), Vec::new());
    let mut bytes = redraw(vec![line(0, 0, "ab")]);
    bytes.push(0xc1);
    let events = session.feed_output(&bytes);
    assert_eq!(text_frames(&events), vec![vec!["ab".to_owned()]]);
    assert!(matches!(events.last(), Some(SessionEvent::DecodeError(_))));
    assert_eq!(session.stats().decode_errors, 1);

    let events = session.feed_output(&redraw(vec![line(0, 0, "cd")]));
    assert_eq!(text_frames(&events), vec![vec!["cd".to_owned()]]);
}

#[test]
fn out_of_range_redraw_arguments_leave_the_grid_usable() {
    let mut session = Session::new(&text_config(3, 1), Vec::new());
    let max = Value::from(u64::MAX);
    let events = session.feed_output(&redraw(vec![
        event("set_scroll_region", vec![vec![i(0), max.clone(), i(0), i(3)]]),
        event("grid_resize", vec![vec![i(1), Value::from(u64::MAX - 1), i(0)]]),
        event("grid_resize", vec![vec![i(1), i(60_000), i(60_000)]]),
        line(0, 0, "abc"),
        event("flush", vec![vec![]]),
    ]));
    assert_eq!(text_frames(&events), vec![vec!["abc".to_owned()]]);
    assert_eq!((session.grid().width(), session.grid().height()), (3, 1));
}

#[test]
fn non_rpc_values_are_protocol_errors() {
    let mut session = Session::new(&text_config(1, 1), Vec::new());
    let events = session.feed_output(&encode(&s("hello")).unwrap());
    assert!(matches!(events.as_slice(), [SessionEvent::ProtocolError(_)]));
    assert_eq!(session.stats().protocol_errors, 1);
}

#[test]
fn ansi_frames_apply_highlights() {
    let config = Config {
        cols: 2,
        rows: 1,
        render_mode: RenderMode::Ansi,
        ..Config::default()
    };
    let mut session = Session::new(&config, Vec::new());
    let highlight = Value::Map(vec![(s("foreground"), i(0xff0000)), (s("bold"), Value::from(true))]);
    let events = session.feed_output(&redraw(vec![
        event("hl_attr_define", vec![vec![i(5), highlight]]),
        event(
            "grid_line",
            vec![vec![i(1), i(0), i(0), arr(vec![arr(vec![s("x"), i(5)]), arr(vec![s("y"), i(0)])])]],
        ),
    ]));
    let Some(SessionEvent::Frame(frame)) = events.first() else {
        panic!("expected a frame, got {events:?}");
    };
    let FrameOutput::Ansi(stream) = &frame.output else {
        panic!("expected ansi output");
    };
    assert!(stream.contains("\x1b[0;1;38;2;255;0;0mx"), "{stream:?}");
    assert!(stream.contains("\x1b[0my"), "{stream:?}");
}

#[test]
#[timeout(5)]
fn calls_reach_the_ring_consumer() {
    let (producer, consumer) = transport_ring::channel(1024).unwrap();
    let reader = thread::spawn(move || {
        let mut decoder = Decoder::new();
        let mut values = Vec::new();
        while values.len() < 2 {
            match consumer.read_blocking(256, Some(Duration::from_secs(2))) {
                Ok(bytes) => values.extend(decoder.push_collect(&bytes).unwrap()),
                Err(err) => panic!("ring read failed: {err}"),
            }
        }
        values
    });

    let mut session = Session::new(&text_config(80, 24), producer);
    session.attach(80, 24).unwrap();
    let values = reader.join().unwrap();
    assert_eq!(values[0].as_array().unwrap()[2], s("nvim_ui_attach"));
    assert_eq!(values[1].as_array().unwrap()[2], s("nvim_ui_try_resize"));
}

#[test]
fn full_ring_drops_bytes_without_failing_the_call() {
    let (producer, consumer) = transport_ring::channel(8).unwrap();
    let mut session = Session::new(&text_config(80, 24), producer);
    session.input("a long key sequence").unwrap();
    assert!(session.sink().dropped_bytes() > 0);
    assert_eq!(consumer.len(), 7);
}

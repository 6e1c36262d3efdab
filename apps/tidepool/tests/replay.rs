use msgpack_wire::{Value, encode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tidepool::config::Config;
use tidepool::host::replay::replay;
use tidepool::render::RenderMode;
use tidepool::session::FrameOutput;

fn s(text: &str) -> Value {
    Value::from(text)
}

fn i(n: i64) -> Value {
    Value::from(n)
}

fn arr(items: Vec<Value>) -> Value {
    Value::Array(items)
}

/// A short editor session: attach response, a few redraw batches, a mode
/// change and a stray notification.
fn capture() -> Vec<u8> {
    let messages = vec![
        arr(vec![i(1), i(0), Value::Nil, Value::Nil]),
        arr(vec![
            i(2),
            s("redraw"),
            arr(vec![
                arr(vec![s("grid_resize"), arr(vec![i(1), i(6), i(3)])]),
                arr(vec![
                    s("grid_line"),
                    arr(vec![i(1), i(0), i(0), arr(vec![arr(vec![s("-"), i(0), i(6)])])]),
                    arr(vec![
                        i(1),
                        i(1),
                        i(0),
                        arr(vec![arr(vec![s("t")]), arr(vec![s("i")]), arr(vec![s("d")]), arr(vec![s("e")])]),
                    ]),
                ]),
                arr(vec![s("grid_cursor_goto"), arr(vec![i(1), i(1), i(4)])]),
                arr(vec![s("flush")]),
            ]),
        ]),
        arr(vec![i(2), s("nvim_buf_changedtick_event"), arr(vec![i(1), i(2)])]),
        arr(vec![
            i(2),
            s("redraw"),
            arr(vec![
                arr(vec![s("mode_change"), arr(vec![s("insert"), i(1)])]),
                arr(vec![
                    s("grid_scroll"),
                    arr(vec![i(1), i(0), i(3), i(0), i(6), i(1), i(0)]),
                ]),
                arr(vec![s("flush")]),
            ]),
        ]),
    ];
    messages
        .iter()
        .flat_map(|message| encode(message).unwrap())
        .collect()
}

fn text_config() -> Config {
    Config {
        render_mode: RenderMode::Text,
        ..Config::default()
    }
}

#[test]
fn replay_renders_the_last_frame() {
    let outcome = replay(&capture(), 4096, &text_config());
    assert_eq!(
        outcome.frame.output,
        FrameOutput::Text(vec![
            "tide  ".to_owned(),
            "      ".to_owned(),
            "      ".to_owned(),
        ])
    );
    assert_eq!(outcome.frame.mode.name, "insert");
    assert_eq!(outcome.stats.messages_in, 4);
    assert_eq!(outcome.stats.frames_rendered, 2);
    assert_eq!(outcome.notifications, 1);
}

#[test]
fn chunk_size_does_not_change_the_result() {
    let bytes = capture();
    let whole = replay(&bytes, bytes.len(), &text_config());
    let mut rng = StdRng::seed_from_u64(0x71de);
    for _ in 0..20 {
        let chunk = rng.gen_range(1..=13);
        let outcome = replay(&bytes, chunk, &text_config());
        assert_eq!(outcome.frame, whole.frame, "chunk {chunk}");
        assert_eq!(outcome.stats, whole.stats, "chunk {chunk}");
    }
}

#[test]
fn empty_capture_renders_the_configured_grid() {
    let config = Config {
        cols: 3,
        rows: 2,
        ..text_config()
    };
    let outcome = replay(&[], 16, &config);
    assert_eq!(
        outcome.frame.output,
        FrameOutput::Text(vec!["   ".to_owned(), "   ".to_owned()])
    );
    assert_eq!(outcome.stats.frames_rendered, 0);
}

#[test]
fn zero_chunk_is_treated_as_one_byte() {
    let bytes = capture();
    let outcome = replay(&bytes, 0, &text_config());
    assert_eq!(outcome.stats.messages_in, 4);
}

//! Various tests of the terminal model and escape sequence
//! processing routines.

use super::*;


struct TestTerm {
    term: Terminal,
}

impl TestTerm {
    fn new(height: usize, width: usize) -> Self {
        Self { term: Terminal::new(height, width) }
    }

    fn print<B: AsRef<[u8]>>(&mut self, bytes: B) {
        self.term.advance_bytes(bytes);
    }

    /// Like `print`, but hands back the responses the stream produced.
    fn print_collect<B: AsRef<[u8]>>(&mut self, bytes: B) -> Vec<AnswerBack> {
        self.term.advance_bytes(bytes)
    }

    fn set_mode(&mut self, mode: &str, enable: bool) {
        self.print(CSI);
        self.print(mode);
        self.print(if enable { b"h" } else { b"l" });
    }

    fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        self.print(CSI);
        self.print(format!("{};{}r", top + 1, bottom + 1));
    }

    fn delete_lines(&mut self, n: usize) {
        self.print(CSI);
        self.print(format!("{}M", n));
    }

    fn cup(&mut self, col: isize, row: isize) {
        self.print(CSI);
        self.print(format!("{};{}H", row + 1, col + 1));
    }

    fn hvp(&mut self, col: isize, row: isize) {
        self.print(CSI);
        self.print(format!("{};{}f", row + 1, col + 1));
    }

    fn erase_in_display(&mut self, erase: DisplayErase) {
        let num = match erase {
            DisplayErase::Below => 0,
            DisplayErase::Above => 1,
            DisplayErase::All => 2,
        };
        self.print(format!("\x1b[{}J", num));
    }

    fn erase_in_line(&mut self, erase: LineErase) {
        let num = match erase {
            LineErase::ToRight => 0,
            LineErase::ToLeft => 1,
            LineErase::All => 2,
        };
        self.print(format!("\x1b[{}K", num));
    }

    fn assert_cursor_pos(&self, x: usize, y: usize, reason: Option<&str>) {
        let cursor = self.term.cursor_pos();
        let expect = CursorPosition { x, y };
        assert_eq!(
            cursor, expect,
            "actual cursor (left) didn't match expected cursor (right) reason={:?}",
            reason
        );
    }

    fn assert_dirty_lines(&self, expected: &[usize], reason: Option<&str>) {
        let dirty_indices: Vec<usize> =
            self.term.get_dirty_lines().iter().map(|&(i, ..)| i).collect();
        assert_eq!(
            &dirty_indices, &expected,
            "actual dirty lines (left) didn't match expected dirty lines (right) reason={:?}",
            reason
        );
    }

    /// The structural guarantees that must survive any input.
    fn assert_invariants(&self) {
        let term = &self.term;
        assert!(term.cursor.x < term.columns(), "cursor x {} out of grid", term.cursor.x);
        assert!(term.cursor.y < term.rows(), "cursor y {} out of grid", term.cursor.y);
        assert!(term.top <= term.bottom, "inverted scroll region");
        assert!(term.bottom < term.rows(), "scroll region outside the grid");
        assert_eq!(term.tabs.len(), term.columns());
        assert_eq!(term.screen.lines.len(), term.rows());
        assert_eq!(term.alt_screen.lines.len(), term.rows());
    }
}

impl Deref for TestTerm {
    type Target = Terminal;

    fn deref(&self) -> &Terminal {
        &self.term
    }
}

impl DerefMut for TestTerm {
    fn deref_mut(&mut self) -> &mut Terminal {
        &mut self.term
    }
}

/// Asserts that both line slices match according to the
/// selected flags.
fn assert_lines_equal(lines: &[Line], expect_lines: &[Line], compare: Compare) {
    for (idx, (line, expect)) in lines.iter().zip(expect_lines.iter()).enumerate() {
        if compare.contains(Compare::DIRTY) {
            assert_eq!(line.is_dirty(), expect.is_dirty(), "line {} dirty didn't match", idx);
        }

        if compare.contains(Compare::ATTRS) {
            let line_attrs: Vec<_> = line.cells.iter().map(|c| (c.attrs, c.fg, c.bg)).collect();
            let expect_attrs: Vec<_> = expect.cells.iter().map(|c| (c.attrs, c.fg, c.bg)).collect();
            assert_eq!(expect_attrs, line_attrs, "line {} attrs didn't match", idx);
        }

        if compare.contains(Compare::TEXT) {
            assert_eq!(line.as_str(), expect.as_str(), "line {} text didn't match", idx);
        }
    }

    assert_eq!(lines.len(), expect_lines.len(), "expectation has wrong number of lines");
}

bitflags! {
    struct Compare: u8 {
        const TEXT = 1;
        const ATTRS = 2;
        const DIRTY = 4;
    }
}

fn print_visible_lines(term: &Terminal) {
    println!("screen contents are:");
    for line in term.screen().visible_lines().iter() {
        println!("[{}]", line.as_str());
    }
}

/// Asserts that the visible lines of the terminal have the
/// same character contents as the expected lines.
/// The other cell attributes are not compared; this is
/// a convenience for writing visually understandable tests.
fn assert_visible_contents(term: &Terminal, expect_lines: &[&str]) {
    print_visible_lines(term);
    let expect: Vec<Line> = expect_lines.iter().map(|s| (*s).into()).collect();
    assert_lines_equal(term.screen().visible_lines(), &expect, Compare::TEXT);
}

#[test]
fn basic_output() {
    let mut term = TestTerm::new(5, 10);

    term.cup(1, 1);
    term.print("hello, world!");
    assert_visible_contents(
        &term,
        &["          ", " hello, wo", "rld!      ", "          ", "          "],
    );

    // ED 1 erases everything above plus the current row up to the
    // cursor
    term.cup(2, 2);
    term.erase_in_display(DisplayErase::Above);
    assert_visible_contents(
        &term,
        &["          ", "          ", "   !      ", "          ", "          "],
    );

    term.erase_in_line(LineErase::ToRight);
    assert_visible_contents(
        &term,
        &["          ", "          ", "          ", "          ", "          "],
    );
}

#[test]
fn print_marks_lines_dirty() {
    let mut term = TestTerm::new(2, 3);

    term.print("fooo.");
    assert_visible_contents(&term, &["foo", "o. "]);
    term.assert_cursor_pos(2, 1, None);
    term.assert_dirty_lines(&[0, 1], None);

    term.clean_dirty_lines();
    term.print("!");
    term.assert_dirty_lines(&[1], Some("only the written row is dirtied"));
}

#[test]
fn newline_scrolls_at_bottom() {
    let mut term = TestTerm::new(3, 3);
    term.print("a\r\nb\r\nc");
    assert_visible_contents(&term, &["a  ", "b  ", "c  "]);
    term.print("\r\n");
    assert_visible_contents(&term, &["b  ", "c  ", "   "]);
    term.assert_cursor_pos(0, 2, None);
}

#[test]
fn test_delete_lines() {
    let mut term = TestTerm::new(5, 3);

    term.print("111\r\n222\r\n333\r\n444\r\n555");
    assert_visible_contents(&term, &["111", "222", "333", "444", "555"]);
    term.cup(0, 1);
    term.clean_dirty_lines();

    term.delete_lines(2);
    assert_visible_contents(&term, &["111", "444", "555", "   ", "   "]);
    term.assert_dirty_lines(&[1, 2, 3, 4], None);

    // refill, then test with a scroll region smaller than the screen
    term.cup(0, 3);
    term.print("aaa\r\nbbb");
    term.set_scroll_region(1, 3);
    term.cup(0, 1);
    term.delete_lines(2);
    assert_visible_contents(&term, &["111", "aaa", "   ", "   ", "bbb"]);

    // expand the scroll region to fill the screen again
    term.set_scroll_region(0, 4);
    term.cup(0, 0);
    term.delete_lines(1);
    assert_visible_contents(&term, &["aaa", "   ", "   ", "bbb", "   "]);
}

#[test]
fn scenario_crlf_text() {
    let mut term = TestTerm::new(24, 80);
    term.print("hi\r\nworld");
    assert!(term.screen().visible_lines()[0].as_str().starts_with("hi "));
    assert!(term.screen().visible_lines()[1].as_str().starts_with("world "));
    term.assert_cursor_pos(5, 1, None);
}

#[test]
fn scenario_clear_and_home() {
    let mut term = TestTerm::new(24, 80);
    term.print("junk\r\nall\r\nover");
    term.print("\x1b[2J\x1b[1;1HA");
    let lines = term.screen().visible_lines();
    assert_eq!(lines[0].cells[0].rune, 'A');
    assert_eq!(lines[1].cells[0].rune, ' ');
    assert_eq!(lines[23].cells[79].rune, ' ');
    term.assert_cursor_pos(1, 0, None);
}

#[test]
fn scenario_origin_mode_region() {
    let mut term = TestTerm::new(24, 80);
    term.print("\x1b[5;10r\x1b[1;1H\x1b[?6h");
    assert_eq!(term.top, 4);
    assert_eq!(term.bottom, 9);
    assert!(term.cursor.state.contains(CursorState::ORIGIN));
    term.assert_cursor_pos(0, 4, None);

    // absolute rows stay clamped inside the region under origin mode
    term.cup(0, 30);
    term.assert_cursor_pos(0, 9, None);

    // and reach the whole grid again once it is reset
    term.print("\x1b[?6l");
    term.cup(0, 30);
    term.assert_cursor_pos(0, 23, None);
}

#[test]
fn scenario_sgr_colors() {
    let mut term = TestTerm::new(24, 80);
    term.print("\x1b[31mX\x1b[0mY");
    let line = &term.screen().visible_lines()[0];
    assert_eq!(line.cells[0].rune, 'X');
    assert_eq!(line.cells[0].fg, ColorAttribute::PaletteIndex(1));
    assert_eq!(line.cells[1].rune, 'Y');
    assert_eq!(line.cells[1].fg, ColorAttribute::Default);
}

#[test]
fn scenario_save_restore_cursor() {
    let mut term = TestTerm::new(24, 80);
    term.print("\x1b7\x1b[10;20H\x1b8");
    term.assert_cursor_pos(0, 0, None);
}

#[test]
fn scenario_alt_screen_round_trip() {
    let mut term = TestTerm::new(24, 80);
    term.print("precious");
    let before: Vec<String> = term.screen.lines.iter().map(|l| l.as_str()).collect();
    let cursor_before = term.cursor;

    term.print("\x1b[?1049h");
    assert!(term.mode().contains(TerminalMode::ALTSCREEN));
    term.print("\x1b[2Jgarbage all over the alternate screen");

    term.print("\x1b[?1049l");
    assert!(!term.mode().contains(TerminalMode::ALTSCREEN));
    let after: Vec<String> = term.screen.lines.iter().map(|l| l.as_str()).collect();
    assert_eq!(before, after);
    assert_eq!(term.cursor, cursor_before);
}

#[test]
fn swap_screen_twice_is_identity() {
    let mut term = TestTerm::new(4, 4);
    term.print("some\r\ntext");
    let before: Vec<Line> = term.screen().visible_lines().to_vec();
    term.swap_screen();
    term.swap_screen();
    let after: Vec<Line> = term.screen().visible_lines().to_vec();
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.cells, a.cells);
    }
}

#[test]
fn cursor_save_restores_exactly() {
    let mut term = TestTerm::new(4, 4);
    // arm the wrap latch and give the pen some state
    term.print("\x1b[1;31mabcd");
    assert!(term.cursor.state.contains(CursorState::WRAPNEXT));
    let saved = term.cursor;

    term.print("\x1b7");
    term.print("\x1b[2;2H\x1b[0m");
    term.print("\x1b8");
    assert_eq!(term.cursor, saved);
}

#[test]
fn utf8_split_across_reads() {
    let mut term = TestTerm::new(2, 10);
    term.print(b"\xe4\xb8");
    term.assert_cursor_pos(0, 0, Some("incomplete sequence is buffered"));
    term.print(b"\xadok");
    assert_eq!(term.screen().visible_lines()[0].cells[0].rune, '\u{4e2d}');
    term.assert_cursor_pos(3, 0, None);
}

#[test]
fn invalid_utf8_yields_replacement() {
    let mut term = TestTerm::new(2, 10);
    term.print(b"a\xffb");
    let line = &term.screen().visible_lines()[0];
    assert_eq!(line.cells[0].rune, 'a');
    assert_eq!(line.cells[1].rune, '\u{fffd}');
    assert_eq!(line.cells[2].rune, 'b');
}

#[test]
fn utf8_mode_off_passes_bytes_through() {
    let mut term = TestTerm::new(2, 10);
    term.print("\x1b%@");
    term.print(b"\xe9");
    assert_eq!(term.screen().visible_lines()[0].cells[0].rune, '\u{e9}');
    term.print("\x1b%G");
    term.print("\u{e9}");
    assert_eq!(term.screen().visible_lines()[0].cells[1].rune, '\u{e9}');
}

#[test]
fn key_encoding_respects_appcursor() {
    let mut term = TestTerm::new(2, 10);
    let mut pty: Vec<u8> = Vec::new();

    term.key_down(KeyCode::Up, KeyModifiers::default(), &mut pty).unwrap();
    assert_eq!(pty, b"\x1b[A");

    pty.clear();
    term.print("\x1b[?1h");
    term.key_down(KeyCode::Up, KeyModifiers::default(), &mut pty).unwrap();
    assert_eq!(pty, b"\x1bOA");

    pty.clear();
    term.key_down(KeyCode::Char('c'), KeyModifiers::CTRL, &mut pty).unwrap();
    assert_eq!(pty, b"\x03");

    pty.clear();
    term.key_down(KeyCode::Char('C'), KeyModifiers::CTRL | KeyModifiers::SHIFT, &mut pty).unwrap();
    assert_eq!(pty, b"\x03");
}

#[test]
fn local_echo_renders_keystrokes() {
    let mut term = TestTerm::new(2, 10);
    term.set_mode("12", false);
    assert!(term.mode().contains(TerminalMode::ECHO));

    let mut pty: Vec<u8> = Vec::new();
    term.key_down(KeyCode::Char('x'), KeyModifiers::default(), &mut pty).unwrap();
    assert_eq!(pty, b"x");
    assert_eq!(term.screen().visible_lines()[0].cells[0].rune, 'x');
}

/// Cheap deterministic byte source for the invariant checks below.
struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

#[test]
fn invariants_hold_for_arbitrary_input() {
    let mut rng = XorShift(0x2545_f491);
    let mut term = TestTerm::new(24, 80);
    for _ in 0..200 {
        let chunk: Vec<u8> = (0..257).map(|_| (rng.next() >> 24) as u8).collect();
        term.print(&chunk);
        term.assert_invariants();
    }
}

#[test]
fn invariants_hold_for_escape_heavy_input() {
    let mut rng = XorShift(0xdead_beef);
    let mut term = TestTerm::new(24, 80);
    let finals = b"@ABCDEFGHIJKLMPSTXZcdghlmnrsu";
    for _ in 0..500 {
        let a = rng.next() % 400;
        let b = rng.next() % 400;
        let private = if rng.next() % 4 == 0 { "?" } else { "" };
        let fin = finals[rng.next() as usize % finals.len()] as char;
        term.print(format!("\x1b[{}{};{}{}", private, a, b, fin));
        term.assert_invariants();
    }
}

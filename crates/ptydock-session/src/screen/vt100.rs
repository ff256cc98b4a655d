//! vt100-backed screen.

use super::Screen;
use ptydock_core::Size;
use vt100::Parser;

const MAX_SCROLLBACK: usize = 1000;

/// Terminal emulation via the `vt100` parser.
pub struct Vt100Screen {
    parser: Parser,
    size: Size,
    opened: bool,
    theme: Option<String>,
}

impl Vt100Screen {
    pub fn new(size: Size) -> Self {
        Self {
            parser: Parser::new(size.rows, size.cols, MAX_SCROLLBACK),
            size,
            opened: false,
            theme: None,
        }
    }

    pub fn theme(&self) -> Option<&str> {
        self.theme.as_deref()
    }
}

impl Screen for Vt100Screen {
    fn open(&mut self) {
        self.opened = true;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn feed(&mut self, data: &[u8]) {
        self.parser.process(data);
    }

    fn resize(&mut self, size: Size) {
        if !size.is_sized() {
            return;
        }
        self.parser.set_size(size.rows, size.cols);
        self.size = size;
    }

    fn clear(&mut self) {
        // A fresh parser drops scrollback too, which escape-sequence clears
        // would not.
        self.parser = Parser::new(self.size.rows, self.size.cols, MAX_SCROLLBACK);
    }

    fn visible_text(&self) -> String {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();

        let mut lines = Vec::new();
        for row in 0..rows {
            let mut line = String::new();
            for col in 0..cols {
                match screen.cell(row, col) {
                    Some(cell) => line.push(cell.contents().chars().next().unwrap_or(' ')),
                    None => line.push(' '),
                }
            }
            lines.push(line.trim_end().to_string());
        }

        while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
            lines.pop();
        }

        lines.join("\n")
    }

    fn set_theme(&mut self, theme: &str) {
        self.theme = Some(theme.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeds_and_reads_back_text() {
        let mut screen = Vt100Screen::new(Size::new(20, 5));
        screen.feed(b"hello\r\nworld");
        assert_eq!(screen.visible_text(), "hello\nworld");
    }

    #[test]
    fn empty_screen_serializes_empty() {
        let screen = Vt100Screen::new(Size::default());
        assert_eq!(screen.visible_text(), "");
    }

    #[test]
    fn clear_drops_everything() {
        let mut screen = Vt100Screen::new(Size::new(20, 5));
        screen.feed(b"leftovers");
        screen.clear();
        assert_eq!(screen.visible_text(), "");
    }

    #[test]
    fn resize_refits_the_grid() {
        let mut screen = Vt100Screen::new(Size::new(80, 24));
        screen.resize(Size::new(100, 30));
        screen.feed(b"wide");
        assert_eq!(screen.visible_text(), "wide");
        // Degenerate sizes are ignored rather than collapsing the grid.
        screen.resize(Size::new(0, 0));
        assert_eq!(screen.visible_text(), "wide");
    }

    #[test]
    fn open_is_idempotent() {
        let mut screen = Vt100Screen::new(Size::default());
        assert!(!screen.is_open());
        screen.open();
        screen.open();
        assert!(screen.is_open());
    }
}

use crossterm::event::{
    poll, read, Event, KeyCode, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::{execute, terminal};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A key the machine understands: one of the sixteen hex keypad digits, or
/// one of the four directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Hex(u8),
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub direction: KeyDirection,
}

/// Map a host key symbol onto the machine's alphabet: `0`-`9`, `a`-`f` and the
/// four `Arrow*` names. Everything else is `None`.
pub fn classify(symbol: &str) -> Option<Key> {
    match symbol {
        "ArrowUp" => Some(Key::Up),
        "ArrowDown" => Some(Key::Down),
        "ArrowLeft" => Some(Key::Left),
        "ArrowRight" => Some(Key::Right),
        _ => {
            let mut chars = symbol.chars();
            match (chars.next(), chars.next()) {
                (Some(c @ ('0'..='9' | 'a'..='f')), None) => {
                    c.to_digit(16).map(|d| Key::Hex(d as u8))
                }
                _ => None,
            }
        }
    }
}

/// Whoever keeps track of which keys are down.
pub trait KeySink {
    fn key(&mut self, event: KeyEvent);
}

/// Turns host key events into machine key events for a sink. It has no state
/// of its own: no debouncing, no repeat suppression.
pub struct Keypad<K: KeySink> {
    sink: K,
}

impl<K: KeySink> Keypad<K> {
    pub fn new(sink: K) -> Self {
        Keypad { sink }
    }

    pub fn key_down(&mut self, symbol: &str) {
        self.forward(symbol, KeyDirection::Press);
    }

    pub fn key_up(&mut self, symbol: &str) {
        self.forward(symbol, KeyDirection::Release);
    }

    fn forward(&mut self, symbol: &str, direction: KeyDirection) {
        if let Some(key) = classify(symbol) {
            trace!(symbol, ?direction, "key");
            self.sink.key(KeyEvent { key, direction });
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}

/// Current state of the keypad as seen from the machine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyState {
    hex: u16,
    up: bool,
    down: bool,
    left: bool,
    right: bool,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up(&self) -> bool {
        self.up
    }

    pub fn down(&self) -> bool {
        self.down
    }

    pub fn left(&self) -> bool {
        self.left
    }

    pub fn right(&self) -> bool {
        self.right
    }

    pub fn is_pressed(&self, digit: u8) -> bool {
        digit < 16 && self.hex & (1 << digit) != 0
    }

    /// lowest hex digit held down
    pub fn hex_digit(&self) -> Option<u8> {
        match self.hex {
            0 => None,
            bits => Some(bits.trailing_zeros() as u8),
        }
    }
}

impl KeySink for KeyState {
    fn key(&mut self, event: KeyEvent) {
        let pressed = event.direction == KeyDirection::Press;
        match event.key {
            Key::Hex(d) if pressed => self.hex |= 1 << d,
            Key::Hex(d) => self.hex &= !(1 << d),
            Key::Up => self.up = pressed,
            Key::Down => self.down = pressed,
            Key::Left => self.left = pressed,
            Key::Right => self.right = pressed,
        }
    }
}

impl KeySink for Vec<KeyEvent> {
    fn key(&mut self, event: KeyEvent) {
        self.push(event);
    }
}

/// What came of draining the host's pending input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    Continue,
    Quit,
}

/// A source of host key events.
pub trait Input {
    /// hand every pending event to `keypad` without blocking
    fn pump<K: KeySink>(&mut self, keypad: &mut Keypad<K>) -> Result<Pump, io::Error>;
}

/// symbol a crossterm key code goes by
fn symbol_for(code: KeyCode) -> Option<String> {
    match code {
        KeyCode::Char(c) => Some(c.to_string()),
        KeyCode::Up => Some("ArrowUp".into()),
        KeyCode::Down => Some("ArrowDown".into()),
        KeyCode::Left => Some("ArrowLeft".into()),
        KeyCode::Right => Some("ArrowRight".into()),
        _ => None,
    }
}

/// Pairs terminal key events up into presses and releases.
///
/// Most terminals never report a release. Until one has been seen, every key
/// pressed during a pump is released at the start of the next one, so a key
/// can't stay down for good.
#[derive(Debug, Default)]
struct KeyTracker {
    reports_releases: bool,
    held: Vec<String>,
}

impl KeyTracker {
    fn start_pump<K: KeySink>(&mut self, keypad: &mut Keypad<K>) {
        for symbol in self.held.drain(..) {
            keypad.key_up(&symbol);
        }
    }

    fn event<K: KeySink>(&mut self, keypad: &mut Keypad<K>, symbol: String, kind: KeyEventKind) {
        match kind {
            KeyEventKind::Press | KeyEventKind::Repeat => {
                keypad.key_down(&symbol);
                if !self.reports_releases {
                    self.held.push(symbol);
                }
            }
            KeyEventKind::Release => {
                if !self.reports_releases {
                    debug!("terminal reports key releases");
                    self.reports_releases = true;
                    self.held.clear();
                }
                keypad.key_up(&symbol);
            }
        }
    }
}

/// keyboard input from the terminal, using crossterm in raw mode with key
/// release reporting asked for
pub struct TermInput {
    tracker: KeyTracker,
    enhanced: bool,
}

impl TermInput {
    pub fn new() -> Result<Self, io::Error> {
        terminal::enable_raw_mode()?;
        let flags = KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
            | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES;
        // terminals without the kitty keyboard protocol ignore the push
        let mut stdout = io::stdout();
        let enhanced = match execute!(stdout, PushKeyboardEnhancementFlags(flags)) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "can't ask the terminal for key releases");
                false
            }
        };
        Ok(TermInput {
            tracker: KeyTracker::default(),
            enhanced,
        })
    }
}

impl Drop for TermInput {
    fn drop(&mut self) {
        if self.enhanced {
            let mut stdout = io::stdout();
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        let _ = terminal::disable_raw_mode();
    }
}

impl Input for TermInput {
    fn pump<K: KeySink>(&mut self, keypad: &mut Keypad<K>) -> Result<Pump, io::Error> {
        self.tracker.start_pump(keypad);
        while poll(Duration::from_millis(0))? {
            let evt = match read()? {
                Event::Key(evt) => evt,
                _ => continue,
            };
            let ctrl_c =
                evt.code == KeyCode::Char('c') && evt.modifiers.contains(KeyModifiers::CONTROL);
            if evt.kind != KeyEventKind::Release && (evt.code == KeyCode::Esc || ctrl_c) {
                return Ok(Pump::Quit);
            }
            if let Some(symbol) = symbol_for(evt.code) {
                self.tracker.event(keypad, symbol, evt.kind);
            }
        }
        Ok(Pump::Continue)
    }
}

/// replays a fixed list of events, a batch per pump; for testing and headless
/// runs
pub struct ScriptedInput {
    batches: VecDeque<Vec<(String, KeyDirection)>>,
    quit_when_done: bool,
}

impl ScriptedInput {
    pub fn new(batches: Vec<Vec<(&str, KeyDirection)>>) -> Self {
        ScriptedInput {
            batches: batches
                .into_iter()
                .map(|b| b.into_iter().map(|(s, d)| (s.to_string(), d)).collect())
                .collect(),
            quit_when_done: false,
        }
    }

    /// nothing to replay, ever
    pub fn idle() -> Self {
        Self::new(Vec::new())
    }

    /// ask to quit once the script runs out
    pub fn quit_when_done(mut self) -> Self {
        self.quit_when_done = true;
        self
    }
}

impl Input for ScriptedInput {
    fn pump<K: KeySink>(&mut self, keypad: &mut Keypad<K>) -> Result<Pump, io::Error> {
        match self.batches.pop_front() {
            Some(batch) => {
                for (symbol, direction) in batch {
                    match direction {
                        KeyDirection::Press => keypad.key_down(&symbol),
                        KeyDirection::Release => keypad.key_up(&symbol),
                    }
                }
                Ok(Pump::Continue)
            }
            None if self.quit_when_done => Ok(Pump::Quit),
            None => Ok(Pump::Continue),
        }
    }
}

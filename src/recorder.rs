//! Record human gameplay for imitation learning.
//!
//! Global input listeners translate OS-level mouse/keyboard events into a
//! channel of discrete [`RecorderEvent`]s; the control loop owns all
//! session state and drains the channel in arrival order, pairing each
//! qualifying event with a freshly captured frame. Output is a timestamped
//! session directory of numbered frame snapshots plus one `actions.json`
//! written exactly once at stop.

use crate::capture::FrameSource;
use crate::config::Config;
use crate::grid::GridMapper;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

/// Modifier keys held at the time of an event. Tracked from press/release
/// events; never logged as actions themselves.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

/// One observed human input, in the stable on-disk training-data schema.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action_type", rename_all = "lowercase")]
pub enum ActionRecord {
    Click {
        /// Frame snapshot filename, empty if no frame was captured.
        frame: String,
        frame_num: Option<u64>,
        x: i32,
        y: i32,
        grid_cell: u32,
        grid_row: u32,
        grid_col: u32,
        button: String,
        modifiers: Modifiers,
        timestamp: f64,
    },
    Keypress {
        frame: String,
        frame_num: Option<u64>,
        key: String,
        modifiers: Modifiers,
        timestamp: f64,
    },
}

/// Discrete input event delivered by the listener thread.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    MouseMoved { x: i32, y: i32 },
    ButtonPressed { button: String },
    KeyPressed { key: String },
    KeyReleased { key: String },
    /// External interrupt: stop and flush.
    Interrupted,
}

pub struct RecordingSummary {
    pub session_dir: PathBuf,
    pub frames: u64,
    pub records: usize,
}

/// Records frame snapshots and the human actions taken on them.
pub struct Recorder<C: FrameSource> {
    capture: C,
    mapper: GridMapper,
    session_dir: PathBuf,
    records: Vec<ActionRecord>,
    frame_count: u64,
    /// When true (the default) only clicks trigger frame capture;
    /// when false, every logged keypress captures one too.
    capture_on_click: bool,
    stop_key: String,
    modifiers: Modifiers,
    cursor: (i32, i32),
    window: crate::config::WindowRegion,
    finalized: bool,
}

impl<C: FrameSource> Recorder<C> {
    /// Create a timestamped session directory under `output_dir`.
    pub fn new(
        capture: C,
        config: &Config,
        output_dir: &std::path::Path,
        capture_on_click: bool,
    ) -> Result<Self> {
        let mapper = GridMapper::new(config.window, config.grid)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let session_dir = output_dir.join(timestamp);
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("Failed to create session dir {}", session_dir.display()))?;

        Ok(Self {
            capture,
            mapper,
            session_dir,
            records: Vec::new(),
            frame_count: 0,
            capture_on_click,
            stop_key: config.stop_key.clone(),
            modifiers: Modifiers::default(),
            cursor: (0, 0),
            window: config.window,
            finalized: false,
        })
    }

    pub fn session_dir(&self) -> &std::path::Path {
        &self.session_dir
    }

    /// Drain events until the stop key, an interrupt, or listener
    /// disconnect, then flush the action log exactly once.
    pub fn run(&mut self, events: Receiver<RecorderEvent>) -> Result<RecordingSummary> {
        log::info!("Recording to {}", self.session_dir.display());
        log::info!(
            "Game window: {},{} {}x{}; press {} to stop",
            self.window.left,
            self.window.top,
            self.window.width,
            self.window.height,
            self.stop_key
        );

        loop {
            match events.recv() {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(_) => {
                    log::warn!("Input listener disconnected, stopping");
                    break;
                }
            }
        }

        self.finalize()?;
        let summary = RecordingSummary {
            session_dir: self.session_dir.clone(),
            frames: self.frame_count,
            records: self.records.len(),
        };
        log::info!(
            "Recording stopped: {} frames, {} actions in {}",
            summary.frames,
            summary.records,
            summary.session_dir.display()
        );
        Ok(summary)
    }

    /// Process one event; returns false when the session should stop.
    fn handle_event(&mut self, event: RecorderEvent) -> bool {
        match event {
            RecorderEvent::MouseMoved { x, y } => {
                self.cursor = (x, y);
                true
            }
            RecorderEvent::ButtonPressed { button } => {
                let (x, y) = self.cursor;
                self.on_click(x, y, &button);
                true
            }
            RecorderEvent::KeyPressed { key } => match key.as_str() {
                "shift" => {
                    self.modifiers.shift = true;
                    true
                }
                "ctrl" => {
                    self.modifiers.ctrl = true;
                    true
                }
                "alt" => {
                    self.modifiers.alt = true;
                    true
                }
                _ if key == self.stop_key => false,
                _ => {
                    self.on_keypress(&key);
                    true
                }
            },
            RecorderEvent::KeyReleased { key } => {
                match key.as_str() {
                    "shift" => self.modifiers.shift = false,
                    "ctrl" => self.modifiers.ctrl = false,
                    "alt" => self.modifiers.alt = false,
                    _ => {}
                }
                true
            }
            RecorderEvent::Interrupted => false,
        }
    }

    fn on_click(&mut self, x: i32, y: i32, button: &str) {
        // Clicks outside the game surface carry no training signal
        if !self.window.contains(x, y) {
            return;
        }

        let frame = self.save_frame();
        let frame_num = (!frame.is_empty()).then(|| self.frame_count - 1);
        let (grid_row, grid_col) = self.mapper.to_cell(x, y);
        let grid_cell = self.mapper.rc_to_cell(grid_row, grid_col);

        self.records.push(ActionRecord::Click {
            frame,
            frame_num,
            x,
            y,
            grid_cell,
            grid_row,
            grid_col,
            button: button.to_string(),
            modifiers: self.modifiers,
            timestamp: now(),
        });

        log::info!("[{}] Click at ({x}, {y}) -> grid cell {grid_cell}", self.frame_count);
    }

    fn on_keypress(&mut self, key: &str) {
        let frame = if self.capture_on_click {
            String::new()
        } else {
            self.save_frame()
        };
        let frame_num = (!frame.is_empty()).then(|| self.frame_count - 1);

        self.records.push(ActionRecord::Keypress {
            frame,
            frame_num,
            key: key.to_string(),
            modifiers: self.modifiers,
            timestamp: now(),
        });

        log::info!("[{}] Key: {key}", self.frame_count);
    }

    /// Capture and persist the current frame, returning its filename or an
    /// empty string when no frame was available. A failed save is logged
    /// and skipped; recording continues.
    fn save_frame(&mut self) -> String {
        let Some(frame) = self.capture.capture() else {
            return String::new();
        };
        let filename = format!("frame_{:05}.png", self.frame_count);
        let path = self.session_dir.join(&filename);
        match frame.save(&path) {
            Ok(()) => {
                self.frame_count += 1;
                filename
            }
            Err(e) => {
                log::error!("Failed to save {}: {e}", path.display());
                String::new()
            }
        }
    }

    /// Flush the full record sequence to `actions.json`, at most once.
    ///
    /// Records are written before anything is discarded; a write failure
    /// is fatal and leaves the collected records intact in memory.
    fn finalize(&mut self) -> Result<PathBuf> {
        let log_path = self.session_dir.join("actions.json");
        if self.finalized {
            return Ok(log_path);
        }
        self.finalized = true;

        let json =
            serde_json::to_string_pretty(&self.records).context("Failed to serialize action log")?;
        fs::write(&log_path, json)
            .with_context(|| format!("Failed to write {}", log_path.display()))?;
        Ok(log_path)
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Spawn the global input hook, translating OS events into channel events.
///
/// `rdev` delivers mouse and keyboard through one hook thread, which keeps
/// arrival order intact; the control loop is the single consumer and owner
/// of all mutable session state.
pub fn spawn_listener(tx: Sender<RecorderEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let result = rdev::listen(move |event| {
            let translated = match event.event_type {
                rdev::EventType::MouseMove { x, y } => Some(RecorderEvent::MouseMoved {
                    x: x as i32,
                    y: y as i32,
                }),
                rdev::EventType::ButtonPress(button) => Some(RecorderEvent::ButtonPressed {
                    button: button_name(&button),
                }),
                rdev::EventType::KeyPress(key) => Some(RecorderEvent::KeyPressed {
                    key: key_name(&key),
                }),
                rdev::EventType::KeyRelease(key) => Some(RecorderEvent::KeyReleased {
                    key: key_name(&key),
                }),
                _ => None,
            };
            if let Some(event) = translated {
                // Send failure means the control loop is gone; nothing to do
                let _ = tx.send(event);
            }
        });
        if let Err(e) = result {
            log::error!("Input listener failed: {e:?}");
        }
    })
}

/// Route Ctrl+C into the event channel so an interrupt stops the session
/// through the same path as the stop key and the action log still gets
/// flushed.
pub fn install_interrupt_handler(tx: Sender<RecorderEvent>) -> Result<()> {
    ctrlc::set_handler(move || {
        let _ = tx.send(RecorderEvent::Interrupted);
    })
    .context("Failed to install Ctrl+C handler")
}

fn button_name(button: &rdev::Button) -> String {
    match button {
        rdev::Button::Left => "left".to_string(),
        rdev::Button::Right => "right".to_string(),
        rdev::Button::Middle => "middle".to_string(),
        rdev::Button::Unknown(code) => format!("button{code}"),
    }
}

/// Canonical lowercase name for a key, matching the config hotkey table.
fn key_name(key: &rdev::Key) -> String {
    use rdev::Key::*;
    let name = match key {
        ShiftLeft | ShiftRight => "shift",
        ControlLeft | ControlRight => "ctrl",
        Alt | AltGr => "alt",
        Return => "enter",
        Tab => "tab",
        Space => "space",
        Escape => "escape",
        KeyA => "a",
        KeyB => "b",
        KeyC => "c",
        KeyD => "d",
        KeyE => "e",
        KeyF => "f",
        KeyG => "g",
        KeyH => "h",
        KeyI => "i",
        KeyJ => "j",
        KeyK => "k",
        KeyL => "l",
        KeyM => "m",
        KeyN => "n",
        KeyO => "o",
        KeyP => "p",
        KeyQ => "q",
        KeyR => "r",
        KeyS => "s",
        KeyT => "t",
        KeyU => "u",
        KeyV => "v",
        KeyW => "w",
        KeyX => "x",
        KeyY => "y",
        KeyZ => "z",
        Num0 => "0",
        Num1 => "1",
        Num2 => "2",
        Num3 => "3",
        Num4 => "4",
        Num5 => "5",
        Num6 => "6",
        Num7 => "7",
        Num8 => "8",
        Num9 => "9",
        F1 => "f1",
        F2 => "f2",
        F3 => "f3",
        F4 => "f4",
        F5 => "f5",
        F6 => "f6",
        F7 => "f7",
        F8 => "f8",
        F9 => "f9",
        F10 => "f10",
        F11 => "f11",
        F12 => "f12",
        other => return format!("{other:?}").to_lowercase(),
    };
    name.to_string()
}

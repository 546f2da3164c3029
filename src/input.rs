//! Keyboard and mouse injection for issuing game commands.
//!
//! Uses `enigo` for cross-platform input simulation. A failed injection is
//! fatal for that action: a silently dropped command would desynchronize
//! the episode from the actual game state.

use crate::config::Hotkeys;
use anyhow::Result;
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use std::thread;
use std::time::Duration;

/// Pause between positioning the pointer and delivering the button event.
/// Some input backends need the position change to register first.
const CLICK_SETTLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// Input capability consumed by the episode controller.
///
/// The recorder never injects input; it only observes.
pub trait GameInput {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()>;
    fn click(&mut self, x: i32, y: i32, button: MouseButton) -> Result<()>;
    fn press_key(&mut self, key: &str) -> Result<()>;
    fn hold_key(&mut self, key: &str, duration: Duration) -> Result<()>;

    // Named game commands, bound to the configured hotkey table.
    fn end_turn(&mut self) -> Result<()>;
    fn cycle_unit(&mut self) -> Result<()>;
    fn move_fast(&mut self) -> Result<()>;
    fn move_quick(&mut self) -> Result<()>;
    fn target(&mut self) -> Result<()>;
    fn camera_top_down(&mut self) -> Result<()>;
}

/// Controller for sending keyboard/mouse input to the game.
pub struct InputController {
    enigo: Enigo,
    hotkeys: Hotkeys,
}

impl InputController {
    pub fn new(hotkeys: Hotkeys) -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize input backend: {:?}", e))?;
        Ok(Self { enigo, hotkeys })
    }
}

/// Normalize a symbolic key name. Unrecognized names pass through literally
/// as single-character keys.
fn lookup_key(name: &str) -> Key {
    match name.to_lowercase().as_str() {
        "tab" => Key::Tab,
        "enter" | "return" => Key::Return,
        "space" => Key::Space,
        "escape" | "esc" => Key::Escape,
        "shift" => Key::Shift,
        "ctrl" => Key::Control,
        "alt" => Key::Alt,
        other => Key::Unicode(other.chars().next().unwrap_or(' ')),
    }
}

impl GameInput for InputController {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| anyhow::anyhow!("Failed to move mouse to ({x}, {y}): {:?}", e))
    }

    fn click(&mut self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        self.move_to(x, y)?;
        thread::sleep(CLICK_SETTLE);
        let button = match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
        };
        self.enigo
            .button(button, Direction::Click)
            .map_err(|e| anyhow::anyhow!("Failed to click at ({x}, {y}): {:?}", e))
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        self.enigo
            .key(lookup_key(key), Direction::Click)
            .map_err(|e| anyhow::anyhow!("Failed to press key '{key}': {:?}", e))
    }

    fn hold_key(&mut self, key: &str, duration: Duration) -> Result<()> {
        let k = lookup_key(key);
        self.enigo
            .key(k, Direction::Press)
            .map_err(|e| anyhow::anyhow!("Failed to hold key '{key}': {:?}", e))?;
        thread::sleep(duration);
        self.enigo
            .key(k, Direction::Release)
            .map_err(|e| anyhow::anyhow!("Failed to release key '{key}': {:?}", e))
    }

    fn end_turn(&mut self) -> Result<()> {
        let key = self.hotkeys.end_turn.clone();
        self.press_key(&key)
    }

    fn cycle_unit(&mut self) -> Result<()> {
        let key = self.hotkeys.cycle_unit.clone();
        self.press_key(&key)
    }

    fn move_fast(&mut self) -> Result<()> {
        let key = self.hotkeys.move_fast.clone();
        self.press_key(&key)
    }

    fn move_quick(&mut self) -> Result<()> {
        let key = self.hotkeys.move_quick.clone();
        self.press_key(&key)
    }

    fn target(&mut self) -> Result<()> {
        let key = self.hotkeys.target.clone();
        self.press_key(&key)
    }

    fn camera_top_down(&mut self) -> Result<()> {
        let key = self.hotkeys.camera_top_down.clone();
        self.press_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolic_keys_normalize() {
        assert_eq!(lookup_key("TAB"), Key::Tab);
        assert_eq!(lookup_key("enter"), Key::Return);
        assert_eq!(lookup_key("return"), Key::Return);
        assert_eq!(lookup_key("Esc"), Key::Escape);
        assert_eq!(lookup_key("ctrl"), Key::Control);
    }

    #[test]
    fn test_unrecognized_keys_pass_through() {
        assert_eq!(lookup_key("f"), Key::Unicode('f'));
        assert_eq!(lookup_key("9"), Key::Unicode('9'));
    }
}

//! The agent-facing environment wrapping a live Combat Mission session.
//!
//! Runs the reset/step protocol against the game's WeGo turn structure:
//! actions are only issued during the Command Phase, and the end-turn
//! action triggers the non-interactive Replay Phase, which the controller
//! sits out with a fixed wait.
//!
//! Action space (discrete, `rows * cols + 5`):
//!   - `0 .. rows*cols`: click the corresponding grid cell
//!   - `+0`: cycle to next unit
//!   - `+1`: Move Fast command
//!   - `+2`: Move Quick command
//!   - `+3`: Target command
//!   - `+4`: End Turn (executes orders and waits out the replay)
//!
//! This ordering is the wire contract for any trained policy.

use crate::capture::FrameSource;
use crate::config::Config;
use crate::grid::GridMapper;
use crate::input::{GameInput, MouseButton};
use crate::ocr::ScoreSource;
use anyhow::{Result, bail};
use image::GrayImage;
use serde::Serialize;
use std::thread;
use std::time::Duration;

/// Symbolic (non-grid) actions appended after the grid clicks.
pub const SHORTCUT_ACTIONS: u32 = 5;

/// Downscaled observation dimensions.
pub const SMALL_OBS_WIDTH: u32 = 160;
pub const SMALL_OBS_HEIGHT: u32 = 90;

/// Delay after each action for the game UI to settle before observing.
const ACTION_SETTLE: Duration = Duration::from_millis(50);

/// Delay after the camera reset on `reset()` takes visual effect.
const RESET_SETTLE: Duration = Duration::from_millis(200);

/// Turn-structure state. Actions are accepted only in the Command Phase;
/// the Replay Wait covers the game's non-interactive replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CommandPhase,
    ReplayWait,
}

/// Per-step diagnostics handed to the RL framework.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StepInfo {
    pub turn: u32,
    pub actions: u32,
    pub score: i64,
}

pub struct StepResult {
    pub observation: GrayImage,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

/// RL environment over a live game: observes via a frame source, acts via
/// an input bridge, and derives reward from OCR score deltas when a score
/// reader is available.
pub struct CombatEnv<C: FrameSource, I: GameInput> {
    capture: C,
    input: I,
    score: Option<Box<dyn ScoreSource>>,
    mapper: GridMapper,
    replay_wait: Duration,
    max_turns: u32,
    small_observation: bool,
    phase: Phase,
    turn_count: u32,
    action_count: u32,
    prev_score: i64,
}

impl<C: FrameSource, I: GameInput> CombatEnv<C, I> {
    pub fn new(
        capture: C,
        input: I,
        score: Option<Box<dyn ScoreSource>>,
        config: &Config,
    ) -> Result<Self> {
        let mapper = GridMapper::new(config.window, config.grid)?;
        if score.is_none() {
            log::warn!("No score reader available; rewards will be 0");
        }
        Ok(Self {
            capture,
            input,
            score,
            mapper,
            replay_wait: Duration::from_secs(config.replay_wait_secs),
            max_turns: config.max_turns,
            small_observation: config.small_observation,
            phase: Phase::CommandPhase,
            turn_count: 0,
            action_count: 0,
            prev_score: 0,
        })
    }

    /// Number of valid actions: one per grid cell plus the symbolic tail.
    pub fn action_space_size(&self) -> u32 {
        self.mapper.cell_count() + SHORTCUT_ACTIONS
    }

    /// Start a new episode.
    ///
    /// This does not restart the game itself; the operator loads a save or
    /// scenario. The camera is reset to the top-down view so observations
    /// start from a known perspective.
    pub fn reset(&mut self, _seed: Option<u64>) -> Result<(GrayImage, StepInfo)> {
        self.turn_count = 0;
        self.action_count = 0;
        self.prev_score = 0;
        self.phase = Phase::CommandPhase;

        self.input.camera_top_down()?;
        thread::sleep(RESET_SETTLE);

        Ok((self.observation(), self.info()))
    }

    /// Execute one action and observe the outcome.
    ///
    /// Valid only in the Command Phase (which is always the case between
    /// calls: the replay wait blocks inside this method). An out-of-range
    /// action is a caller programming error and is fatal.
    pub fn step(&mut self, action: u32) -> Result<StepResult> {
        if self.phase != Phase::CommandPhase {
            bail!("step() called outside the command phase");
        }
        let grid_size = self.mapper.cell_count();
        if action >= grid_size + SHORTCUT_ACTIONS {
            bail!(
                "action {action} out of range (action space is {})",
                grid_size + SHORTCUT_ACTIONS
            );
        }

        self.action_count += 1;

        if action < grid_size {
            // Grid click: issue a movement/targeting order at the cell center
            let (row, col) = self.mapper.cell_to_rc(action);
            let (x, y) = self.mapper.to_screen(row, col);
            self.input.click(x, y, MouseButton::Left)?;
        } else {
            match action - grid_size {
                0 => self.input.cycle_unit()?,
                1 => self.input.move_fast()?,
                2 => self.input.move_quick()?,
                3 => self.input.target()?,
                4 => {
                    self.input.end_turn()?;
                    self.phase = Phase::ReplayWait;
                    self.wait_for_replay();
                    self.turn_count += 1;
                    self.phase = Phase::CommandPhase;
                }
                _ => unreachable!(),
            }
        }

        // Small delay for the game to respond before observing
        thread::sleep(ACTION_SETTLE);

        let observation = self.observation();
        let reward = self.compute_reward();
        let truncated = self.turn_count >= self.max_turns;

        Ok(StepResult {
            observation,
            reward,
            // Victory/defeat detection is out of scope; episodes only truncate
            terminated: false,
            truncated,
            info: self.info(),
        })
    }

    fn info(&self) -> StepInfo {
        StepInfo {
            turn: self.turn_count,
            actions: self.action_count,
            score: self.prev_score,
        }
    }

    fn observation(&mut self) -> GrayImage {
        if self.small_observation {
            self.capture.grab_resized(SMALL_OBS_WIDTH, SMALL_OBS_HEIGHT)
        } else {
            self.capture.grab_grayscale()
        }
    }

    /// Reward is the score delta since the previous step. Without a score
    /// reader, or when capture fails, the reward is 0 and no error
    /// propagates to the caller.
    fn compute_reward(&mut self) -> f64 {
        let Some(reader) = &self.score else {
            return 0.0;
        };
        let Some(frame) = self.capture.capture() else {
            return 0.0;
        };
        let current = reader.extract_score(&frame);
        let reward = (current - self.prev_score) as f64;
        self.prev_score = current;
        reward
    }

    /// Sit out the WeGo replay.
    ///
    /// The game runs a fixed 60-second replay showing order execution, and
    /// there is no observable signal for when it ends, so this is an
    /// unconditional wait for the configured duration. A deliberate
    /// approximation, not a detection mechanism.
    fn wait_for_replay(&self) {
        thread::sleep(self.replay_wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridSpec, WindowRegion};
    use image::RgbImage;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct FakeCapture {
        region: WindowRegion,
        fail: bool,
    }

    impl FrameSource for FakeCapture {
        fn region(&self) -> WindowRegion {
            self.region
        }

        fn capture(&mut self) -> Option<RgbImage> {
            if self.fail {
                None
            } else {
                Some(RgbImage::new(self.region.width, self.region.height))
            }
        }
    }

    #[derive(Default)]
    struct FakeInput {
        log: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl FakeInput {
        fn record(&mut self, entry: String) -> Result<()> {
            if self.fail {
                bail!("injection failed");
            }
            self.log.borrow_mut().push(entry);
            Ok(())
        }
    }

    impl GameInput for FakeInput {
        fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
            self.record(format!("move {x},{y}"))
        }
        fn click(&mut self, x: i32, y: i32, _button: MouseButton) -> Result<()> {
            self.record(format!("click {x},{y}"))
        }
        fn press_key(&mut self, key: &str) -> Result<()> {
            self.record(format!("key {key}"))
        }
        fn hold_key(&mut self, key: &str, _duration: Duration) -> Result<()> {
            self.record(format!("hold {key}"))
        }
        fn end_turn(&mut self) -> Result<()> {
            self.record("end_turn".to_string())
        }
        fn cycle_unit(&mut self) -> Result<()> {
            self.record("cycle_unit".to_string())
        }
        fn move_fast(&mut self) -> Result<()> {
            self.record("move_fast".to_string())
        }
        fn move_quick(&mut self) -> Result<()> {
            self.record("move_quick".to_string())
        }
        fn target(&mut self) -> Result<()> {
            self.record("target".to_string())
        }
        fn camera_top_down(&mut self) -> Result<()> {
            self.record("camera_top_down".to_string())
        }
    }

    struct FakeScores {
        scores: RefCell<VecDeque<i64>>,
    }

    impl ScoreSource for FakeScores {
        fn extract_score(&self, _frame: &RgbImage) -> i64 {
            self.scores.borrow_mut().pop_front().unwrap_or(0)
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.window = WindowRegion {
            left: 0,
            top: 0,
            width: 100,
            height: 80,
        };
        config.grid = GridSpec {
            rows: 4,
            cols: 5,
            margin_top: 0,
            margin_bottom: 0,
            margin_left: 0,
            margin_right: 0,
        };
        config.replay_wait_secs = 0;
        config.max_turns = 2;
        config
    }

    fn make_env(
        score: Option<Box<dyn ScoreSource>>,
        config: &Config,
    ) -> (CombatEnv<FakeCapture, FakeInput>, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let input = FakeInput {
            log: Rc::clone(&log),
            fail: false,
        };
        let capture = FakeCapture {
            region: config.window,
            fail: false,
        };
        let env = CombatEnv::new(capture, input, score, config).unwrap();
        (env, log)
    }

    #[test]
    fn test_action_space_size() {
        let config = test_config();
        let (env, _) = make_env(None, &config);
        assert_eq!(env.action_space_size(), 4 * 5 + 5);
    }

    #[test]
    fn test_grid_click_hits_cell_center() {
        let config = test_config();
        let (mut env, log) = make_env(None, &config);
        // Cell 7 in a 4x5 grid is (row 1, col 2); cells are 20x20
        let result = env.step(7).unwrap();
        assert_eq!(log.borrow().as_slice(), ["click 50,30"]);
        assert_eq!(result.info.turn, 0);
        assert_eq!(result.info.actions, 1);
    }

    #[test]
    fn test_only_end_turn_advances_turn_count() {
        let config = test_config();
        let (mut env, log) = make_env(None, &config);
        let grid_size = 4 * 5;

        for action in [0, grid_size, grid_size + 1, grid_size + 2, grid_size + 3] {
            let result = env.step(action).unwrap();
            assert_eq!(result.info.turn, 0, "action {action} changed turn_count");
        }

        let result = env.step(grid_size + 4).unwrap();
        assert_eq!(result.info.turn, 1);
        assert!(log.borrow().contains(&"end_turn".to_string()));
    }

    #[test]
    fn test_shortcut_actions_in_contract_order() {
        let config = test_config();
        let (mut env, log) = make_env(None, &config);
        let grid_size = 4 * 5;
        for action in grid_size..grid_size + 5 {
            env.step(action).unwrap();
        }
        assert_eq!(
            log.borrow().as_slice(),
            ["cycle_unit", "move_fast", "move_quick", "target", "end_turn"]
        );
    }

    #[test]
    fn test_truncation_at_turn_cap() {
        let config = test_config(); // max_turns = 2
        let (mut env, _) = make_env(None, &config);
        let end_turn = 4 * 5 + 4;

        assert!(!env.step(end_turn).unwrap().truncated);
        assert!(env.step(end_turn).unwrap().truncated);
        // Stays truncated for non-end-turn actions until reset
        assert!(env.step(0).unwrap().truncated);

        env.reset(None).unwrap();
        assert!(!env.step(0).unwrap().truncated);
    }

    #[test]
    fn test_reset_zeroes_state() {
        let config = test_config();
        let scores = FakeScores {
            scores: RefCell::new(VecDeque::from([9])),
        };
        let (mut env, log) = make_env(Some(Box::new(scores)), &config);
        env.step(4 * 5 + 4).unwrap();
        assert_eq!(env.turn_count, 1);
        assert_eq!(env.prev_score, 9);

        let (_, info) = env.reset(None).unwrap();
        assert_eq!(info.turn, 0);
        assert_eq!(info.actions, 0);
        assert_eq!(info.score, 0);
        assert!(log.borrow().contains(&"camera_top_down".to_string()));
    }

    #[test]
    fn test_reward_is_score_delta() {
        let config = test_config();
        let scores = FakeScores {
            scores: RefCell::new(VecDeque::from([5, 12, 10])),
        };
        let (mut env, _) = make_env(Some(Box::new(scores)), &config);

        assert_eq!(env.step(0).unwrap().reward, 5.0);
        assert_eq!(env.step(0).unwrap().reward, 7.0);
        assert_eq!(env.step(0).unwrap().reward, -2.0);
    }

    #[test]
    fn test_reward_zero_without_score_reader() {
        let config = test_config();
        let (mut env, _) = make_env(None, &config);
        for action in 0..3 {
            assert_eq!(env.step(action).unwrap().reward, 0.0);
        }
    }

    #[test]
    fn test_reward_zero_when_capture_fails() {
        let config = test_config();
        let scores = FakeScores {
            scores: RefCell::new(VecDeque::from([100])),
        };
        let log = Rc::new(RefCell::new(Vec::new()));
        let input = FakeInput {
            log,
            fail: false,
        };
        let capture = FakeCapture {
            region: config.window,
            fail: true,
        };
        let mut env = CombatEnv::new(capture, input, Some(Box::new(scores)), &config).unwrap();
        assert_eq!(env.step(0).unwrap().reward, 0.0);
        assert_eq!(env.prev_score, 0);
    }

    #[test]
    fn test_observation_shapes() {
        let mut config = test_config();
        let (mut env, _) = make_env(None, &config);
        let (obs, _) = env.reset(None).unwrap();
        assert_eq!((obs.width(), obs.height()), (SMALL_OBS_WIDTH, SMALL_OBS_HEIGHT));

        config.small_observation = false;
        let (mut env, _) = make_env(None, &config);
        let (obs, _) = env.reset(None).unwrap();
        assert_eq!((obs.width(), obs.height()), (100, 80));
    }

    #[test]
    fn test_out_of_range_action_is_fatal() {
        let config = test_config();
        let (mut env, _) = make_env(None, &config);
        assert!(env.step(4 * 5 + 5).is_err());
    }

    #[test]
    fn test_failed_injection_propagates() {
        let config = test_config();
        let input = FakeInput {
            log: Rc::new(RefCell::new(Vec::new())),
            fail: true,
        };
        let capture = FakeCapture {
            region: config.window,
            fail: false,
        };
        let mut env = CombatEnv::new(capture, input, None, &config).unwrap();
        assert!(env.step(0).is_err());
    }

    #[test]
    fn test_zero_frame_observation_when_capture_fails() {
        let config = test_config();
        let input = FakeInput::default();
        let capture = FakeCapture {
            region: config.window,
            fail: true,
        };
        let mut env = CombatEnv::new(capture, input, None, &config).unwrap();
        let result = env.step(0).unwrap();
        assert_eq!(
            (result.observation.width(), result.observation.height()),
            (SMALL_OBS_WIDTH, SMALL_OBS_HEIGHT)
        );
        assert!(result.observation.pixels().all(|p| p.0[0] == 0));
    }
}

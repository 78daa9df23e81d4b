// Component F: contrast-detection autofocus state machine. Drives a lens
// actuator position back and forth across a configured range, scoring each
// position by a caller-supplied contrast metric (computed upstream from the
// AF measurement window, not by this module), coarse first then fine, and
// locks once the fine pass has bracketed the peak.

use log::{debug, info};

use crate::controls::AfModeControl;

const COARSE_STEP: i32 = 30;
const FINE_STEP: i32 = 1;
const FINE_RANGE_FRACTION: f64 = 0.05;
/// Relative drop in contrast score, measured against the score at lock,
/// that kicks a locked lens back into a coarse scan.
const MAX_CHANGE: f64 = 0.5;
/// Each step of a scan keeps extending past its running best as long as the
/// current score is still within this fraction of it; once it drops below,
/// the scan treats the best position seen so far as the peak and moves on
/// rather than walking the rest of the configured range.
const EARLY_EXIT_RATIO: f64 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfState {
    Idle,
    CoarseScan,
    FineScan,
    Locked,
    Reset,
}

#[derive(Clone, Copy, Debug)]
pub struct AfWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct AfOutput {
    pub position: i32,
    pub state: AfState,
    pub locked: bool,
}

pub struct AfAlgorithm {
    mode: AfModeControl,
    state: AfState,
    position: i32,
    min_pos: i32,
    max_pos: i32,
    coarse_step: i32,
    fine_step: i32,
    coarse_best_pos: i32,
    coarse_best_score: f64,
    fine_lo: i32,
    fine_hi: i32,
    fine_best_pos: i32,
    fine_best_score: f64,
    locked_score: f64,
    windows: Vec<AfWindow>,
    frames_in_state: u32,
}

impl AfAlgorithm {
    pub fn new(min_pos: i32, max_pos: i32) -> Self {
        AfAlgorithm {
            mode: AfModeControl::Auto,
            state: AfState::Idle,
            position: min_pos,
            min_pos,
            max_pos,
            coarse_step: COARSE_STEP,
            fine_step: FINE_STEP,
            coarse_best_pos: min_pos,
            coarse_best_score: f64::MIN,
            fine_lo: min_pos,
            fine_hi: max_pos,
            fine_best_pos: min_pos,
            fine_best_score: f64::MIN,
            locked_score: 0.0,
            windows: Vec::new(),
            frames_in_state: 0,
        }
    }

    pub fn state(&self) -> AfState {
        self.state
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn set_mode(&mut self, mode: AfModeControl) {
        self.mode = mode;
        if matches!(mode, AfModeControl::Manual) {
            self.state = AfState::Idle;
        }
    }

    pub fn set_range(&mut self, min_pos: i32, max_pos: i32) {
        self.min_pos = min_pos;
        self.max_pos = max_pos;
    }

    /// A non-zero `speed` scales the coarse/fine step sizes; 1 is the
    /// default, 2 doubles the scan stride (faster, coarser lock).
    pub fn set_speed(&mut self, speed: u32) {
        let speed = speed.max(1) as i32;
        self.coarse_step = COARSE_STEP * speed;
        self.fine_step = FINE_STEP * speed;
    }

    pub fn set_windows(&mut self, windows: Vec<AfWindow>) {
        self.windows = windows;
    }

    pub fn windows(&self) -> &[AfWindow] {
        &self.windows
    }

    /// Starts (or restarts) a scan from the bottom of the configured range.
    /// No-op in `Manual` mode.
    pub fn trigger(&mut self) {
        if matches!(self.mode, AfModeControl::Manual) {
            return;
        }
        self.begin_coarse_scan();
        info!("AF: scan triggered, range=[{}, {}]", self.min_pos, self.max_pos);
    }

    pub fn cancel(&mut self) {
        self.state = AfState::Idle;
        self.frames_in_state = 0;
    }

    /// Runs one frame of the state machine against `contrast_score`, the
    /// sharpness metric computed for the current lens position, and returns
    /// the lens position to drive for the next frame.
    pub fn process(&mut self, contrast_score: f64) -> AfOutput {
        match self.state {
            AfState::Idle => {}
            AfState::CoarseScan => self.step_coarse(contrast_score),
            AfState::FineScan => self.step_fine(contrast_score),
            AfState::Locked => self.check_locked(contrast_score),
            AfState::Reset => self.begin_coarse_scan(),
        }
        self.frames_in_state += 1;
        AfOutput { position: self.position, state: self.state, locked: self.state == AfState::Locked }
    }

    fn begin_coarse_scan(&mut self) {
        self.state = AfState::CoarseScan;
        self.position = self.min_pos;
        self.coarse_best_pos = self.min_pos;
        self.coarse_best_score = f64::MIN;
        self.frames_in_state = 0;
    }

    fn step_coarse(&mut self, score: f64) {
        let still_climbing = self.coarse_best_score <= f64::MIN
            || score >= self.coarse_best_score * EARLY_EXIT_RATIO;
        if score > self.coarse_best_score {
            self.coarse_best_score = score;
            self.coarse_best_pos = self.position;
        }
        let next = self.position + self.coarse_step;
        if next > self.max_pos || !still_climbing {
            self.begin_fine_scan();
        } else {
            self.position = next;
        }
    }

    /// Narrows the scan to a window around the coarse best, sized so the
    /// fine pass can still bracket the peak within frame budget even when
    /// the configured range is wide: `min(5% of the full range, a third of
    /// the coarse step)`.
    fn begin_fine_scan(&mut self) {
        let total_span = (self.max_pos - self.min_pos) as f64;
        let radius = (total_span * FINE_RANGE_FRACTION)
            .min(self.coarse_step as f64 / 3.0)
            .round() as i32;
        self.fine_lo = (self.coarse_best_pos - radius).max(self.min_pos);
        self.fine_hi = (self.coarse_best_pos + radius).min(self.max_pos);
        self.position = self.fine_lo;
        self.fine_best_pos = self.fine_lo;
        self.fine_best_score = f64::MIN;
        self.state = AfState::FineScan;
        debug!("AF: coarse scan done, best={} score={:.3}, fine range=[{}, {}]",
               self.coarse_best_pos, self.coarse_best_score, self.fine_lo, self.fine_hi);
    }

    fn step_fine(&mut self, score: f64) {
        let still_climbing = self.fine_best_score <= f64::MIN
            || score >= self.fine_best_score * EARLY_EXIT_RATIO;
        if score > self.fine_best_score {
            self.fine_best_score = score;
            self.fine_best_pos = self.position;
        }
        let next = self.position + self.fine_step;
        if next > self.fine_hi || !still_climbing {
            self.lock();
        } else {
            self.position = next;
        }
    }

    fn lock(&mut self) {
        self.position = self.fine_best_pos;
        self.locked_score = self.fine_best_score;
        self.state = AfState::Locked;
        info!("AF: locked at position {} score={:.3}", self.position, self.locked_score);
    }

    fn check_locked(&mut self, score: f64) {
        if self.locked_score <= 0.0 {
            return;
        }
        let relative_drop = (self.locked_score - score) / self.locked_score;
        if relative_drop > MAX_CHANGE {
            debug!("AF: lock lost (score {:.3} vs locked {:.3}), resetting",
                   score, self.locked_score);
            self.state = AfState::Reset;
        }
    }
}

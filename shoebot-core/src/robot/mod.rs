//! robot — simulated robot state, settings, telemetry and command log
//!
//! Nothing here talks to hardware. Movement commands only produce log lines,
//! and the telemetry numbers are a random walk around plausible values.

use std::collections::VecDeque;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotState {
    Idle,
    #[default]
    Working,
    Returning,
    Charging,
    Error,
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RobotState::Idle => "IDLE",
            RobotState::Working => "WORKING",
            RobotState::Returning => "RETURNING",
            RobotState::Charging => "CHARGING",
            RobotState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleAvoidance {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

pub const SLIDER_MIN: u8 = 10;
pub const SLIDER_MAX: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotSettings {
    movement_speed: u8,
    arm_sensitivity: u8,
    auto_schedule: bool,
    night_mode: bool,
    obstacle_avoidance: ObstacleAvoidance,
}

impl Default for RobotSettings {
    fn default() -> Self {
        Self {
            movement_speed: 60,
            arm_sensitivity: 75,
            auto_schedule: true,
            night_mode: true,
            obstacle_avoidance: ObstacleAvoidance::Balanced,
        }
    }
}

impl RobotSettings {
    pub fn movement_speed(&self) -> u8 {
        self.movement_speed
    }

    pub fn arm_sensitivity(&self) -> u8 {
        self.arm_sensitivity
    }

    pub fn auto_schedule(&self) -> bool {
        self.auto_schedule
    }

    pub fn night_mode(&self) -> bool {
        self.night_mode
    }

    pub fn obstacle_avoidance(&self) -> ObstacleAvoidance {
        self.obstacle_avoidance
    }

    /// Clamped to the slider range.
    pub fn set_movement_speed(&mut self, value: u8) {
        self.movement_speed = value.clamp(SLIDER_MIN, SLIDER_MAX);
    }

    /// Clamped to the slider range.
    pub fn set_arm_sensitivity(&mut self, value: u8) {
        self.arm_sensitivity = value.clamp(SLIDER_MIN, SLIDER_MAX);
    }

    pub fn set_auto_schedule(&mut self, on: bool) {
        self.auto_schedule = on;
    }

    pub fn set_night_mode(&mut self, on: bool) {
        self.night_mode = on;
    }

    pub fn set_obstacle_avoidance(&mut self, mode: ObstacleAvoidance) {
        self.obstacle_avoidance = mode;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
        info!("robot settings restored to defaults");
    }
}

/// Battery lost per tick while working, in percent.
const BATTERY_DRAIN_PER_TICK: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub battery_level: f64,
    pub storage_capacity: u8,
    pub daily_shoes_organized: u32,
    pub total_shoes_organized: u32,
    pub temperature: f64,
    pub connection_strength: u8,
}

impl Default for SystemStats {
    fn default() -> Self {
        Self {
            battery_level: 87.0,
            storage_capacity: 45,
            daily_shoes_organized: 12,
            total_shoes_organized: 1403,
            temperature: 32.5,
            connection_strength: 95,
        }
    }
}

impl SystemStats {
    /// Advance the simulation by one telemetry period.
    pub fn tick<R: Rng + ?Sized>(&mut self, state: RobotState, rng: &mut R) {
        if state == RobotState::Working {
            self.battery_level = (self.battery_level - BATTERY_DRAIN_PER_TICK).max(0.0);
        }
        self.temperature = rng.gen_range(30.0..35.0);
        self.connection_strength = rng.gen_range(90..=99);
        debug!(
            battery = self.battery_level,
            temperature = self.temperature,
            connection = self.connection_strength,
            "telemetry tick"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "turn left",
            Direction::Right => "turn right",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(Direction),
    EmergencyStop,
    AutoRecharge,
}

pub const COMMAND_LOG_CAPACITY: usize = 5;

/// Most recent entry first.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: VecDeque<String>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.entries.push_front(line.into());
        self.entries.truncate(COMMAND_LOG_CAPACITY);
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The robot as the dashboard sees it.
#[derive(Debug, Clone, Default)]
pub struct Robot {
    pub state: RobotState,
    pub settings: RobotSettings,
    pub stats: SystemStats,
    pub log: CommandLog,
}

impl Robot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(&mut self, command: Command) {
        match command {
            Command::Move(dir) => self.log.push(format!("executing command: {dir}")),
            Command::EmergencyStop => {
                self.log.push("emergency stop triggered!");
                self.set_state(RobotState::Idle);
            }
            Command::AutoRecharge => self.set_state(RobotState::Returning),
        }
    }

    pub fn set_state(&mut self, state: RobotState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "robot state changed");
            self.state = state;
        }
    }

    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.stats.tick(self.state, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn new_robot_starts_working() {
        let robot = Robot::new();
        assert_eq!(robot.state, RobotState::Working);
        assert_eq!(robot.stats.battery_level, 87.0);
    }

    #[test]
    fn sliders_clamp_to_range() {
        let mut s = RobotSettings::default();
        s.set_movement_speed(0);
        assert_eq!(s.movement_speed(), 10);
        s.set_arm_sensitivity(250);
        assert_eq!(s.arm_sensitivity(), 100);
        s.set_movement_speed(42);
        assert_eq!(s.movement_speed(), 42);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut s = RobotSettings::default();
        s.set_movement_speed(20);
        s.set_night_mode(false);
        s.set_obstacle_avoidance(ObstacleAvoidance::Aggressive);
        s.reset();
        assert_eq!(s.movement_speed(), 60);
        assert_eq!(s.arm_sensitivity(), 75);
        assert!(s.auto_schedule());
        assert!(s.night_mode());
        assert_eq!(s.obstacle_avoidance(), ObstacleAvoidance::Balanced);
    }

    #[test]
    fn battery_drains_only_while_working() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut stats = SystemStats::default();
        stats.tick(RobotState::Idle, &mut rng);
        assert_eq!(stats.battery_level, 87.0);

        for _ in 0..10 {
            stats.tick(RobotState::Working, &mut rng);
        }
        assert!((stats.battery_level - 86.5).abs() < 1e-9);
    }

    #[test]
    fn battery_never_goes_negative() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut stats = SystemStats {
            battery_level: 0.03,
            ..SystemStats::default()
        };
        stats.tick(RobotState::Working, &mut rng);
        assert_eq!(stats.battery_level, 0.0);
    }

    #[test]
    fn random_readings_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut stats = SystemStats::default();
        for _ in 0..500 {
            stats.tick(RobotState::Idle, &mut rng);
            assert!(stats.temperature >= 30.0 && stats.temperature < 35.0);
            assert!((90..=99).contains(&stats.connection_strength));
        }
    }

    #[test]
    fn command_log_is_newest_first_and_capped() {
        let mut robot = Robot::new();
        for dir in [
            Direction::Forward,
            Direction::Left,
            Direction::Right,
            Direction::Backward,
            Direction::Forward,
            Direction::Left,
        ] {
            robot.execute(Command::Move(dir));
        }
        assert_eq!(robot.log.len(), COMMAND_LOG_CAPACITY);
        let first = robot.log.entries().next().unwrap();
        assert_eq!(first, "executing command: turn left");
    }

    #[test]
    fn emergency_stop_idles_and_recharge_returns() {
        let mut robot = Robot::new();
        robot.set_state(RobotState::Working);

        robot.execute(Command::AutoRecharge);
        assert_eq!(robot.state, RobotState::Returning);
        assert!(robot.log.is_empty());

        robot.execute(Command::EmergencyStop);
        assert_eq!(robot.state, RobotState::Idle);
        assert_eq!(robot.log.entries().next(), Some("emergency stop triggered!"));
    }
}

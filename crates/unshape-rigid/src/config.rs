//! Simulation configuration.

use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Contact response tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactSettings {
    /// Relative normal velocity below which a contact is resolved.
    /// Slightly positive so resting contacts still receive friction.
    pub adhesion_threshold: f32,
    /// Approach speeds under `|gravity| * dt * bounce_factor` do not bounce.
    pub bounce_factor: f32,
    /// Squared impulse magnitude above which a contact wakes its bodies and
    /// fires collision callbacks.
    pub impulse_wake_threshold_sq: f32,
    /// Separation within which speculative contacts are generated.
    pub margin: f32,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            adhesion_threshold: 0.01,
            bounce_factor: 3.0,
            impulse_wake_threshold_sq: 1e-4,
            margin: 0.02,
        }
    }
}

impl ContactSettings {
    /// Approach speed under which restitution is dropped.
    pub fn bounce_threshold(&self, gravity: Vec3, dt: f32) -> f32 {
        gravity.length() * dt * self.bounce_factor
    }
}

/// Sleep tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SleepSettings {
    /// Whether bodies may fall asleep at all.
    pub enabled: bool,
    /// Linear speed under which a body counts as resting.
    pub linear_threshold: f32,
    /// Angular speed under which a body counts as resting.
    pub angular_threshold: f32,
    /// Seconds a body must rest before it sleeps.
    pub delay: f32,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            linear_threshold: 0.05,
            angular_threshold: 0.05,
            delay: 0.5,
        }
    }
}

/// Layout of the broad-phase grid.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridConfig {
    /// Minimum corner of the grid.
    pub origin: Vec3,
    /// Number of cells along each axis.
    pub cells: [u32; 3],
    /// Edge length of a cubic cell.
    pub cell_size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            origin: Vec3::new(-128.0, -64.0, -128.0),
            cells: [32, 16, 32],
            cell_size: 8.0,
        }
    }
}

impl GridConfig {
    /// Checks that the grid covers a non-empty finite volume.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return Err(ConfigError::CellSize(self.cell_size));
        }
        if self.cells.contains(&0) {
            return Err(ConfigError::GridExtents(self.cells));
        }
        if !self.origin.is_finite() {
            return Err(ConfigError::GridOrigin);
        }
        Ok(())
    }

    /// Maximum corner of the grid.
    pub fn extent_max(&self) -> Vec3 {
        let [x, y, z] = self.cells;
        self.origin + Vec3::new(x as f32, y as f32, z as f32) * self.cell_size
    }
}

/// Configuration for physics simulation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Physics {
    /// Gravity acceleration.
    pub gravity: Vec3,
    /// Number of constraint solver iterations.
    pub solver_iterations: u32,
    /// Time step.
    pub dt: f32,
    /// Contact response tuning.
    pub contact: ContactSettings,
    /// Sleep tuning.
    pub sleep: SleepSettings,
    /// Broad-phase grid layout.
    pub grid: GridConfig,
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            solver_iterations: 10,
            dt: 1.0 / 60.0,
            contact: ContactSettings::default(),
            sleep: SleepSettings::default(),
            grid: GridConfig::default(),
        }
    }
}

impl Physics {
    /// Rejects configurations that cannot be simulated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solver_iterations == 0 {
            return Err(ConfigError::SolverIterations);
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(ConfigError::Timestep(self.dt));
        }
        self.grid.validate()
    }

    /// Sets gravity.
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Sets the solver iteration count.
    pub fn with_solver_iterations(mut self, iterations: u32) -> Self {
        self.solver_iterations = iterations;
        self
    }

    /// Sets the grid layout.
    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.grid = grid;
        self
    }

    /// Sets the sleep tuning.
    pub fn with_sleep(mut self, sleep: SleepSettings) -> Self {
        self.sleep = sleep;
        self
    }
}

/// Alternate name for [`Physics`].
pub type PhysicsConfig = Physics;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Physics::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_grid() {
        let mut config = Physics::default();
        config.grid.cell_size = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::CellSize(0.0)));

        let mut config = Physics::default();
        config.grid.cells = [4, 0, 4];
        assert_eq!(config.validate(), Err(ConfigError::GridExtents([4, 0, 4])));

        let mut config = Physics::default();
        config.grid.origin.x = f32::NAN;
        assert_eq!(config.validate(), Err(ConfigError::GridOrigin));
    }

    #[test]
    fn test_rejects_bad_solver() {
        let config = Physics::default().with_solver_iterations(0);
        assert_eq!(config.validate(), Err(ConfigError::SolverIterations));

        let config = Physics {
            dt: -1.0,
            ..Physics::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Timestep(-1.0)));
    }

    #[test]
    fn test_bounce_threshold() {
        let c = ContactSettings::default();
        let t = c.bounce_threshold(Vec3::new(0.0, -10.0, 0.0), 0.1);
        assert!((t - 3.0).abs() < 1e-5);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_json() {
        let config = Physics::default().with_gravity(Vec3::new(0.0, -3.7, 0.0));
        let json = serde_json::to_string(&config).unwrap();
        let back: Physics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(back.validate().is_ok());
    }
}

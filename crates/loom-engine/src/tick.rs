//! Fixed-timestep tick loop over several worlds.
//!
//! The [`TickLoop`] owns the engine's worlds and drives them forward. Each
//! tick runs [`World::tick`] with the fixed `dt` on every live world, in the
//! order the worlds were added. Real elapsed time is fed through
//! [`advance`](TickLoop::advance), which accumulates it and runs as many
//! whole ticks as fit, up to `max_ticks_per_frame`; backlog beyond that is
//! dropped rather than letting a slow frame snowball.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use loom_engine::tick::TickLoop;
//! use loom_ecs::prelude::*;
//!
//! let world = World::new("main", Arc::new(ComponentRegistry::new()));
//! let mut tick_loop = TickLoop::new(0.01, 4).unwrap();
//! tick_loop.add_world(world).unwrap();
//!
//! // 35ms of real time: three ticks, 5ms carried over.
//! assert_eq!(tick_loop.advance(Duration::from_millis(35)).unwrap(), 3);
//! assert_eq!(tick_loop.tick_count(), 3);
//! assert_eq!(tick_loop.world("main").unwrap().frame(), 3);
//! ```

use std::time::{Duration, Instant};

use loom_ecs::world::World;

use crate::EngineError;

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per world, in tick order.
    pub world_times: Vec<(String, Duration)>,
    pub total_time: Duration,
    /// Ticks run by the last `advance` call.
    pub ticks_last_advance: u32,
    /// Simulated seconds discarded by the catch-up clamp, all-time.
    pub dropped_time: f64,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The fixed-timestep driver.
///
/// Simulation time is `tick_count * fixed_dt`, never an accumulated sum, so
/// it does not drift.
pub struct TickLoop {
    worlds: Vec<World>,
    tick_counter: u64,
    fixed_dt: f64,
    max_ticks_per_frame: u32,
    /// Real time not yet consumed by a tick, in seconds.
    accumulator: f64,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    pub fn new(fixed_dt: f64, max_ticks_per_frame: u32) -> Result<Self, EngineError> {
        if !(fixed_dt > 0.0 && fixed_dt.is_finite()) {
            return Err(EngineError::InvalidConfig {
                reason: format!("fixed_dt must be positive and finite, got {fixed_dt}"),
            });
        }
        Ok(Self {
            worlds: Vec::new(),
            tick_counter: 0,
            fixed_dt,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            accumulator: 0.0,
            last_diagnostics: TickDiagnostics::default(),
        })
    }

    // -- worlds -------------------------------------------------------------

    /// Take ownership of `world`. Names must be unique.
    pub fn add_world(&mut self, world: World) -> Result<&mut World, EngineError> {
        if self.position(world.name()).is_some() {
            return Err(EngineError::DuplicateWorld {
                name: world.name().to_owned(),
            });
        }
        tracing::info!(world = world.name(), tags = ?world.tags(), "world added to tick loop");
        self.worlds.push(world);
        let last = self.worlds.len() - 1;
        Ok(&mut self.worlds[last])
    }

    /// Detach a world and hand it back to the caller.
    pub fn remove_world(&mut self, name: &str) -> Result<World, EngineError> {
        let index = self.position(name).ok_or_else(|| EngineError::UnknownWorld { name: name.to_owned() })?;
        Ok(self.worlds.remove(index))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.worlds.iter().position(|w| w.name() == name)
    }

    pub fn world(&self, name: &str) -> Option<&World> {
        self.worlds.iter().find(|w| w.name() == name)
    }

    pub fn world_mut(&mut self, name: &str) -> Option<&mut World> {
        self.worlds.iter_mut().find(|w| w.name() == name)
    }

    /// Worlds in the order they are ticked.
    pub fn worlds(&self) -> impl Iterator<Item = &World> {
        self.worlds.iter()
    }

    pub fn worlds_mut(&mut self) -> impl Iterator<Item = &mut World> {
        self.worlds.iter_mut()
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    // -- stepping -----------------------------------------------------------

    /// Run one fixed step on every live world.
    ///
    /// Stops at the first world that fails (e.g. an ordering cycle); worlds
    /// after it are not ticked and the tick counter does not advance.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        let tick_start = Instant::now();
        let dt = self.fixed_dt as f32;
        let mut world_times = Vec::with_capacity(self.worlds.len());

        for world in self.worlds.iter_mut().filter(|w| !w.is_destroyed()) {
            let world_start = Instant::now();
            if let Err(err) = world.tick(dt) {
                tracing::error!(world = world.name(), tick = self.tick_counter, error = %err, "world tick failed");
                return Err(err.into());
            }
            world_times.push((world.name().to_owned(), world_start.elapsed()));
        }

        self.tick_counter += 1;
        self.last_diagnostics.world_times = world_times;
        self.last_diagnostics.total_time = tick_start.elapsed();
        Ok(())
    }

    /// Run `count` ticks in sequence.
    pub fn run_ticks(&mut self, count: u64) -> Result<(), EngineError> {
        for _ in 0..count {
            self.tick()?;
        }
        Ok(())
    }

    /// Feed `elapsed` real time and run the ticks it pays for. Returns the
    /// number of ticks run.
    pub fn advance(&mut self, elapsed: Duration) -> Result<u32, EngineError> {
        self.accumulator += elapsed.as_secs_f64();
        let mut ticks = 0;
        while self.accumulator >= self.fixed_dt && ticks < self.max_ticks_per_frame {
            self.tick()?;
            self.accumulator -= self.fixed_dt;
            ticks += 1;
        }
        if self.accumulator >= self.fixed_dt {
            let dropped = self.accumulator - self.accumulator % self.fixed_dt;
            self.accumulator -= dropped;
            self.last_diagnostics.dropped_time += dropped;
            tracing::warn!(
                dropped_seconds = dropped,
                max_ticks = self.max_ticks_per_frame,
                "frame too slow, dropping simulation backlog"
            );
        }
        self.last_diagnostics.ticks_last_advance = ticks;
        Ok(ticks)
    }

    // -- accessors ----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulated seconds, `tick_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    /// Length of one step in seconds.
    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    /// Cap on catch-up steps per [`advance`](Self::advance) call.
    pub fn max_ticks_per_frame(&self) -> u32 {
        self.max_ticks_per_frame
    }

    /// Fraction of a tick waiting in the accumulator, in `[0, 1)`. Useful
    /// for interpolating presentation between ticks.
    pub fn alpha(&self) -> f64 {
        self.accumulator / self.fixed_dt
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

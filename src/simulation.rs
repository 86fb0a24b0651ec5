//! # Simulated Telemetry
//!
//! Synthetic readings served while the link is unhealthy, so consumers
//! always have something to show.
//!
//! Temperatures are uniform in 15.0..35.0 °C and every reading is tagged
//! `simulated`.

use chrono::{Duration as ChronoDuration, Local};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::protocol::{MessageLevel, ReadingStatus, SensorReading, SystemMessage};

/// Base temperature of simulated sensors in °C
const BASE_TEMPERATURE: f64 = 20.0;

/// Spread around the base temperature
const SPREAD_LOW: f64 = -5.0;
const SPREAD_HIGH: f64 = 15.0;

/// Seconds of history produced for the simulated view
pub const DEFAULT_HISTORY_SECS: u32 = 30;

/// Generator of simulated sensor readings
#[derive(Debug)]
pub struct Simulator {
    sensor_count: u8,
    rng: Mutex<StdRng>,
}

impl Simulator {
    /// Create a simulator for sensors `1..=sensor_count`
    pub fn new(sensor_count: u8) -> Self {
        Self {
            sensor_count,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic simulator for tests and demos
    pub fn with_seed(sensor_count: u8, seed: u64) -> Self {
        Self {
            sensor_count,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// One reading per sensor, rounded to 0.1 °C
    pub fn current(&self) -> BTreeMap<u8, SensorReading> {
        let now = Local::now();
        let mut rng = self.rng.lock();

        (1..=self.sensor_count)
            .map(|sensor_id| {
                let temperature = (sample(&mut *rng) * 10.0).round() / 10.0;
                let reading = SensorReading {
                    timestamp: now,
                    sensor_id,
                    temperature,
                    status: ReadingStatus::Simulated,
                };
                (sensor_id, reading)
            })
            .collect()
    }

    /// One reading per sensor per second for the last `seconds`, oldest first
    pub fn history(&self, seconds: u32) -> Vec<SensorReading> {
        let now = Local::now();
        let mut rng = self.rng.lock();
        let mut readings = Vec::with_capacity(seconds as usize * self.sensor_count as usize);

        for ago in (1..=seconds).rev() {
            let timestamp = now - ChronoDuration::seconds(i64::from(ago));
            for sensor_id in 1..=self.sensor_count {
                readings.push(SensorReading {
                    timestamp,
                    sensor_id,
                    temperature: sample(&mut *rng),
                    status: ReadingStatus::Simulated,
                });
            }
        }

        readings
    }

    /// Banner message shown with simulated data
    pub fn message(&self) -> SystemMessage {
        SystemMessage::now(MessageLevel::Warning, "Simulation mode active")
    }
}

fn sample<R: Rng>(rng: &mut R) -> f64 {
    BASE_TEMPERATURE + rng.gen_range(SPREAD_LOW..SPREAD_HIGH)
}

//! # Telemetry Store
//!
//! Bounded buffers written by the background reader and read by pollers.
//!
//! Each collection sits behind its own lock, so every call is atomic on its
//! own but two calls are not a consistent snapshot of each other: a reading
//! may already be in `recent_readings` and not yet in `current_temperatures`.

use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::ring::Ring;
use crate::protocol::{DeviceStats, SensorReading, SystemMessage};

/// Shared in-memory telemetry view
#[derive(Debug)]
pub struct TelemetryStore {
    current: Mutex<BTreeMap<u8, SensorReading>>,
    readings: Mutex<Ring<SensorReading>>,
    messages: Mutex<Ring<SystemMessage>>,
    stats: Mutex<Option<DeviceStats>>,
}

impl TelemetryStore {
    /// Create a store with the given ring capacities
    pub fn new(reading_capacity: usize, message_capacity: usize) -> Self {
        Self {
            current: Mutex::new(BTreeMap::new()),
            readings: Mutex::new(Ring::new(reading_capacity)),
            messages: Mutex::new(Ring::new(message_capacity)),
            stats: Mutex::new(None),
        }
    }

    /// Record a reading in the ring and as the sensor's latest value
    pub fn record_reading(&self, reading: SensorReading) {
        self.readings.lock().push(reading.clone());
        self.current.lock().insert(reading.sensor_id, reading);
    }

    pub fn record_message(&self, message: SystemMessage) {
        self.messages.lock().push(message);
    }

    pub fn record_stats(&self, stats: DeviceStats) {
        *self.stats.lock() = Some(stats);
    }

    /// Latest reading per sensor id
    pub fn current_temperatures(&self) -> BTreeMap<u8, SensorReading> {
        self.current.lock().clone()
    }

    /// The newest `count` readings, oldest first
    pub fn recent_readings(&self, count: usize) -> Vec<SensorReading> {
        self.readings.lock().recent(count)
    }

    /// The newest `count` messages, oldest first
    pub fn recent_messages(&self, count: usize) -> Vec<SystemMessage> {
        self.messages.lock().recent(count)
    }

    pub fn latest_stats(&self) -> Option<DeviceStats> {
        self.stats.lock().clone()
    }

    /// Number of readings currently buffered
    pub fn reading_count(&self) -> usize {
        self.readings.lock().len()
    }

    /// Drop all buffered telemetry
    pub fn clear(&self) {
        self.current.lock().clear();
        self.readings.lock().clear();
        self.messages.lock().clear();
        *self.stats.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageLevel, ReadingStatus};
    use chrono::Local;
    use std::sync::Arc;

    fn reading(sensor_id: u8, temperature: f64) -> SensorReading {
        SensorReading {
            timestamp: Local::now(),
            sensor_id,
            temperature,
            status: ReadingStatus::Ok,
        }
    }

    #[test]
    fn test_reading_updates_ring_and_current() {
        let store = TelemetryStore::new(50, 10);
        store.record_reading(reading(2, -5.3));

        let current = store.current_temperatures();
        assert_eq!(current[&2].temperature, -5.3);
        assert_eq!(store.recent_readings(1)[0].sensor_id, 2);
        assert_eq!(store.reading_count(), 1);
    }

    #[test]
    fn test_current_keeps_one_entry_per_sensor() {
        let store = TelemetryStore::new(50, 10);
        store.record_reading(reading(1, 20.0));
        store.record_reading(reading(1, 21.0));
        store.record_reading(reading(3, 22.0));

        let current = store.current_temperatures();
        assert_eq!(current.len(), 2);
        assert_eq!(current[&1].temperature, 21.0);
        assert_eq!(store.reading_count(), 3);
    }

    #[test]
    fn test_sixty_readings_into_fifty() {
        let store = TelemetryStore::new(50, 10);
        for i in 1..=60 {
            store.record_reading(reading(1, i as f64));
        }

        let recent = store.recent_readings(50);
        assert_eq!(recent.len(), 50);
        let temps: Vec<f64> = recent.iter().map(|r| r.temperature).collect();
        let expected: Vec<f64> = (11..=60).map(|i| i as f64).collect();
        assert_eq!(temps, expected);
    }

    #[test]
    fn test_message_ring_bounded() {
        let store = TelemetryStore::new(50, 10);
        for i in 0..15 {
            store.record_message(SystemMessage::now(MessageLevel::Info, format!("msg {}", i)));
        }
        let messages = store.recent_messages(100);
        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0].message, "msg 5");
        assert_eq!(messages[9].message, "msg 14");
    }

    #[test]
    fn test_clear_drops_everything() {
        let store = TelemetryStore::new(5, 5);
        store.record_reading(reading(1, 1.0));
        store.record_message(SystemMessage::now(MessageLevel::Info, "hello"));
        store.clear();
        assert!(store.current_temperatures().is_empty());
        assert!(store.recent_readings(5).is_empty());
        assert!(store.recent_messages(5).is_empty());
        assert!(store.latest_stats().is_none());
    }

    #[test]
    fn test_concurrent_reader_and_writer() {
        let store = Arc::new(TelemetryStore::new(50, 10));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    store.record_reading(reading((i % 8 + 1) as u8, i as f64));
                }
            })
        };

        for _ in 0..1000 {
            assert!(store.recent_readings(50).len() <= 50);
            assert!(store.current_temperatures().len() <= 8);
        }
        writer.join().unwrap();

        assert_eq!(store.reading_count(), 50);
        assert_eq!(store.current_temperatures().len(), 8);
    }
}

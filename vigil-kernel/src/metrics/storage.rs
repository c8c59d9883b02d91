//! Format compact des échantillons d'historique.
//!
//! Appliqué uniquement à l'ajout dans l'historique, jamais à la valeur
//! courante : pourcentages arrondis, octets convertis en MB/GB au-delà d'un
//! seuil avec l'unité attachée.

use serde::{Deserialize, Serialize};

use super::MetricSample;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteUnit {
    B,
    MB,
    GB,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ByteSize {
    pub value: f64,
    pub unit: ByteUnit,
}

impl ByteSize {
    pub fn compact(bytes: u64, threshold: u64) -> Self {
        if bytes >= GIB && bytes >= threshold {
            Self { value: round_to(bytes as f64 / GIB as f64, 2), unit: ByteUnit::GB }
        } else if bytes >= threshold.max(MIB) {
            Self { value: round_to(bytes as f64 / MIB as f64, 1), unit: ByteUnit::MB }
        } else {
            Self { value: bytes as f64, unit: ByteUnit::B }
        }
    }

    pub fn as_bytes(&self) -> f64 {
        match self.unit {
            ByteUnit::B => self.value,
            ByteUnit::MB => self.value * MIB as f64,
            ByteUnit::GB => self.value * GIB as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Horodatage unix en secondes
    pub ts: i64,
    pub cpu: u16,
    pub mem: u16,
    pub mem_used: ByteSize,
    pub mem_total: ByteSize,
    pub disk_used: ByteSize,
    pub disk_total: ByteSize,
    pub net_in: u64,
    pub net_out: u64,
    pub disk_read: u64,
    pub disk_write: u64,
}

impl StoredSample {
    pub fn from_sample(s: &MetricSample, threshold_bytes: u64) -> Self {
        Self {
            ts: s.timestamp.unix_timestamp(),
            cpu: round_percent(s.cpu_percent),
            mem: round_percent(s.memory_percent),
            mem_used: ByteSize::compact(s.memory.used, threshold_bytes),
            mem_total: ByteSize::compact(s.memory.total, threshold_bytes),
            disk_used: ByteSize::compact(s.disk.used, threshold_bytes),
            disk_total: ByteSize::compact(s.disk.total, threshold_bytes),
            net_in: s.net_in_rate.round() as u64,
            net_out: s.net_out_rate.round() as u64,
            disk_read: s.disk_read_rate.round() as u64,
            disk_write: s.disk_write_rate.round() as u64,
        }
    }
}

fn round_percent(v: f64) -> u16 {
    if v.is_finite() { v.round().clamp(0.0, u16::MAX as f64) as u16 } else { 0 }
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (v * p).round() / p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_units() {
        let b = ByteSize::compact(512, MIB);
        assert_eq!((b.value, b.unit), (512.0, ByteUnit::B));

        let m = ByteSize::compact(300 * MIB + MIB / 2, MIB);
        assert_eq!(m.unit, ByteUnit::MB);
        assert_eq!(m.value, 300.5);

        let g = ByteSize::compact(8 * GIB + GIB / 4, MIB);
        assert_eq!((g.value, g.unit), (8.25, ByteUnit::GB));
        assert_eq!(g.as_bytes(), (8 * GIB + GIB / 4) as f64);
    }

    #[test]
    fn test_threshold_keeps_small_values_raw() {
        let b = ByteSize::compact(5 * MIB, 10 * MIB);
        assert_eq!(b.unit, ByteUnit::B);
        assert_eq!(round_percent(42.6), 43);
        assert_eq!(round_percent(-3.0), 0);
        assert_eq!(round_percent(f64::NAN), 0);
    }
}
